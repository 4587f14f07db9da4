//! VCF reading and writing for classified call sets

use crate::record::ClassifiedRecord;
use crate::utils::{is_gzipped, OutputWriter};
use crate::{VrocError, VrocResult};
use flate2::read::MultiGzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Column indices for VCF parsing
#[derive(Debug, Clone)]
pub struct VcfColumnIndices {
    pub chrom: usize,
    pub pos: usize,
    pub id: usize,
    pub ref_allele: usize,
    pub alt: usize,
    pub qual: usize,
    pub filter: usize,
    pub info: usize,
    pub format: Option<usize>,
    pub samples_start: usize,
}

impl VcfColumnIndices {
    pub fn from_header(header_line: &str) -> VrocResult<Self> {
        let fields: Vec<&str> = header_line.trim().split('\t').collect();
        let column = |names: &[&str]| {
            fields
                .iter()
                .position(|col| names.contains(col))
                .ok_or_else(|| {
                    VrocError::InvalidRecord(format!(
                        "{} column not found in VCF header",
                        names[0]
                    ))
                })
        };

        let chrom = column(&["CHROM", "#CHROM"])?;
        let pos = column(&["POS"])?;
        let id = column(&["ID"])?;
        let ref_allele = column(&["REF"])?;
        let alt = column(&["ALT"])?;
        let qual = column(&["QUAL"])?;
        let filter = column(&["FILTER"])?;
        let info = column(&["INFO"])?;
        let format = fields.iter().position(|&col| col == "FORMAT");
        let samples_start = format.map(|f| f + 1).unwrap_or(fields.len());

        Ok(VcfColumnIndices {
            chrom,
            pos,
            id,
            ref_allele,
            alt,
            qual,
            filter,
            info,
            format,
            samples_start,
        })
    }

    fn standard() -> Self {
        VcfColumnIndices {
            chrom: 0,
            pos: 1,
            id: 2,
            ref_allele: 3,
            alt: 4,
            qual: 5,
            filter: 6,
            info: 7,
            format: Some(8),
            samples_start: 9,
        }
    }
}

/// Header information needed to bind filters and select a sample
#[derive(Debug, Clone)]
pub struct VcfHeader {
    meta_lines: Vec<String>,
    column_line: String,
    indices: VcfColumnIndices,
    samples: Vec<String>,
    info_ids: HashSet<String>,
    format_ids: HashSet<String>,
}

impl VcfHeader {
    pub fn from_lines<I, S>(lines: I) -> VrocResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut meta_lines = Vec::new();
        let mut info_ids = HashSet::new();
        let mut format_ids = HashSet::new();
        let mut column_line = None;

        for line in lines {
            let line: String = line.into();
            if line.starts_with("##") {
                if let Some(id) = meta_id(&line, "##INFO=<") {
                    info_ids.insert(id.to_string());
                } else if let Some(id) = meta_id(&line, "##FORMAT=<") {
                    format_ids.insert(id.to_string());
                }
                meta_lines.push(line);
            } else if line.starts_with('#') {
                column_line = Some(line);
            }
        }

        let column_line = column_line.ok_or_else(|| {
            VrocError::InvalidRecord("VCF header has no #CHROM line".to_string())
        })?;
        let indices = VcfColumnIndices::from_header(&column_line)?;
        let samples = column_line
            .trim()
            .split('\t')
            .skip(indices.samples_start)
            .map(|s| s.to_string())
            .collect();

        Ok(VcfHeader {
            meta_lines,
            column_line,
            indices,
            samples,
            info_ids,
            format_ids,
        })
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn indices(&self) -> &VcfColumnIndices {
        &self.indices
    }

    pub fn has_info(&self, id: &str) -> bool {
        self.info_ids.contains(id)
    }

    pub fn has_format(&self, id: &str) -> bool {
        self.format_ids.contains(id)
    }

    /// Resolve the sample whose FORMAT columns are evaluated.
    ///
    /// An explicit name must exist in the header; without one the first sample
    /// is used, or none at all for sites-only files.
    pub fn resolve_sample(&self, name: Option<&str>) -> VrocResult<Option<usize>> {
        match name {
            Some(name) => self
                .samples
                .iter()
                .position(|s| s == name)
                .map(Some)
                .ok_or_else(|| {
                    VrocError::Configuration(format!(
                        "sample '{}' not found in VCF header (available: {})",
                        name,
                        self.samples.join(", ")
                    ))
                }),
            None => Ok(if self.samples.is_empty() { None } else { Some(0) }),
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.meta_lines
            .iter()
            .map(|s| s.as_str())
            .chain(std::iter::once(self.column_line.as_str()))
    }
}

fn meta_id<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let body = line.strip_prefix(prefix)?;
    body.trim_end_matches('>')
        .split(',')
        .find_map(|part| part.strip_prefix("ID="))
}

/// Represents a VCF record with essential information
#[derive(Debug, Clone, PartialEq)]
pub struct VcfRecord {
    pub chrom: String,
    pub pos: u32,
    pub id: String,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    pub qual: Option<f64>,
    pub filter: String,
    pub info: String,
    pub format: Option<String>,
    pub samples: Vec<String>,
}

impl VcfRecord {
    pub fn from_line_with_indices(line: &str, indices: &VcfColumnIndices) -> VrocResult<Self> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() <= indices.info {
            return Err(VrocError::InvalidRecord(format!(
                "Invalid VCF line format - not enough columns: {}",
                line
            )));
        }

        let pos = fields[indices.pos]
            .parse::<u32>()
            .map_err(|_| VrocError::InvalidRecord(format!("Invalid position: {}", fields[indices.pos])))?;
        let qual = match fields[indices.qual] {
            "." => None,
            value => Some(value.parse::<f64>().map_err(|_| {
                VrocError::InvalidRecord(format!("Invalid QUAL: {}", value))
            })?),
        };
        let alt_alleles = match fields[indices.alt] {
            "." => Vec::new(),
            alts => alts.split(',').map(|s| s.to_string()).collect(),
        };
        let format = indices
            .format
            .and_then(|f| fields.get(f))
            .map(|f| f.to_string());
        let samples = fields
            .get(indices.samples_start..)
            .unwrap_or(&[])
            .iter()
            .map(|s| s.to_string())
            .collect();

        Ok(VcfRecord {
            chrom: fields[indices.chrom].to_string(),
            pos,
            id: fields[indices.id].to_string(),
            ref_allele: fields[indices.ref_allele].to_string(),
            alt_alleles,
            qual,
            filter: fields[indices.filter].to_string(),
            info: fields[indices.info].to_string(),
            format,
            samples,
        })
    }

    /// Parse a line using the standard VCF column order
    pub fn from_line(line: &str) -> VrocResult<Self> {
        Self::from_line_with_indices(line, &VcfColumnIndices::standard())
    }

    pub fn to_line(&self) -> String {
        let alt = if self.alt_alleles.is_empty() {
            ".".to_string()
        } else {
            self.alt_alleles.join(",")
        };
        let qual = self
            .qual
            .map(|q| q.to_string())
            .unwrap_or_else(|| ".".to_string());

        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.chrom, self.pos, self.id, self.ref_allele, alt, qual, self.filter, self.info
        );

        if let Some(format) = &self.format {
            line.push('\t');
            line.push_str(format);

            for sample in &self.samples {
                line.push('\t');
                line.push_str(sample);
            }
        }

        line
    }

    /// Value of an INFO entry; flags yield an empty string
    pub fn info_value(&self, key: &str) -> Option<&str> {
        if self.info == "." {
            return None;
        }
        self.info.split(';').find_map(|entry| match entry.split_once('=') {
            Some((k, v)) if k == key => Some(v),
            None if entry == key => Some(""),
            _ => None,
        })
    }

    /// FORMAT value of one sample; `.` and truncated sample columns yield `None`
    pub fn format_value(&self, sample: usize, key: &str) -> Option<&str> {
        let index = self.format.as_deref()?.split(':').position(|k| k == key)?;
        let value = self.samples.get(sample)?.split(':').nth(index)?;
        if value == "." {
            None
        } else {
            Some(value)
        }
    }
}

fn open_reader<P: AsRef<Path>>(path: P) -> VrocResult<Box<dyn BufRead>> {
    let file = File::open(&path)
        .map_err(|_| VrocError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(reader)
}

/// VCF file reader that handles both compressed and uncompressed files.
///
/// The header is consumed on construction; iterating yields data records.
pub struct VcfReader {
    reader: Box<dyn BufRead>,
    header: VcfHeader,
    pending: Option<String>,
    line_number: usize,
}

impl VcfReader {
    pub fn new<P: AsRef<Path>>(path: P) -> VrocResult<Self> {
        Self::from_reader(open_reader(path)?)
    }

    pub fn from_reader(mut reader: Box<dyn BufRead>) -> VrocResult<Self> {
        let mut header_lines = Vec::new();
        let mut pending = None;
        let mut line_number = 0;
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_number += 1;
            let trimmed = line.trim_end();
            if trimmed.starts_with('#') {
                header_lines.push(trimmed.to_string());
            } else if !trimmed.is_empty() {
                pending = Some(trimmed.to_string());
                break;
            }
        }

        let header = VcfHeader::from_lines(header_lines)?;

        Ok(VcfReader {
            reader,
            header,
            pending,
            line_number,
        })
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    /// Turn this reader into a stream of classified records for one sample
    pub fn into_classified(self, sample: Option<usize>) -> ClassifiedRecords {
        ClassifiedRecords {
            reader: self,
            sample,
        }
    }

    fn parse(&self, line: &str) -> VrocResult<VcfRecord> {
        VcfRecord::from_line_with_indices(line, &self.header.indices).map_err(|e| match e {
            VrocError::InvalidRecord(msg) => {
                VrocError::InvalidRecord(format!("line {}: {}", self.line_number, msg))
            }
            other => other,
        })
    }
}

impl Iterator for VcfReader {
    type Item = VrocResult<VcfRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(line) = self.pending.take() {
            return Some(self.parse(&line));
        }

        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = line.trim_end();
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    return Some(self.parse(trimmed));
                }
                Err(e) => return Some(Err(VrocError::Io(e))),
            }
        }
    }
}

/// Classified records read from an annotated VCF
pub struct ClassifiedRecords {
    reader: VcfReader,
    sample: Option<usize>,
}

impl Iterator for ClassifiedRecords {
    type Item = VrocResult<ClassifiedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.sample;
        self.reader
            .next()
            .map(|record| record.map(|r| ClassifiedRecord::from_vcf(r, sample)))
    }
}

/// VCF writer, gzip compressed when the path ends in `.gz`
pub struct VcfWriter {
    writer: OutputWriter,
}

impl VcfWriter {
    pub fn create<P: AsRef<Path>>(path: P, header: &VcfHeader) -> VrocResult<Self> {
        let mut writer = OutputWriter::create(path)?;
        for line in header.lines() {
            writeln!(writer, "{}", line)?;
        }

        Ok(VcfWriter { writer })
    }

    pub fn write_record(&mut self, record: &VcfRecord) -> VrocResult<()> {
        writeln!(self.writer, "{}", record.to_line())?;
        Ok(())
    }

    /// Complete the file, including the gzip trailer
    pub fn finish(self) -> VrocResult<()> {
        self.writer.finish()
    }
}
