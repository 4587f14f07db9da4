//! Utility functions for file handling and common operations

use crate::{VrocError, VrocResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Check if a file is gzip compressed
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> VrocResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(VrocError::Io(e)),
    }
}

/// Get the number of CPU cores, with a fallback default
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Validate file paths and check if they exist
pub fn validate_file_exists<P: AsRef<Path>>(path: P) -> VrocResult<()> {
    if !path.as_ref().exists() {
        return Err(VrocError::FileNotFound(
            path.as_ref().to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// Validate that a file is readable
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> VrocResult<()> {
    validate_file_exists(&path)?;

    File::open(&path)
        .map_err(|_| VrocError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    Ok(())
}

/// Check if a path has a specific extension
pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Create the output directory, refusing to reuse a non-empty one unless forced
pub fn prepare_output_dir<P: AsRef<Path>>(path: P, force: bool) -> VrocResult<()> {
    let path = path.as_ref();
    if path.exists() && !force && path.read_dir()?.next().is_some() {
        return Err(VrocError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output directory {:?} is not empty. Use --force to overwrite.", path),
        )));
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Output file, gzip compressed when the path ends in `.gz`
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> VrocResult<Self> {
        let file = BufWriter::new(File::create(&path)?);
        if has_extension(&path, "gz") {
            Ok(OutputWriter::Gzip(GzEncoder::new(file, Compression::default())))
        } else {
            Ok(OutputWriter::Plain(file))
        }
    }

    /// Write the gzip trailer, if any, and flush everything to the file.
    /// Errors from these final writes surface only here, never on drop.
    pub fn finish(self) -> VrocResult<()> {
        match self {
            OutputWriter::Plain(mut file) => file.flush()?,
            OutputWriter::Gzip(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputWriter::Plain(file) => file.write(buf),
            OutputWriter::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputWriter::Plain(file) => file.flush(),
            OutputWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Chunking utility for splitting work across threads
pub fn chunk_work<T>(items: Vec<T>, num_chunks: usize) -> Vec<Vec<T>> {
    if items.is_empty() || num_chunks == 0 {
        return vec![items];
    }

    let num_chunks = std::cmp::min(num_chunks, items.len());
    let chunk_size = std::cmp::max(1, items.len() / num_chunks);

    let mut chunks = Vec::with_capacity(num_chunks);
    let mut items = items.into_iter();

    for i in 0..num_chunks {
        // Last chunk gets all remaining items
        let chunk: Vec<T> = if i == num_chunks - 1 {
            items.by_ref().collect()
        } else {
            items.by_ref().take(chunk_size).collect()
        };

        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }

    chunks
}

/// Timer utility for measuring execution time
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::info!("Starting timer: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn log_elapsed(&self) {
        let duration = self.elapsed();
        log::info!("Timer '{}' elapsed: {:.2?}", self.name, duration);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.log_elapsed();
    }
}
