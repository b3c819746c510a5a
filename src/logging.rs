use crate::config::LoggingSettings;
use std::env;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const TAIL_CHUNK: u64 = 4096;

pub fn init_logger(settings: &LoggingSettings) -> io::Result<WorkerGuard> {
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| settings.level.clone());
    let filter_layer = EnvFilter::new(filter);

    let log_dir = settings
        .file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(log_dir)?;
    let file_name = settings
        .file
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("importer.log"));

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    info!("Tracing is configured for stdout and file logging.");

    Ok(guard)
}

/// Read-only access to the log file written by [`init_logger`].
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Up to `max_lines` most recent non-empty lines, oldest first.
    /// Reads backwards in chunks so large logs are not loaded whole.
    pub fn recent(&self, max_lines: usize) -> io::Result<Vec<String>> {
        if max_lines == 0 {
            return Ok(Vec::new());
        }
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut pos = file.seek(SeekFrom::End(0))?;
        let mut buffer: Vec<u8> = Vec::new();
        while pos > 0 {
            let read_size = TAIL_CHUNK.min(pos);
            pos -= read_size;
            file.seek(SeekFrom::Start(pos))?;
            let mut chunk = vec![0u8; read_size as usize];
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&buffer);
            buffer = chunk;

            // one extra newline guarantees the oldest kept line is whole
            if buffer.iter().filter(|b| **b == b'\n').count() > max_lines {
                break;
            }
        }

        let text = String::from_utf8_lossy(&buffer);
        let mut lines: Vec<String> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        if pos > 0 && !lines.is_empty() {
            // first line is probably cut mid-way
            lines.remove(0);
        }
        let skip = lines.len().saturating_sub(max_lines);
        Ok(lines.split_off(skip))
    }

    pub fn clear(&self) -> io::Result<()> {
        match File::create(&self.path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn size_bytes(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn size_human(&self) -> io::Result<String> {
        Ok(format_size(self.size_bytes()?))
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
