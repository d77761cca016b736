//! Logging setup for Docflow binaries.
//!
//! Installs a `tracing` subscriber with two sinks: stderr and a size-rotated
//! log file under `$DOCFLOW_HOME/logs`.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "docflow=info,docflow_store=info";
const LOG_BACKUPS: usize = 4;
const LOG_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Logging options chosen by the binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Override for the log directory; defaults to [`logs_dir`].
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;
    let log_path = log_dir.join(format!("{}.log", config.app_name));
    let file_writer = LogFileWriter::open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Docflow home directory: `$DOCFLOW_HOME` or `~/.docflow`.
pub fn docflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("DOCFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".docflow"))
        .unwrap_or_else(|| PathBuf::from(".docflow"))
}

/// Logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    docflow_home().join("logs")
}

/// Size-capped log file with numbered backups (`docflow.log.1` is the newest).
struct RotatingLog {
    path: PathBuf,
    backups: usize,
    limit: u64,
    file: File,
    written: u64,
}

impl RotatingLog {
    fn open(path: &Path, backups: usize, limit: u64) -> io::Result<Self> {
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            backups,
            limit,
            file,
            written,
        })
    }

    fn backup(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.backup(self.backups);
        if oldest.exists() {
            fs::remove_file(oldest)?;
        }
        for n in (1..self.backups).rev() {
            let from = self.backup(n);
            if from.exists() {
                fs::rename(from, self.backup(n + 1))?;
            }
        }
        if self.backups > 0 && self.path.exists() {
            fs::rename(&self.path, self.backup(1))?;
            self.file = open_append(&self.path)?;
        } else {
            self.file = File::create(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `MakeWriter` handle shared by every event the file layer formats.
#[derive(Clone)]
struct LogFileWriter(Arc<Mutex<RotatingLog>>);

impl LogFileWriter {
    fn open(path: &Path) -> io::Result<Self> {
        let log = RotatingLog::open(path, LOG_BACKUPS, LOG_SIZE_LIMIT)?;
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut RotatingLog) -> io::Result<T>) -> io::Result<T> {
        let mut log = self.0.lock().map_err(poisoned)?;
        f(&mut log)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, "log file lock poisoned")
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_log(|log| log.append(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_log(|log| log.file.flush())
    }
}
