//! Shared logging setup for every nowcast daemon and worker binary.
//!
//! Two layers are built: a size/count-rotating file writer, and a stderr
//! writer. Worker `--debug` mode drops the file layer entirely so nothing
//! but the console is touched, matching the worker runtime's requirement
//! that `--debug` "redirects logging to the console" and performs no other
//! I/O side effects.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "nowcast_manager=info,nowcast_broker=info,nowcast_worker=info,nowcast_scheduler=info";

/// Logging configuration for a single binary's process lifetime.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub directory: PathBuf,
    pub base_name: &'a str,
    pub max_file_size: u64,
    pub max_files: usize,
    pub console_level: &'a str,
    /// `--debug` mode: suppress the rotating file layer, log only to
    /// stderr, at full verbosity.
    pub debug_mode: bool,
}

/// Initialize a global `tracing` subscriber for this process.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    if config.debug_mode {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(EnvFilter::new(DEFAULT_LOG_FILTER)),
            )
            .init();
        return Ok(());
    }

    fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "failed to create log directory: {}",
            config.directory.display()
        )
    })?;

    let file_writer = SharedRollingWriter::new(
        config.directory.clone(),
        config.base_name,
        config.max_files,
        config.max_file_size,
    )
    .with_context(|| format!("failed to open rolling log file for {}", config.app_name))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = EnvFilter::new(config.console_level);

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
        .init();

    Ok(())
}

/// Force an immediate rotation of the rolling log file at `directory`/
/// `base_name`, independent of its size threshold. Used by the
/// `rotate_logs` worker, whose reference calls `doRollover()` directly on
/// each configured `RotatingFileHandler`; `tracing`'s subscriber exposes no
/// such handle once installed, so this re-opens the file by path and
/// performs the same rename sequence the live writer would. Returns the
/// fresh (now-empty) current log file path.
pub fn force_rotate(
    directory: impl Into<PathBuf>,
    base_name: &str,
    max_files: usize,
) -> io::Result<PathBuf> {
    let mut appender = RollingFileAppender::new(directory.into(), base_name, max_files, u64::MAX)?;
    appender.rotate()?;
    Ok(appender.current_path())
}

/// Nowcast home directory override, e.g. for tests or containerized
/// deployments: `$NOWCAST_HOME`, falling back to `~/.nowcast`.
pub fn nowcast_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("NOWCAST_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("could not determine home directory")
        .join(".nowcast")
}

struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            base_name: sanitize_name(base_name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current_file()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        self.rotate_files()?;

        let (file, size) = self.open_current_file()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }

    fn rotate_files(&self) -> io::Result<()> {
        let max_index = self.max_files.saturating_sub(1);
        if max_index == 0 {
            return Ok(());
        }

        let oldest = self.rotated_path(max_index);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for idx in (1..max_index).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                let dst = self.rotated_path(idx + 1);
                fs::rename(&src, &dst)?;
            }
        }

        let current = self.current_path();
        if current.exists() {
            let first = self.rotated_path(1);
            fs::rename(current, first)?;
        }

        Ok(())
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> Result<Self> {
        let appender = RollingFileAppender::new(dir, base_name, max_files, max_size)
            .with_context(|| format!("failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_at_most_max_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender =
            RollingFileAppender::new(dir.path().to_path_buf(), "test", 3, 16).unwrap();

        for _ in 0..20 {
            appender.write_all(b"0123456789").unwrap();
        }
        appender.flush().unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(entries.len() <= 3);
    }

    #[test]
    fn force_rotate_starts_a_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, b"stale content").unwrap();

        let fresh = force_rotate(dir.path(), "test", 3).unwrap();

        assert_eq!(fresh, path);
        assert_eq!(fs::read(&path).unwrap().len(), 0);
        assert!(dir.path().join("test.log.1").exists());
    }
}
