//! Textual session logger
//!
//! Human-readable session log, separate from process diagnostics. Every line
//! is prefixed with milliseconds elapsed since `start`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Local;

use crate::error::Error;

struct ActiveLog {
    file: BufWriter<File>,
    started: Instant,
}

impl ActiveLog {
    fn line(&mut self, text: &str) {
        let elapsed = self.started.elapsed().as_millis();
        let _ = writeln!(self.file, "[{elapsed}ms] {text}");
        let _ = self.file.flush();
    }
}

/// Thread-safe append-only session log.
pub struct SessionLogger {
    inner: Mutex<Option<ActiveLog>>,
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLogger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Open `path` for appending, creating parent directories as needed.
    pub fn start(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut guard = self.inner.lock().unwrap();
        let mut active = ActiveLog {
            file: BufWriter::new(file),
            started: Instant::now(),
        };
        active.line("=== Session Logging Started ===");
        *guard = Some(active);
        tracing::info!(path = %path.display(), "session logging started");
        Ok(())
    }

    pub fn stop(&self) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(mut active) = guard.take() {
            active.line("=== Session Logging Stopped ===");
        }
    }

    pub fn is_logging(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub fn log_audio_stats(&self, bytes: usize, sample_rate: u32, channels: u16, endpoint: &str) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(active) = guard.as_mut() {
            active.line(&format!(
                "[AudioStats] bytes: {bytes}, sample_rate: {sample_rate}, \
                 channels: {channels}, endpoint: {endpoint}"
            ));
        }
    }

    pub fn log_packet(&self, timestamp: u64, size: usize) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(active) = guard.as_mut() {
            active.line(&format!("[Packet] timestamp: {timestamp}, size: {size}"));
        }
    }
}

/// `sessionlogs/<role>/<prefix>_<YYYYmmdd_HHMMSS>.log`
pub fn log_path(prefix: &str, role: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from("sessionlogs")
        .join(role)
        .join(format!("{prefix}_{stamp}.log"))
}
