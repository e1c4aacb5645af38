//! Per-peer log files under a run's `logs/` directory.
//!
//! Each peer appends plain lines to `<peer>.log`. When a trial fails the
//! runner replays every log through `error!` so the cause is visible in the
//! operator's terminal.

use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, warn};

pub struct PeerLog {
    path: PathBuf,
    out: Option<LineWriter<File>>,
    started: Instant,
}

impl PeerLog {
    /// Open `<logs_dir>/<peer>.log` for appending. Failure to open degrades
    /// to a log that drops lines.
    pub fn open(logs_dir: &Path, peer: &str) -> Self {
        let path = logs_dir.join(format!("{peer}.log"));
        let out = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Some(LineWriter::new(f)),
            Err(e) => {
                warn!("could not open peer log {}: {}", path.display(), e);
                None
            }
        };
        Self {
            path,
            out,
            started: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, level: &str, msg: impl Display) {
        let elapsed = self.started.elapsed().as_secs_f64();
        if let Some(out) = self.out.as_mut() {
            if writeln!(out, "[{elapsed:>9.3}s] {level:<5} {msg}").is_err() {
                self.out = None;
            }
        }
    }

    pub fn info(&mut self, msg: impl Display) {
        self.line("INFO", msg);
    }

    pub fn warn(&mut self, msg: impl Display) {
        self.line("WARN", msg);
    }

    pub fn error(&mut self, msg: impl Display) {
        self.line("ERROR", msg);
    }
}

/// Emit every `*.log` in `logs_dir`, sorted by name. Unreadable files are
/// skipped.
pub fn dump_logs(logs_dir: &Path) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };
    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    logs.sort();
    for log in logs {
        if let Ok(text) = fs::read_to_string(&log) {
            let name = log.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            error!("--- {} ---\n{}", name, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = PeerLog::open(dir.path(), "plant");
            log.info("started");
            log.error(format_args!("step {} failed", 7));
        }
        let mut log = PeerLog::open(dir.path(), "plant");
        log.warn("reopened");
        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("INFO  started"));
        assert!(lines[1].contains("ERROR step 7 failed"));
        assert!(lines[2].contains("WARN"));
    }

    #[test]
    fn dump_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        dump_logs(&dir.path().join("nope"));
    }
}
