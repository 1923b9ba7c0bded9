// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs4::fs_std::FileExt;
use serde_json::{json, Value};

/// Severity levels for the structured log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Append a single JSON object as one line to `path`.
///
/// The file is opened append-only and an exclusive advisory lock is held for
/// the duration of the write, so records from concurrent processes never
/// interleave mid-line.
pub fn append_jsonl(path: &Path, record: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let result = (|| -> anyhow::Result<()> {
        let mut w = &file;
        serde_json::to_writer(&mut w, record)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    })();
    // Release even when the write failed; the lock must never outlive the call.
    let _ = FileExt::unlock(&file);
    result
}

/// Level-filtered JSON-lines logger with one file per day.
///
/// Records land in `<dir>/clio_YYYY-MM-DD.log`, one JSON object per line:
/// `{"timestamp": …, "level": …, "module": …, "message": …, "fields": …?}`.
#[derive(Debug, Clone)]
pub struct Logger {
    dir: PathBuf,
    min_level: LogLevel,
}

impl Logger {
    pub fn new(dir: impl Into<PathBuf>, min_level: LogLevel) -> Self {
        Self { dir: dir.into(), min_level }
    }

    fn file_for_today(&self) -> PathBuf {
        self.dir
            .join(format!("clio_{}.log", Utc::now().format("%Y-%m-%d")))
    }

    /// Write one record.  Records below the configured level are dropped.
    /// I/O failures are swallowed after a diagnostic; logging must never take
    /// down the turn that produced the record.
    pub fn log(&self, level: LogLevel, module: &str, message: &str, fields: Option<Value>) {
        if level < self.min_level {
            return;
        }
        let mut record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "module": module,
            "message": message,
        });
        if let Some(f) = fields {
            record["fields"] = f;
        }
        if let Err(e) = append_jsonl(&self.file_for_today(), &record) {
            tracing::warn!(error = %e, "failed to append log record");
        }
    }

    pub fn debug(&self, module: &str, message: &str) {
        self.log(LogLevel::Debug, module, message, None);
    }

    pub fn info(&self, module: &str, message: &str) {
        self.log(LogLevel::Info, module, message, None);
    }

    pub fn warning(&self, module: &str, message: &str) {
        self.log(LogLevel::Warning, module, message, None);
    }

    pub fn error(&self, module: &str, message: &str) {
        self.log(LogLevel::Error, module, message, None);
    }
}
