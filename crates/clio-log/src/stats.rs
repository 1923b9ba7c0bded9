// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Process memory sampling.
//!
//! On Linux the sample is read from `/proc/self/status` (`VmRSS` / `VmSize`).
//! On other platforms a `ps(1)` query is used instead.  Samples are emitted
//! as JSON lines to `process_stats_YYYY-MM-DD.log`, each carrying the delta
//! against the first capture and a phase label such as `session_start` or
//! `after_tool`.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;

use crate::logger::append_jsonl;

/// One RSS/VSZ snapshot, in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub rss_kb: u64,
    pub vsz_kb: u64,
}

/// Take a memory snapshot of the current process.
///
/// Returns `None` when neither source is available (sampling is best-effort
/// and must never fail a turn).
pub fn sample_memory() -> Option<MemorySample> {
    #[cfg(target_os = "linux")]
    {
        sample_from_proc()
    }
    #[cfg(not(target_os = "linux"))]
    {
        sample_from_ps()
    }
}

#[cfg(target_os = "linux")]
fn sample_from_proc() -> Option<MemorySample> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_proc_status(&status)
}

#[cfg(target_os = "linux")]
fn parse_proc_status(status: &str) -> Option<MemorySample> {
    let mut rss_kb = None;
    let mut vsz_kb = None;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss_kb = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("VmSize:") {
            vsz_kb = parse_kb_field(rest);
        }
    }
    Some(MemorySample {
        rss_kb: rss_kb?,
        vsz_kb: vsz_kb?,
    })
}

#[cfg(target_os = "linux")]
fn parse_kb_field(rest: &str) -> Option<u64> {
    rest.trim().trim_end_matches("kB").trim().parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn sample_from_ps() -> Option<MemorySample> {
    let pid = std::process::id().to_string();
    let out = std::process::Command::new("ps")
        .args(["-o", "rss=,vsz=", "-p", &pid])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&out.stdout);
    let mut parts = text.split_whitespace();
    Some(MemorySample {
        rss_kb: parts.next()?.parse().ok()?,
        vsz_kb: parts.next()?.parse().ok()?,
    })
}

/// Phase-labelled memory tracker for one session.
///
/// The first capture establishes the baseline; every record carries
/// `delta_rss_kb` relative to it and a monotonically increasing capture
/// counter.
#[derive(Debug)]
pub struct ProcessStats {
    dir: PathBuf,
    session_id: String,
    baseline_rss_kb: Option<u64>,
    capture_num: u64,
}

impl ProcessStats {
    pub fn new(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_id: session_id.into(),
            baseline_rss_kb: None,
            capture_num: 0,
        }
    }

    fn file_for_today(&self) -> PathBuf {
        self.dir
            .join(format!("process_stats_{}.log", Utc::now().format("%Y-%m-%d")))
    }

    /// Take a sample and append it.  Returns the sample for callers that
    /// want to surface it (e.g. a debug view).
    pub fn capture(&mut self, phase: &str) -> Option<MemorySample> {
        self.capture_with(phase, None)
    }

    pub fn capture_with(
        &mut self,
        phase: &str,
        metadata: Option<serde_json::Value>,
    ) -> Option<MemorySample> {
        let sample = sample_memory()?;
        let baseline = *self.baseline_rss_kb.get_or_insert(sample.rss_kb);
        self.capture_num += 1;
        let mut record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session_id": self.session_id,
            "phase": phase,
            "pid": std::process::id(),
            "rss_kb": sample.rss_kb,
            "vsz_kb": sample.vsz_kb,
            "delta_rss_kb": sample.rss_kb as i64 - baseline as i64,
            "capture_num": self.capture_num,
        });
        if let Some(m) = metadata {
            record["metadata"] = m;
        }
        if let Err(e) = append_jsonl(&self.file_for_today(), &record) {
            tracing::warn!(error = %e, "failed to append process-stats record");
        }
        Some(sample)
    }
}
