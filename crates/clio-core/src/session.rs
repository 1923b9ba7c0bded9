// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use clio_model::Message;

fn default_token_ratio() -> f64 {
    2.5
}

/// Persistent conversation state — the `session.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub working_directory: PathBuf,
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Rolling chars-per-token estimate used for budgeting.
    #[serde(default = "default_token_ratio")]
    pub token_ratio: f64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id} is owned by another process (pid {pid})")]
    AlreadyOwned { id: String, pid: u32 },

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session file is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Factory for sessions under a common root (`.clio/sessions/`).
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

/// A live, exclusively-owned session.
///
/// The advisory lock on `session.lock` is held for the lifetime of this
/// value; dropping it (or calling [`Session::close`]) releases ownership.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    dir: PathBuf,
    lock_file: File,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a new session owned by this process.
    pub fn create(
        &self,
        working_directory: impl Into<PathBuf>,
        provider: &str,
        model: &str,
    ) -> Result<Session, SessionError> {
        std::fs::create_dir_all(&self.root)?;

        let now = Utc::now();
        let base_id = format!("sess_{}", now.format("%Y%m%d_%H%M%S"));
        let mut id = base_id.clone();
        let mut suffix = 2;
        while self.root.join(&id).exists() {
            id = format!("{base_id}_{suffix}");
            suffix += 1;
        }

        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir)?;
        let lock_file = acquire_lock(&dir, &id)?;

        let state = SessionState {
            session_id: id.clone(),
            created_at: now,
            updated_at: now,
            working_directory: working_directory.into(),
            provider: provider.to_string(),
            model: model.to_string(),
            messages: Vec::new(),
            metadata: serde_json::Map::new(),
            token_ratio: default_token_ratio(),
        };

        let mut session = Session { state, dir, lock_file };
        session.save()?;
        debug!(session_id = %id, "session created");
        Ok(session)
    }

    /// Load an existing session, acquiring exclusive ownership.
    pub fn load(&self, id: &str) -> Result<Session, SessionError> {
        let dir = self.root.join(id);
        let path = dir.join("session.json");
        if !path.exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }

        let lock_file = acquire_lock(&dir, id)?;

        let text = std::fs::read_to_string(&path)?;
        let state: SessionState =
            serde_json::from_str(&text).map_err(|e| SessionError::Corrupt(e.to_string()))?;

        Ok(Session { state, dir, lock_file })
    }

    /// Destroy a session and everything under its directory, including
    /// spilled results.  Refuses while another live process owns it.
    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let dir = self.root.join(id);
        if !dir.exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        // Taking the lock first guarantees no live owner.
        let lock_file = acquire_lock(&dir, id)?;
        let _ = FileExt::unlock(&lock_file);
        drop(lock_file);
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = std::fs::read_dir(&self.root)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.path().join("session.json").exists())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

/// Acquire the exclusive advisory lock for a session directory, writing this
/// process's pid into the sentinel.
///
/// When the lock is already held, the recorded pid decides the error: a live
/// pid means real contention; a dead pid means a stale sentinel (the advisory
/// lock itself dies with its holder), which is cleared and re-acquired.
fn acquire_lock(dir: &Path, id: &str) -> Result<File, SessionError> {
    let lock_path = dir.join("session.lock");
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)?;

    if !file.try_lock_exclusive()? {
        let recorded_pid = std::fs::read_to_string(&lock_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        if recorded_pid != 0 && !pid_alive(recorded_pid) {
            warn!(session_id = %id, pid = recorded_pid, "clearing stale session lock");
            drop(file);
            std::fs::remove_file(&lock_path)?;
            let fresh = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            if fresh.try_lock_exclusive()? {
                write_pid(&fresh)?;
                return Ok(fresh);
            }
            // Someone else grabbed it between remove and retry.
        }
        return Err(SessionError::AlreadyOwned { id: id.to_string(), pid: recorded_pid });
    }

    write_pid(&file)?;
    Ok(file)
}

fn write_pid(file: &File) -> std::io::Result<()> {
    let mut f = file;
    f.set_len(0)?;
    writeln!(f, "{}", std::process::id())?;
    f.flush()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes existence without delivering anything.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

impl Session {
    pub fn id(&self) -> &str {
        &self.state.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory for spilled tool results.
    pub fn results_dir(&self) -> PathBuf {
        self.dir.join("results")
    }

    pub fn working_directory(&self) -> &Path {
        &self.state.working_directory
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn token_ratio(&self) -> f64 {
        self.state.token_ratio
    }

    /// Mutate in-memory state only; call [`Session::save`] at durability
    /// points.
    pub fn append_message(&mut self, msg: Message) {
        self.state.messages.push(msg);
    }

    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.state.messages = messages;
    }

    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        self.state.metadata.insert(key.to_string(), value);
    }

    /// Atomic persist: write a temp file in the session directory, fsync,
    /// then rename over `session.json`.  A crash at any point leaves a valid
    /// JSON document on disk.
    pub fn save(&mut self) -> Result<(), SessionError> {
        self.state.updated_at = Utc::now();
        let text = serde_json::to_string_pretty(&self.state)
            .map_err(|e| SessionError::Corrupt(e.to_string()))?;

        let tmp_path = self.dir.join("session.json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(text.as_bytes())?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, self.dir.join("session.json"))?;
        Ok(())
    }

    /// Release the lock and remove the sentinel.
    pub fn close(self) {
        let _ = FileExt::unlock(&self.lock_file);
        let _ = std::fs::remove_file(self.dir.join("session.lock"));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionStore::new(dir.path().join("sessions")), dir)
    }

    #[test]
    fn create_assigns_timestamped_id() {
        let (s, _d) = store();
        let session = s.create("/tmp", "mock", "mock-model").unwrap();
        assert!(session.id().starts_with("sess_"));
        assert_eq!(session.id().len(), "sess_YYYYMMDD_HHMMSS".len());
    }

    #[test]
    fn colliding_ids_get_a_suffix() {
        let (s, _d) = store();
        let a = s.create("/tmp", "mock", "m").unwrap();
        let b = s.create("/tmp", "mock", "m").unwrap();
        assert_ne!(a.id(), b.id());
        // Second one within the same second carries a suffix.
        if b.id().len() > a.id().len() {
            assert!(b.id().ends_with("_2"));
        }
    }

    #[test]
    fn session_file_round_trips() {
        let (s, _d) = store();
        let id = {
            let mut session = s.create("/workspace", "anthropic", "claude-sonnet-4-5").unwrap();
            session.append_message(Message::user("hello"));
            session.save().unwrap();
            let id = session.id().to_string();
            session.close();
            id
        };

        let loaded = s.load(&id).unwrap();
        assert_eq!(loaded.state().provider, "anthropic");
        assert_eq!(loaded.state().model, "claude-sonnet-4-5");
        assert_eq!(loaded.messages().len(), 1);
        assert_eq!(loaded.messages()[0].content, "hello");
        assert_eq!(loaded.token_ratio(), 2.5);
    }

    #[test]
    fn session_json_has_contract_keys() {
        let (s, _d) = store();
        let mut session = s.create("/tmp", "mock", "m").unwrap();
        session.save().unwrap();
        let text = std::fs::read_to_string(session.dir().join("session.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        for key in [
            "session_id",
            "created_at",
            "updated_at",
            "working_directory",
            "provider",
            "model",
            "messages",
            "metadata",
            "token_ratio",
        ] {
            assert!(v.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn second_load_fails_with_already_owned() {
        let (s, _d) = store();
        let session = s.create("/tmp", "mock", "m").unwrap();
        let id = session.id().to_string();

        let second = s.load(&id);
        match second {
            Err(SessionError::AlreadyOwned { pid, .. }) => {
                assert_eq!(pid, std::process::id());
            }
            other => panic!("expected AlreadyOwned, got {other:?}"),
        }
    }

    #[test]
    fn close_releases_ownership() {
        let (s, _d) = store();
        let session = s.create("/tmp", "mock", "m").unwrap();
        let id = session.id().to_string();
        session.close();
        assert!(s.load(&id).is_ok());
    }

    #[test]
    fn load_unknown_session_is_not_found() {
        let (s, _d) = store();
        assert!(matches!(
            s.load("sess_19700101_000000"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_file_reports_corrupt() {
        let (s, _d) = store();
        let session = s.create("/tmp", "mock", "m").unwrap();
        let id = session.id().to_string();
        let dir = session.dir().to_path_buf();
        session.close();
        std::fs::write(dir.join("session.json"), "{ not json").unwrap();
        assert!(matches!(s.load(&id), Err(SessionError::Corrupt(_))));
    }

    #[test]
    fn save_is_atomic_no_temp_left_behind() {
        let (s, _d) = store();
        let mut session = s.create("/tmp", "mock", "m").unwrap();
        session.append_message(Message::user("x"));
        session.save().unwrap();
        assert!(!session.dir().join("session.json.tmp").exists());
        // The canonical file parses at every observable moment.
        let text = std::fs::read_to_string(session.dir().join("session.json")).unwrap();
        serde_json::from_str::<serde_json::Value>(&text).unwrap();
    }

    #[test]
    fn delete_removes_directory_and_results() {
        let (s, _d) = store();
        let session = s.create("/tmp", "mock", "m").unwrap();
        let id = session.id().to_string();
        let results = session.results_dir();
        std::fs::create_dir_all(&results).unwrap();
        std::fs::write(results.join("r_x"), "blob").unwrap();
        let dir = session.dir().to_path_buf();
        session.close();

        s.delete(&id).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn delete_refuses_while_owned() {
        let (s, _d) = store();
        let session = s.create("/tmp", "mock", "m").unwrap();
        let id = session.id().to_string();
        assert!(matches!(
            s.delete(&id),
            Err(SessionError::AlreadyOwned { .. })
        ));
        session.close();
    }

    #[test]
    fn list_returns_created_sessions() {
        let (s, _d) = store();
        let a = s.create("/tmp", "mock", "m").unwrap();
        let id = a.id().to_string();
        a.close();
        assert!(s.list().contains(&id));
    }
}
