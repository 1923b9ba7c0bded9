// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{bail, Context};

/// Id-addressed blob store for oversize tool results, scoped to one session.
///
/// Each blob is its own file under `<session>/results/`, so writers never
/// contend.  Readers must pass an explicit length to bound memory.  The whole
/// directory is removed with the session.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

/// Upper bound on a single `get` read.
pub const MAX_READ_LEN: usize = 1 << 20;

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, id: &str) -> anyhow::Result<PathBuf> {
        // Ids are generated here and are always plain tokens; reject anything
        // else so a model-supplied id cannot traverse out of the store.
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("invalid result id: {id:?}");
        }
        Ok(self.dir.join(id))
    }

    /// Store a blob and return its opaque id.
    pub fn put(&self, data: &[u8]) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating result store at {}", self.dir.display()))?;
        let id = format!("r_{}", uuid::Uuid::new_v4().simple());
        std::fs::write(self.dir.join(&id), data)?;
        Ok(id)
    }

    /// Read `length` bytes starting at `offset`.  Reads past the end return
    /// the available suffix; an offset at or past the end returns empty.
    pub fn get(&self, id: &str, offset: u64, length: usize) -> anyhow::Result<Vec<u8>> {
        if length > MAX_READ_LEN {
            bail!("read length {length} exceeds maximum {MAX_READ_LEN}");
        }
        let path = self.path_for(id)?;
        let mut file = std::fs::File::open(&path)
            .with_context(|| format!("no stored result {id}"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length];
        let mut read_total = 0usize;
        loop {
            let n = file.read(&mut buf[read_total..])?;
            if n == 0 {
                break;
            }
            read_total += n;
            if read_total == length {
                break;
            }
        }
        buf.truncate(read_total);
        Ok(buf)
    }

    pub fn size(&self, id: &str) -> anyhow::Result<u64> {
        let path = self.path_for(id)?;
        let meta = std::fs::metadata(&path).with_context(|| format!("no stored result {id}"))?;
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ResultStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ResultStore::new(dir.path().join("results")), dir)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (s, _d) = store();
        let id = s.put(b"hello world").unwrap();
        assert_eq!(s.get(&id, 0, 11).unwrap(), b"hello world");
    }

    #[test]
    fn ids_are_unique() {
        let (s, _d) = store();
        let a = s.put(b"one").unwrap();
        let b = s.put(b"one").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn offset_and_length_window_the_read() {
        let (s, _d) = store();
        let id = s.put(b"0123456789").unwrap();
        assert_eq!(s.get(&id, 2, 4).unwrap(), b"2345");
    }

    #[test]
    fn read_past_end_returns_available_suffix() {
        let (s, _d) = store();
        let id = s.put(b"abc").unwrap();
        assert_eq!(s.get(&id, 1, 100).unwrap(), b"bc");
        assert!(s.get(&id, 10, 4).unwrap().is_empty());
    }

    #[test]
    fn size_reports_stored_length() {
        let (s, _d) = store();
        let id = s.put(&vec![7u8; 32_768]).unwrap();
        assert_eq!(s.size(&id).unwrap(), 32_768);
    }

    #[test]
    fn unknown_id_is_error() {
        let (s, _d) = store();
        assert!(s.get("r_nope", 0, 4).is_err());
        assert!(s.size("r_nope").is_err());
    }

    #[test]
    fn traversal_ids_rejected() {
        let (s, _d) = store();
        assert!(s.get("../etc/passwd", 0, 4).is_err());
        assert!(s.get("", 0, 4).is_err());
        assert!(s.size("a/b").is_err());
    }

    #[test]
    fn oversized_read_length_rejected() {
        let (s, _d) = store();
        let id = s.put(b"x").unwrap();
        assert!(s.get(&id, 0, MAX_READ_LEN + 1).is_err());
    }
}
