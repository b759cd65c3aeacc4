//! In-memory record source for tests and embedding callers.
//!
//! `StaticSource` maps directories to fixed record sets and counts how often
//! each directory was loaded, so callers can assert on reparse behaviour.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::record::AgentRecord;
use crate::source::RecordSource;

/// Record source backed by a `HashMap<directory, records>`.
#[derive(Debug, Default)]
pub struct StaticSource {
    dirs: Mutex<HashMap<PathBuf, Vec<AgentRecord>>>,
    loads: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the records served for `dir`.
    pub fn with_directory(self, dir: impl Into<PathBuf>, records: Vec<AgentRecord>) -> Self {
        self.set_directory(dir, records);
        self
    }

    pub fn set_directory(&self, dir: impl Into<PathBuf>, records: Vec<AgentRecord>) {
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dir.into(), records);
    }

    /// Number of `load_directory` calls served, including failed ones.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    async fn load_directory(&self, dir: &Path) -> anyhow::Result<Vec<AgentRecord>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let dirs = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
        dirs.get(dir)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("directory not readable: {}", dir.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_registered_directory() {
        let source = StaticSource::new()
            .with_directory("/agents", vec![AgentRecord::new("a", "a.md")]);
        let records = source.load_directory(Path::new("/agents")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_directory_fails() {
        let source = StaticSource::new();
        let err = source
            .load_directory(Path::new("/missing"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/missing"));
        assert_eq!(source.load_count(), 1);
    }
}
