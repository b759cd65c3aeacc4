//! Record source that reads one JSON-serialised `AgentRecord` per file.

use std::path::{Path, PathBuf};

use agent_catalog_core::{AgentRecord, RecordSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";
const DEFINITION_SUFFIX: &str = ".md";

/// Loads `*.json` files from a directory. Files that fail to parse, or that
/// carry no name, are skipped with a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDirSource;

#[async_trait]
impl RecordSource for JsonDirSource {
    async fn load_directory(&self, dir: &Path) -> Result<Vec<AgentRecord>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read agent directory {}", dir.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        // Directory iteration order is platform-defined.
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping agent file"),
            }
        }

        debug!(dir = %dir.display(), records = records.len(), "agent directory loaded");
        Ok(records)
    }
}

async fn read_record(path: &Path) -> Result<AgentRecord> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut record: AgentRecord = serde_json::from_str(&raw).context("invalid agent JSON")?;
    if record.name.trim().is_empty() {
        anyhow::bail!("agent has no name");
    }

    let metadata = tokio::fs::metadata(path).await?;
    record.capabilities_inherited = record.capabilities.is_empty();
    if record.file_identifier.is_empty() {
        record.file_identifier = file_identifier(path);
    }
    if record.file_path.as_os_str().is_empty() {
        record.file_path = PathBuf::from(path);
    }
    if record.file_size == 0 {
        record.file_size = metadata.len();
    }
    if record.modified_at == DateTime::<Utc>::UNIX_EPOCH {
        if let Ok(modified) = metadata.modified() {
            record.modified_at = modified.into();
        }
    }
    Ok(record)
}

/// `go-expert.json` becomes `go-expert.md`, matching the definition it was
/// exported from.
fn file_identifier(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}{DEFINITION_SUFFIX}")
}
