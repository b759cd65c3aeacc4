//! Record source trait.
//!
//! A `RecordSource` turns a directory of agent definitions into parsed
//! [`AgentRecord`]s. Fetching and parsing live outside this crate; the engine
//! only depends on this trait. Sources are expected to skip individual
//! unparsable files themselves and fail only when the directory as a whole
//! cannot be read.

use std::path::Path;

use async_trait::async_trait;

use crate::record::AgentRecord;

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Parse every agent definition under `dir`.
    async fn load_directory(&self, dir: &Path) -> anyhow::Result<Vec<AgentRecord>>;
}
