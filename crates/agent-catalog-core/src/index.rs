//! In-memory index of agent records with name and file-identifier lookups.
//!
//! The record list and both lookup maps live behind one `RwLock` and are
//! replaced together on rebuild, so readers observe either the complete old
//! state or the complete new one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::obs;
use crate::record::{AgentRecord, SearchField};
use crate::snapshot;

/// Options shared by plain and fuzzy queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Maximum number of results; 0 means unlimited.
    pub limit: usize,
    /// Only records whose capability list is inherited.
    pub inherited_only: bool,
    /// Only records with an explicit capability list.
    pub explicit_only: bool,
    /// Treat the query text as a regular expression.
    pub regex: bool,
    /// Exact source-name filter.
    pub source: Option<String>,
    /// Only records installed strictly after this instant.
    pub installed_after: Option<DateTime<Utc>>,
}

impl QueryOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn inherited_only(mut self) -> Self {
        self.inherited_only = true;
        self
    }

    pub fn explicit_only(mut self) -> Self {
        self.explicit_only = true;
        self
    }

    pub fn regex(mut self) -> Self {
        self.regex = true;
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn installed_after(mut self, after: DateTime<Utc>) -> Self {
        self.installed_after = Some(after);
        self
    }

    /// Apply the non-text filters (source, install time, capability origin).
    pub fn accepts(&self, record: &AgentRecord) -> bool {
        if let Some(ref source) = self.source {
            if &record.source_name != source {
                return false;
            }
        }
        if let Some(after) = self.installed_after {
            if record.installed_at <= after {
                return false;
            }
        }
        if self.inherited_only && !record.capabilities_inherited {
            return false;
        }
        if self.explicit_only && record.capabilities_inherited {
            return false;
        }
        true
    }

    /// True once `collected` has reached the configured limit.
    pub fn is_full(&self, collected: usize) -> bool {
        self.limit > 0 && collected >= self.limit
    }
}

/// Text predicate applied to name, description and body.
enum TextMatcher {
    All,
    Substring(String),
    Pattern(Regex),
}

impl TextMatcher {
    fn build(query: &str, regex: bool) -> Result<Self> {
        if query.is_empty() {
            return Ok(Self::All);
        }
        if regex {
            return compile_pattern(query).map(Self::Pattern);
        }
        Ok(Self::Substring(query.to_lowercase()))
    }

    fn matches(&self, record: &AgentRecord) -> bool {
        let fields = [&record.name, &record.description, &record.body];
        match self {
            Self::All => true,
            Self::Substring(needle) => fields.iter().any(|f| f.to_lowercase().contains(needle)),
            Self::Pattern(re) => fields.iter().any(|f| re.is_match(f.as_str())),
        }
    }
}

/// Compile a case-insensitive search pattern.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| CatalogError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Sizes of the record list and both lookup maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub records: usize,
    pub by_name: usize,
    pub by_file_identifier: usize,
}

/// File identifiers grouped by the directory they were loaded from.
type Origins = BTreeMap<PathBuf, BTreeSet<String>>;

#[derive(Debug, Default)]
struct IndexState {
    records: Vec<AgentRecord>,
    by_name: HashMap<String, usize>,
    by_file_identifier: HashMap<String, usize>,
    origins: Origins,
}

impl IndexState {
    fn from_records(records: impl IntoIterator<Item = AgentRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.upsert(record);
        }
        state
    }

    /// Build a state whose records all came from `dir`.
    fn from_directory(dir: &Path, records: impl IntoIterator<Item = AgentRecord>) -> Self {
        let mut state = Self::from_records(records);
        let ids: BTreeSet<String> = state.by_file_identifier.keys().cloned().collect();
        if !ids.is_empty() {
            state.origins.insert(dir.to_path_buf(), ids);
        }
        state
    }

    /// Insert or replace by file identifier. Last write wins.
    fn upsert(&mut self, record: AgentRecord) {
        match self.by_file_identifier.get(&record.file_identifier).copied() {
            Some(pos) => {
                let old = std::mem::replace(&mut self.records[pos], record);
                let name = self.records[pos].name.clone();
                if old.name != name && self.by_name.get(&old.name) == Some(&pos) {
                    // Another listed record may still carry the old name.
                    match self.records.iter().rposition(|r| r.name == old.name) {
                        Some(other) => self.by_name.insert(old.name, other),
                        None => self.by_name.remove(&old.name),
                    };
                }
                self.by_name.insert(name, pos);
            }
            None => {
                let pos = self.records.len();
                self.by_name.insert(record.name.clone(), pos);
                self.by_file_identifier
                    .insert(record.file_identifier.clone(), pos);
                self.records.push(record);
            }
        }
    }

    /// Drop origin entries whose identifiers are no longer listed.
    fn retain_listed_origins(&mut self) {
        let listed = &self.by_file_identifier;
        for ids in self.origins.values_mut() {
            ids.retain(|id| listed.contains_key(id));
        }
        self.origins.retain(|_, ids| !ids.is_empty());
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            records: self.records.len(),
            by_name: self.by_name.len(),
            by_file_identifier: self.by_file_identifier.len(),
        }
    }
}

#[derive(Serialize)]
struct IndexSnapshotOut<'a> {
    records: &'a [AgentRecord],
    origins: &'a Origins,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexSnapshotIn {
    Tracked {
        records: Vec<AgentRecord>,
        #[serde(default)]
        origins: Origins,
    },
    Plain(Vec<AgentRecord>),
}

/// Authoritative store of agent records.
#[derive(Debug, Default)]
pub struct AgentIndex {
    state: RwLock<IndexState>,
}

impl AgentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index pre-populated with `records`.
    pub fn from_records(records: Vec<AgentRecord>) -> Self {
        Self {
            state: RwLock::new(IndexState::from_records(records)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Insert or replace a record, keyed by its file identifier.
    pub fn add_record(&self, record: AgentRecord) {
        self.write().upsert(record);
    }

    /// Replace the entire contents with records of unknown origin. Returns
    /// the resulting record count.
    pub fn rebuild(&self, records: Vec<AgentRecord>) -> usize {
        let next = IndexState::from_records(records);
        let count = next.records.len();
        *self.write() = next;
        count
    }

    /// Replace the entire contents with the records loaded from `dir`, and
    /// remember that they came from there.
    pub fn rebuild_from_dir(&self, dir: &Path, records: Vec<AgentRecord>) -> usize {
        let next = IndexState::from_directory(dir, records);
        let count = next.records.len();
        *self.write() = next;
        count
    }

    /// Replace the records previously loaded from `dir` with `records`,
    /// keeping everything else. Returns the resulting record count.
    ///
    /// A record is considered to come from `dir` if it was loaded from it by
    /// an earlier rebuild or update, or if it has no recorded origin and its
    /// `file_path` lies under `dir`.
    pub fn replace_under(&self, dir: &Path, records: Vec<AgentRecord>) -> usize {
        let mut guard = self.write();
        let mut origins = std::mem::take(&mut guard.origins);
        let previous = origins.remove(dir).unwrap_or_default();

        let tracked: BTreeSet<&String> = origins.values().flatten().collect();
        let kept = guard
            .records
            .iter()
            .filter(|r| {
                if previous.contains(&r.file_identifier) {
                    return false;
                }
                tracked.contains(&r.file_identifier)
                    || r.file_path.as_os_str().is_empty()
                    || !r.file_path.starts_with(dir)
            })
            .cloned()
            .collect::<Vec<_>>();

        let incoming: BTreeSet<String> =
            records.iter().map(|r| r.file_identifier.clone()).collect();
        for ids in origins.values_mut() {
            ids.retain(|id| !incoming.contains(id));
        }
        if !incoming.is_empty() {
            origins.insert(dir.to_path_buf(), incoming);
        }

        let mut next = IndexState::from_records(kept.into_iter().chain(records));
        next.origins = origins;
        next.retain_listed_origins();
        let count = next.records.len();
        debug!(
            dir = %dir.display(),
            removed = previous.len(),
            records = count,
            "directory records replaced"
        );
        *guard = next;
        count
    }

    /// Case-insensitive scan over name, description and body.
    ///
    /// Filters are applied before the text test. An empty query matches every
    /// record that passes the filters. Results follow index order and the
    /// scan stops once `opts.limit` results are collected.
    pub fn search(&self, query: &str, opts: &QueryOptions) -> Result<Vec<AgentRecord>> {
        let matcher = TextMatcher::build(query, opts.regex)?;
        let state = self.read();

        let mut results = Vec::new();
        for record in &state.records {
            if opts.is_full(results.len()) {
                break;
            }
            if opts.accepts(record) && matcher.matches(record) {
                results.push(record.clone());
            }
        }

        debug!(
            query = %query,
            scanned = state.records.len(),
            matched = results.len(),
            "index search"
        );
        Ok(results)
    }

    /// Substring search restricted to one field.
    pub fn search_by_field(&self, field: SearchField, value: &str) -> Vec<AgentRecord> {
        self.read()
            .records
            .iter()
            .filter(|r| field.matches(r, value))
            .cloned()
            .collect()
    }

    pub fn get_by_file_identifier(&self, id: &str) -> Option<AgentRecord> {
        let state = self.read();
        state
            .by_file_identifier
            .get(id)
            .map(|&pos| state.records[pos].clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<AgentRecord> {
        let state = self.read();
        state.by_name.get(name).map(|&pos| state.records[pos].clone())
    }

    /// Copy of every record, in index order.
    pub fn get_all(&self) -> Vec<AgentRecord> {
        self.read().records.clone()
    }

    pub fn stats(&self) -> IndexStats {
        self.read().stats()
    }

    /// Write the record list, plus the directory each record was loaded
    /// from, to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let (records, origins) = {
            let state = self.read();
            (state.records.clone(), state.origins.clone())
        };
        let out = IndexSnapshotOut {
            records: &records,
            origins: &origins,
        };
        snapshot::write_atomic(path, &out)?;
        debug!(path = %path.display(), records = records.len(), "index snapshot saved");
        Ok(())
    }

    /// Replace the contents with the snapshot at `path`. A bare JSON array
    /// of records is accepted too; its records have no recorded origin.
    ///
    /// A missing or unreadable snapshot leaves the index empty and is only
    /// logged. Returns the number of records loaded.
    pub fn load(&self, path: &Path) -> usize {
        match snapshot::read::<IndexSnapshotIn>(path) {
            Ok(Some(snap)) => {
                let (records, origins) = match snap {
                    IndexSnapshotIn::Tracked { records, origins } => (records, origins),
                    IndexSnapshotIn::Plain(records) => (records, Origins::new()),
                };
                let mut next = IndexState::from_records(records);
                next.origins = origins;
                next.retain_listed_origins();
                let count = next.records.len();
                *self.write() = next;
                debug!(path = %path.display(), records = count, "index snapshot loaded");
                count
            }
            Ok(None) => {
                debug!(path = %path.display(), "no index snapshot; starting empty");
                self.rebuild(Vec::new())
            }
            Err(e) => {
                obs::emit_persistence_degraded("index", path, &e);
                self.rebuild(Vec::new())
            }
        }
    }
}
