//! Agent records and the per-field search table.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// A parsed agent definition as produced by a [`crate::source::RecordSource`].
///
/// The index never mutates a record; it only adds, replaces or drops whole
/// records keyed by `file_identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Logical agent name.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Declared capability (tool) list, in declaration order.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// True when the definition declared no capability list and relies on
    /// the caller-side default set.
    #[serde(default)]
    pub capabilities_inherited: bool,

    /// Free-text content of the definition.
    #[serde(default)]
    pub body: String,

    /// Identifier derived from the on-disk file name; secondary index key.
    #[serde(default)]
    pub file_identifier: String,

    #[serde(default)]
    pub file_path: PathBuf,

    #[serde(default)]
    pub file_size: u64,

    #[serde(default = "epoch")]
    pub modified_at: DateTime<Utc>,

    /// Name of the source the agent was installed from.
    #[serde(default)]
    pub source_name: String,

    #[serde(default = "epoch")]
    pub installed_at: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl AgentRecord {
    /// Minimal record with the given name and file identifier.
    pub fn new(name: impl Into<String>, file_identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            capabilities_inherited: true,
            body: String::new(),
            file_identifier: file_identifier.into(),
            file_path: PathBuf::new(),
            file_size: 0,
            modified_at: epoch(),
            source_name: String::new(),
            installed_at: epoch(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set an explicit capability list. An empty list marks the record as
    /// inheriting the default set, mirroring how definitions are parsed.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self.capabilities_inherited = self.capabilities.is_empty();
        self
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<PathBuf>) -> Self {
        self.file_path = file_path.into();
        self
    }

    pub fn installed_at(mut self, installed_at: DateTime<Utc>) -> Self {
        self.installed_at = installed_at;
        self
    }
}

/// Fields addressable by per-field search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Name,
    Description,
    Body,
    Capabilities,
    Source,
}

/// Matcher signature: record and an already-lowercased needle.
type FieldMatcher = fn(&AgentRecord, &str) -> bool;

struct FieldSpec {
    field: SearchField,
    aliases: &'static [&'static str],
    matcher: FieldMatcher,
}

const FIELD_TABLE: &[FieldSpec] = &[
    FieldSpec {
        field: SearchField::Name,
        aliases: &["name"],
        matcher: name_contains,
    },
    FieldSpec {
        field: SearchField::Description,
        aliases: &["description", "desc"],
        matcher: description_contains,
    },
    FieldSpec {
        field: SearchField::Body,
        aliases: &["body", "content"],
        matcher: body_contains,
    },
    FieldSpec {
        field: SearchField::Capabilities,
        aliases: &["tools", "capabilities", "tool", "capability"],
        matcher: declares_all_capabilities,
    },
    FieldSpec {
        field: SearchField::Source,
        aliases: &["source", "source_name"],
        matcher: source_contains,
    },
];

impl SearchField {
    fn spec(self) -> &'static FieldSpec {
        FIELD_TABLE
            .iter()
            .find(|spec| spec.field == self)
            .unwrap_or(&FIELD_TABLE[0])
    }

    /// Canonical name used in logs and cache keys.
    pub fn as_str(self) -> &'static str {
        self.spec().aliases[0]
    }

    /// Test whether `record` matches `value` on this field (case-insensitive).
    pub fn matches(self, record: &AgentRecord, value: &str) -> bool {
        (self.spec().matcher)(record, &value.to_lowercase())
    }
}

impl FromStr for SearchField {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        FIELD_TABLE
            .iter()
            .find(|spec| spec.aliases.contains(&normalized.as_str()))
            .map(|spec| spec.field)
            .ok_or_else(|| CatalogError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn name_contains(record: &AgentRecord, needle: &str) -> bool {
    contains_ci(&record.name, needle)
}

fn description_contains(record: &AgentRecord, needle: &str) -> bool {
    contains_ci(&record.description, needle)
}

fn body_contains(record: &AgentRecord, needle: &str) -> bool {
    contains_ci(&record.body, needle)
}

fn source_contains(record: &AgentRecord, needle: &str) -> bool {
    contains_ci(&record.source_name, needle)
}

/// AND semantics over a comma-separated list; inherited capability lists
/// never match.
fn declares_all_capabilities(record: &AgentRecord, needle_lower: &str) -> bool {
    if record.capabilities_inherited {
        return false;
    }
    let declared: Vec<String> = record
        .capabilities
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    needle_lower
        .split(',')
        .map(str::trim)
        .filter(|wanted| !wanted.is_empty())
        .all(|wanted| declared.iter().any(|c| c.contains(wanted)))
}
