//! Remote entity snapshots: legal cases and source files.
//!
//! These are local copies of state owned by the remote service. Updates are
//! built by cloning a prior snapshot and overriding fields, never by mutating
//! a shared instance.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key marking entities created by this agent.
pub const UPLOADER_KEY: &str = "legali.uploader";
/// Value stored under [`UPLOADER_KEY`] by this agent.
pub const UPLOADER_VALUE: &str = "example-agent";

// ---------------------------------------------------------------------------
// LegalCase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalCase {
    #[serde(rename = "legalCaseUUID")]
    pub id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub reference: String,
    pub owner: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LegalCase {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            firstname: String::new(),
            lastname: String::new(),
            reference: String::new(),
            owner: String::new(),
            groups: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn firstname(mut self, firstname: impl Into<String>) -> Self {
        self.firstname = firstname.into();
        self
    }

    pub fn lastname(mut self, lastname: impl Into<String>) -> Self {
        self.lastname = lastname.into();
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn add_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn put_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when the uploader marker says this agent created the case.
    pub fn is_created_by_agent(&self) -> bool {
        self.metadata.get(UPLOADER_KEY).map(String::as_str) == Some(UPLOADER_VALUE)
    }
}

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

/// Processing status of a source file.
///
/// `Timeout` is never reported by the remote side; the polling waiter
/// synthesises it when its deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFileStatus {
    Pending,
    Processing,
    Ready,
    Error,
    Timeout,
}

impl SourceFileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for SourceFileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    #[serde(rename = "sourceFileUUID")]
    pub id: Uuid,
    #[serde(rename = "legalCaseUUID")]
    pub case_id: Uuid,
    pub reference: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub status: SourceFileStatus,
}

impl SourceFile {
    pub fn new(id: Uuid, case_id: Uuid) -> Self {
        Self {
            id,
            case_id,
            reference: String::new(),
            metadata: BTreeMap::new(),
            status: SourceFileStatus::Pending,
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn put_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_copy_leaves_original_untouched() {
        let original = LegalCase::new(Uuid::new_v4())
            .firstname("John")
            .lastname("Doe")
            .reference("123-456-789");

        let changed = original
            .clone()
            .firstname("Jane")
            .reference("John changed his name");

        assert_eq!(original.firstname, "John");
        assert_eq!(changed.firstname, "Jane");
        assert_eq!(changed.lastname, "Doe");
        assert_eq!(changed.id, original.id);
    }

    #[test]
    fn test_uploader_marker() {
        let marked = LegalCase::new(Uuid::new_v4()).put_metadata(UPLOADER_KEY, UPLOADER_VALUE);
        let foreign = LegalCase::new(Uuid::new_v4()).put_metadata(UPLOADER_KEY, "someone-else");
        let bare = LegalCase::new(Uuid::new_v4());

        assert!(marked.is_created_by_agent());
        assert!(!foreign.is_created_by_agent());
        assert!(!bare.is_created_by_agent());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SourceFileStatus::Ready.is_terminal());
        assert!(SourceFileStatus::Error.is_terminal());
        assert!(SourceFileStatus::Timeout.is_terminal());
        assert!(!SourceFileStatus::Pending.is_terminal());
        assert!(!SourceFileStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&SourceFileStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }

    #[test]
    fn test_case_wire_field_names() {
        let case = LegalCase::new(Uuid::nil()).firstname("John");
        let value = serde_json::to_value(&case).unwrap();
        assert!(value.get("legalCaseUUID").is_some());
        assert_eq!(value["firstname"], "John");
    }
}
