// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and record types shared by every backend.
//!
//! Identities validate their invariants at creation time, version tokens are
//! totally ordered, and records are immutable once published.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a record identity.
const MAX_RECORD_ID_LEN: usize = 128;

/// Validated record identity.
/// Must be non-empty, at most 128 chars, without whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Create a new RecordId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "record_id",
                value: id,
                reason: "Record ID cannot be empty".to_string(),
            });
        }

        if id.len() > MAX_RECORD_ID_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "record_id",
                value: id.clone(),
                reason: format!(
                    "Record ID too long: {} chars (max {})",
                    id.len(),
                    MAX_RECORD_ID_LEN
                ),
            });
        }

        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "record_id",
                value: id,
                reason: "Record ID must not contain whitespace or control characters"
                    .to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RecordId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Opaque, comparable marker for a point-in-time state of a record or dataset.
///
/// Backends assign these monotonically: a snapshot cycle number, a log offset,
/// or a per-write revision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionToken(u64);

impl VersionToken {
    /// Version of a backend that has never accepted a publish.
    pub const ZERO: VersionToken = VersionToken(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The token immediately after this one.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for VersionToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Small structured value carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub name: String,
    pub active: bool,
}

impl Payload {
    pub fn new(name: impl Into<String>, active: bool) -> Self {
        Self {
            name: name.into(),
            active,
        }
    }
}

/// A record: stable identity plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub payload: Payload,
}

impl Record {
    pub fn new(id: RecordId, payload: Payload) -> Self {
        Self { id, payload }
    }
}

/// A record as observed by a reader, tagged with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub record: Record,
    pub version: VersionToken,
}

/// Handle returned by `publish`, used to wait for visibility.
///
/// Carries the version assigned to the publish and the identities written
/// under it, in write order. The last identity was written at `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityToken {
    pub version: VersionToken,
    pub ids: Vec<RecordId>,
}

impl VisibilityToken {
    pub fn new(version: VersionToken, ids: Vec<RecordId>) -> Self {
        Self { version, ids }
    }

    /// Whether the publish carried no records.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The four backend categories the harness knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Whole-dataset snapshots with an announced version pointer.
    SnapshotStore,
    /// Append-only log with a continuously materialized view.
    LogView,
    /// Distributed map fronted by a near cache.
    DistributedMap,
    /// Remote key-value store with client-side tracking.
    TrackedKv,
}

impl BackendKind {
    /// Get the kind name for reports and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SnapshotStore => "snapshot_store",
            Self::LogView => "log_view",
            Self::DistributedMap => "distributed_map",
            Self::TrackedKv => "tracked_kv",
        }
    }

    /// Whether reads for this kind go through an invalidation-tracked local cache.
    pub const fn uses_local_cache(&self) -> bool {
        !matches!(self, Self::LogView)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_record_id() {
        let id = RecordId::new("user-42").unwrap();
        assert_eq!(id.as_str(), "user-42");
    }

    #[test]
    fn test_invalid_record_id_empty() {
        assert!(RecordId::new("").is_err());
    }

    #[test]
    fn test_invalid_record_id_whitespace() {
        assert!(RecordId::new("user 42").is_err());
        assert!(RecordId::new("user\n42").is_err());
    }

    #[test]
    fn test_invalid_record_id_too_long() {
        assert!(RecordId::new("a".repeat(129)).is_err());
        assert!(RecordId::new("a".repeat(128)).is_ok());
    }

    #[test]
    fn test_record_id_serde_rejects_invalid() {
        let parsed: Result<RecordId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v1 = VersionToken::new(1);
        assert!(v1.next() > v1);
        assert!(VersionToken::ZERO < v1);
        assert_eq!(v1.to_string(), "v1");
    }

    #[test]
    fn test_backend_kind_names() {
        assert_eq!(BackendKind::TrackedKv.to_string(), "tracked_kv");
        assert!(!BackendKind::LogView.uses_local_cache());
        assert!(BackendKind::DistributedMap.uses_local_cache());
    }
}
