//! Operations submitted in a batch.
//!
//! The payload is opaque to the execution core; only the id, kind,
//! priority, and declared dependencies drive scheduling.

use crate::id::OperationId;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Operation kind - type of requested work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Read and inspect source
    Analyze,
    /// Mutate an existing file
    Edit,
    /// Create a new file
    Create,
    /// Remove a file
    Delete,
    /// Check a file against expectations
    Validate,
}

impl OperationKind {
    /// All kinds, in declaration order
    pub const ALL: [Self; 5] = [
        Self::Analyze,
        Self::Edit,
        Self::Create,
        Self::Delete,
        Self::Validate,
    ];

    /// Whether this kind changes files
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Edit | Self::Create | Self::Delete)
    }

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Edit => "edit",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Validate => "validate",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of requested work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique id within the batch
    #[serde(default)]
    pub id: OperationId,
    /// Kind of work
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Ids of operations that must finish first
    #[serde(default)]
    pub depends_on: IndexSet<OperationId>,
    /// Admission priority; higher runs first
    #[serde(default)]
    pub priority: i32,
    /// Kind-specific payload, opaque to the core
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Operation {
    /// Create an operation with no dependencies and an empty payload
    #[must_use]
    pub fn new(id: impl Into<OperationId>, kind: OperationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: IndexSet::new(),
            priority: 0,
            payload: serde_json::Value::Null,
        }
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<OperationId>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Set admission priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether this operation declares no dependencies
    #[must_use]
    pub fn is_independent(&self) -> bool {
        self.depends_on.is_empty()
    }
}
