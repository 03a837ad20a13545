//! Identifiers for STRATA entities.
//!
//! Operation ids are caller-assigned strings (generated when absent);
//! run ids are random UUIDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation identifier - unique within one submitted batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Create from a caller-assigned id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("op_{}", Uuid::new_v4().simple()))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::borrow::Borrow<str> for OperationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Run identifier - identifies a single engine invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_generate_unique() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("op_"));
    }

    #[test]
    fn test_operation_id_display() {
        let id = OperationId::new("edit-main");
        assert_eq!(format!("{}", id), "edit-main");
    }

    #[test]
    fn test_operation_id_serializes_as_plain_string() {
        let id = OperationId::from("a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a\"");
        let back: OperationId = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_run_id_display_prefix() {
        let run = RunId::new();
        assert!(run.to_string().starts_with("run_"));
    }

    #[test]
    fn test_run_id_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
