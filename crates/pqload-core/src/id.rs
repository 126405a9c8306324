//! Strongly-typed identifiers.
//!
//! Each pipeline invocation gets an [`InvocationId`] so that log lines,
//! metrics and the acknowledgment returned to the trigger can be correlated.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// A unique identifier for one pipeline invocation.
///
/// ULID-based, so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Ulid);

impl InvocationId {
    /// Generates a new unique invocation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_display_string() {
        let id = InvocationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: InvocationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(InvocationId::generate(), InvocationId::generate());
    }

    #[test]
    fn malformed_id_fails_to_deserialize() {
        assert!(serde_json::from_str::<InvocationId>("\"not-a-valid-ulid\"").is_err());
    }
}
