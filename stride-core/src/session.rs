//! Session identifiers used for flag bucketing.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlagError;

/// Opaque identifier of the running UI session.
///
/// Generated IDs are v4 UUIDs drawn from the OS CSPRNG. IDs issued by the
/// session provider are accepted as-is as long as they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an externally issued session identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, FlagError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(FlagError::InvalidArgument {
                field: "session_id",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Generate a fresh session identifier from a secure random source.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
