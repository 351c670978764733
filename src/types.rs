// Validated newtype wrappers that enforce naming invariants at construction time,
// so a `ValidatedCollectionName` or `ValidatedDocumentId` in hand is always safe to
// use as a path component or SQL identifier fragment.

use crate::error::Result;
use crate::validation::{validate_collection_name, validate_id};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A collection name that has passed validation: non-empty and free of path
/// separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedCollectionName {
    inner: String,
}

impl ValidatedCollectionName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let inner = name.into();
        validate_collection_name(&inner)?;
        Ok(Self { inner })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

/// A document identifier that has passed validation. Identifiers are opaque
/// strings, not necessarily UUIDs, since callers may supply their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidatedDocumentId {
    inner: String,
}

impl ValidatedDocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let inner = id.into();
        validate_id(&inner)?;
        Ok(Self { inner })
    }

    /// Generate a fresh identifier for a document created without one.
    pub fn generate() -> Self {
        Self {
            inner: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn into_string(self) -> String {
        self.inner
    }
}

impl fmt::Display for ValidatedDocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl AsRef<str> for ValidatedDocumentId {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}
