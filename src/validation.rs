// Argument validation shared by every provider: collection names, document
// identifiers, and connection-state preconditions.

use crate::error::{Result, StoreError};

/// Reject empty (after trimming) strings and anything containing a path separator,
/// so no caller-supplied name or id can be used to escape a provider's storage root.
fn validate_no_path_separators(value: &str, kind: &str) -> Result<()> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(StoreError::validation(format!("{kind} cannot be empty")));
    }

    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(StoreError::validation(format!(
            "{kind} '{trimmed}' must not contain path separators"
        )));
    }

    Ok(())
}

pub fn validate_collection_name(name: &str) -> Result<()> {
    validate_no_path_separators(name, "collection name")
}

pub fn validate_id(id: &str) -> Result<()> {
    validate_no_path_separators(id, "document id")
}

/// Every data operation requires `Connected`; callers check this before touching
/// the storage medium so a disconnected provider fails fast with a clear error.
pub fn validate_connected(connected: bool) -> Result<()> {
    if !connected {
        return Err(StoreError::connection(
            "provider is not connected; call connect() first",
        ));
    }
    Ok(())
}
