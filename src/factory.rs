//! Selects a provider implementation from a configuration value.
//!
//! `ProviderConfig` mirrors the `type`-tagged configuration records of the
//! external interface: deserializing a JSON (or any serde) document with a
//! `type` field selects the variant, and `create_provider` turns it into a
//! boxed, not-yet-connected [`Provider`]. The three external-driver types
//! (`document`, `object-store`, `browser-db`) are recognised for their shape
//! but rejected at construction time, since no concrete driver ships here.

use crate::contracts::Provider;
use crate::error::{Result, StoreError};
use crate::providers::file::FileProviderConfig;
use crate::providers::relational::RelationalProviderConfig;
use crate::providers::{file::FileProvider, memory::MemoryProvider, relational::RelationalProvider};
use serde::Deserialize;
use std::path::PathBuf;

#[cfg(feature = "git-sync")]
use crate::providers::git_sync::{ConflictStrategy, GitSyncConfig, GitSyncProvider, SyncOptions};

/// A provider configuration record, tagged on `type` exactly as the external
/// configuration shapes describe.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderConfig {
    Memory,
    JsonFile(FileProviderConfig),
    Relational(RelationalProviderConfig),
    Document(ExternalDriverConfig),
    ObjectStore(ExternalDriverConfig),
    BrowserDb(ExternalDriverConfig),
    GitSync(GitSyncProviderConfig),
}

/// Placeholder shape for the external-driver types: accepted and validated,
/// never connected to a real backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalDriverConfig {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitSyncProviderConfig {
    pub repository_path: PathBuf,
    #[serde(default)]
    pub sync_options: GitSyncOptionsConfig,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategyConfig,
    pub inner: Box<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitSyncOptionsConfig {
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default)]
    pub author: AuthorConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorConfig {
    #[serde(default = "default_author_name")]
    pub name: String,
    #[serde(default = "default_author_email")]
    pub email: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_author_name() -> String {
    "PolyStore".to_string()
}

fn default_author_email() -> String {
    "polystore@localhost".to_string()
}

impl Default for GitSyncOptionsConfig {
    fn default() -> Self {
        Self {
            remote: None,
            branch: default_branch(),
            interval_secs: 0,
            auto_commit: true,
            auto_sync: false,
            author: AuthorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategyConfig {
    AcceptLocal,
    AcceptRemote,
    #[default]
    Merge,
}

#[cfg(feature = "git-sync")]
impl From<ConflictStrategyConfig> for ConflictStrategy {
    fn from(value: ConflictStrategyConfig) -> Self {
        match value {
            ConflictStrategyConfig::AcceptLocal => ConflictStrategy::AcceptLocal,
            ConflictStrategyConfig::AcceptRemote => ConflictStrategy::AcceptRemote,
            ConflictStrategyConfig::Merge => ConflictStrategy::Merge,
        }
    }
}

fn external_driver_rejection(kind: &str) -> StoreError {
    StoreError::configuration(format!(
        "provider type '{kind}' is an external-driver interface expectation; \
         the concrete driver is not bundled in this crate"
    ))
}

fn object_store_rejection() -> StoreError {
    StoreError::configuration(
        "provider type 'object-store' is an external-driver interface expectation; \
         the concrete driver is not bundled in this crate. Note for a future driver author: \
         a naive implementation that loads an entire collection into memory to satisfy `query` \
         will not scale against a real object store",
    )
}

/// Construct a boxed, not-yet-connected provider from `config`. Callers still
/// call `connect()` themselves; the factory only selects and wires up the
/// implementation.
pub fn create_provider(config: ProviderConfig) -> Result<Box<dyn Provider>> {
    match config {
        ProviderConfig::Memory => Ok(Box::new(MemoryProvider::new())),
        ProviderConfig::JsonFile(cfg) => Ok(Box::new(FileProvider::new(cfg))),
        ProviderConfig::Relational(cfg) => Ok(Box::new(RelationalProvider::new(cfg))),
        ProviderConfig::Document(_) => Err(external_driver_rejection("document")),
        ProviderConfig::ObjectStore(_) => Err(object_store_rejection()),
        ProviderConfig::BrowserDb(_) => Err(external_driver_rejection("browser-db")),
        #[cfg(feature = "git-sync")]
        ProviderConfig::GitSync(cfg) => {
            let inner = create_provider(*cfg.inner)?;
            let sync_options = SyncOptions {
                remote: cfg.sync_options.remote,
                branch: cfg.sync_options.branch,
                interval_secs: cfg.sync_options.interval_secs,
                auto_commit: cfg.sync_options.auto_commit,
                auto_sync: cfg.sync_options.auto_sync,
                author_name: cfg.sync_options.author.name,
                author_email: cfg.sync_options.author.email,
            };
            let git_config = GitSyncConfig {
                repository_path: cfg.repository_path,
                sync_options,
                conflict_strategy: cfg.conflict_strategy.into(),
            };
            Ok(Box::new(GitSyncProvider::new(git_config, inner)))
        }
        #[cfg(not(feature = "git-sync"))]
        ProviderConfig::GitSync(_) => Err(StoreError::configuration(
            "provider type 'git-sync' requires the 'git-sync' feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_from_json() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({"type": "memory"})).unwrap();
        assert!(create_provider(config).is_ok());
    }

    #[test]
    fn json_file_from_json() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "type": "json-file",
            "directory_path": "/tmp/polystore-factory-test",
            "use_single_file": false,
            "pretty_print": true,
            "write_debounce_ms": 100
        }))
        .unwrap();
        assert!(create_provider(config).is_ok());
    }

    #[test]
    fn object_store_is_rejected_with_scale_caveat() {
        let config: ProviderConfig =
            serde_json::from_value(serde_json::json!({"type": "object-store"})).unwrap();
        let err = match create_provider(config) {
            Err(e) => e,
            Ok(_) => panic!("expected create_provider to return an error"),
        };
        assert!(err.to_string().contains("not bundled"));
    }

    #[test]
    fn document_is_rejected() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({"type": "document"})).unwrap();
        assert!(create_provider(config).is_err());
    }
}
