// PolyStore - Root library module
//
// A provider-agnostic key/value-document storage abstraction. Application code talks
// to a single `Provider` trait; concrete back-ends implement it identically with
// respect to the filter/sort/paginate semantics in `query`.

pub mod contracts;
pub mod error;
pub mod factory;
pub mod lock;
pub mod observability;
pub mod providers;
pub mod query;
pub mod types;
pub mod validation;

#[cfg(feature = "git-sync")]
pub mod git;

// Re-export key types
pub use observability::{init_logging, init_logging_with_level};

pub use contracts::{Document, FilterCondition, Operator, Provider, QueryOptions, SortDirection};

pub use types::{ValidatedCollectionName, ValidatedDocumentId};

pub use error::{Result, StoreError};

pub use factory::{create_provider, ProviderConfig};

// Re-export provider implementations
pub use providers::file::FileProvider;
pub use providers::memory::MemoryProvider;
pub use providers::relational::RelationalProvider;

#[cfg(feature = "git-sync")]
pub use providers::git_sync::{ConflictStrategy, GitSyncProvider};
