//! Git repository plumbing backing the Git-sync wrapper provider. Treated as a
//! black-box adapter around `git2` so the decorator in `providers::git_sync`
//! never touches the library directly.

mod repository;

pub use repository::{CommitInfo, GitBackend, MergeOutcome};
