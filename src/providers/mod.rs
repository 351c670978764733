pub mod file;
pub mod memory;
pub mod relational;

#[cfg(feature = "git-sync")]
pub mod git_sync;
