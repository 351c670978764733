// A small adapter around `git2` exposing just the operations the Git-sync
// wrapper needs: init-or-open, author configuration, commit, fetch/merge,
// history, checkout, and hard reset. Kept deliberately narrow so an alternate
// implementation (e.g. shelling out to the `git` binary) could stand in without
// changing `providers::git_sync`.

use crate::error::{Result, StoreError};
use git2::{
    build::CheckoutBuilder, IndexAddOption, ObjectType, Repository, ResetType, Signature,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp_secs: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    FastForwarded,
    Diverged,
}

pub struct GitBackend {
    repo: Repository,
    path: PathBuf,
    author_name: String,
    author_email: String,
    branch: String,
}

impl GitBackend {
    /// Ensure `path` exists and is a Git repository on `branch`. Initialises a
    /// fresh repository with an initial commit if none exists.
    pub fn init_or_open(
        path: &Path,
        branch: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => Repository::init(path)?,
        };

        {
            let mut config = repo.config()?;
            config.set_str("user.name", author_name)?;
            config.set_str("user.email", author_email)?;
        }

        let mut backend = Self {
            repo,
            path: path.to_path_buf(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
            branch: branch.to_string(),
        };

        if backend.repo.head().is_err() {
            backend.create_initial_commit()?;
        }

        backend.ensure_branch_checked_out(branch)?;
        Ok(backend)
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Signature::now(&self.author_name, &self.author_email).map_err(StoreError::from)
    }

    fn create_initial_commit(&self) -> Result<()> {
        let readme = self.path.join("README.md");
        if !readme.exists() {
            std::fs::write(&readme, "# Data repository\n\nManaged by the Git-sync provider.\n")?;
        }

        let mut index = self.repo.index()?;
        index.add_path(Path::new("README.md"))?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        self.repo
            .commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])?;
        info!("created initial commit in {}", self.path.display());
        Ok(())
    }

    fn ensure_branch_checked_out(&mut self, branch: &str) -> Result<()> {
        let full_ref = format!("refs/heads/{branch}");
        if self.repo.find_branch(branch, git2::BranchType::Local).is_err() {
            let head_commit = self.repo.head()?.peel_to_commit()?;
            self.repo.branch(branch, &head_commit, false)?;
        }
        self.repo.set_head(&full_ref)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        self.branch = branch.to_string();
        Ok(())
    }

    /// `true` if the working tree differs from the last commit.
    pub fn is_dirty(&self) -> Result<bool> {
        let statuses = self.repo.statuses(None)?;
        Ok(!statuses.is_empty())
    }

    /// Stage everything and commit. Returns `None` if there was nothing to
    /// commit (working tree matched HEAD).
    pub fn add_all_and_commit(&self, message: &str) -> Result<Option<String>> {
        if !self.is_dirty()? {
            return Ok(None);
        }

        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;
        let parent = self.repo.head()?.peel_to_commit()?;

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;
        debug!("committed {} to {}", oid, self.path.display());
        Ok(Some(oid.to_string()))
    }

    /// Fetch `remote` and fast-forward the current branch when possible.
    /// Returns `Diverged` when the remote moved in a way that isn't a
    /// fast-forward, leaving the working tree untouched for the caller's
    /// conflict strategy to resolve.
    pub fn fetch_and_merge(&self, remote_name: &str) -> Result<MergeOutcome> {
        let mut remote = match self.repo.find_remote(remote_name) {
            Ok(remote) => remote,
            Err(_) => return Ok(MergeOutcome::UpToDate),
        };

        if let Err(e) = remote.fetch(&[self.branch.as_str()], None, None) {
            warn!("fetch from '{remote_name}' failed: {e}");
            return Ok(MergeOutcome::UpToDate);
        }

        let remote_ref = format!("refs/remotes/{remote_name}/{}", self.branch);
        let Ok(remote_commit) = self.repo.find_reference(&remote_ref).and_then(|r| r.peel_to_commit()) else {
            return Ok(MergeOutcome::UpToDate);
        };
        let remote_annotated = self.repo.find_annotated_commit(remote_commit.id())?;

        let (analysis, _) = self.repo.merge_analysis(&[&remote_annotated])?;
        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }
        if analysis.is_fast_forward() {
            let branch_ref_name = format!("refs/heads/{}", self.branch);
            let mut branch_ref = self.repo.find_reference(&branch_ref_name)?;
            branch_ref.set_target(remote_commit.id(), "fast-forward merge")?;
            self.repo.set_head(&branch_ref_name)?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
            return Ok(MergeOutcome::FastForwarded);
        }

        Ok(MergeOutcome::Diverged)
    }

    /// Push the current branch to `remote_name`. Failures are reported as
    /// `Sync` errors rather than propagating a raw `git2` error.
    pub fn push(&self, remote_name: &str) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .map_err(|e| StoreError::sync(format!("remote '{remote_name}' not configured: {e}")))?;
        let refspec = format!("refs/heads/{}:refs/heads/{}", self.branch, self.branch);
        remote
            .push(&[refspec.as_str()], None)
            .map_err(|e| StoreError::sync(format!("push to '{remote_name}' failed: {e}")))
    }

    /// Hard-reset the working tree and branch to `reference` (a commit hash or
    /// ref name such as `<remote>/<branch>`).
    pub fn reset_hard(&self, reference: &str) -> Result<()> {
        let obj = self.repo.revparse_single(reference)?;
        self.repo
            .reset(&obj, ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    /// Read the JSON blob at `path` in `tree`, if any.
    fn blob_at<'a>(&self, tree: &git2::Tree<'a>, path: &str) -> Result<Option<Value>> {
        let Ok(entry) = tree.get_path(Path::new(path)) else {
            return Ok(None);
        };
        let object = entry.to_object(&self.repo)?;
        let Some(blob) = object.as_blob() else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(blob.content()).ok())
    }

    /// Commits whose collection file at `path` (e.g. `<collection>.json`)
    /// changed the entry for `id`, newest first. A collection file stores
    /// `{<id>: <document>, ...}`, so "changed" means the value under `id`
    /// differs between a commit and its parent (or is present in a
    /// parentless initial commit).
    pub fn log_for_document(&self, path: &str, id: &str) -> Result<Vec<CommitInfo>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let tree = commit.tree()?;
            let current = self.blob_at(&tree, path)?.and_then(|root| root.get(id).cloned());

            let touches = if commit.parent_count() == 0 {
                current.is_some()
            } else {
                let parent_tree = commit.parent(0)?.tree()?;
                let previous = self.blob_at(&parent_tree, path)?.and_then(|root| root.get(id).cloned());
                current != previous
            };

            if touches {
                let author = commit.author();
                commits.push(CommitInfo {
                    hash: oid.to_string(),
                    message: commit.message().unwrap_or("").to_string(),
                    author_name: author.name().unwrap_or("unknown").to_string(),
                    author_email: author.email().unwrap_or("").to_string(),
                    timestamp_secs: commit.time().seconds(),
                });
            }
        }

        Ok(commits)
    }

    /// Checkout `hash` (detached HEAD) and return the branch name to restore.
    pub fn checkout_commit(&self, hash: &str) -> Result<String> {
        let current_branch = self.branch.clone();
        let obj = self.repo.revparse_single(hash)?;
        let commit = obj.peel(ObjectType::Commit)?;
        self.repo
            .checkout_tree(&commit, Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head_detached(commit.id())?;
        Ok(current_branch)
    }

    /// Restore `branch` as HEAD after a `checkout_commit` excursion.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        let full_ref = format!("refs/heads/{branch}");
        self.repo.set_head(&full_ref)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_initial_commit() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::init_or_open(dir.path(), "main", "Test", "test@example.com").unwrap();
        assert!(!backend.is_dirty().unwrap());
    }

    #[test]
    fn commit_and_log() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::init_or_open(dir.path(), "main", "Test", "test@example.com").unwrap();

        std::fs::write(dir.path().join("items.json"), r#"{"doc1": {"id": "doc1"}}"#).unwrap();
        backend.add_all_and_commit("create doc1").unwrap();

        std::fs::write(dir.path().join("items.json"), r#"{"doc1": {"id": "doc1", "a": 1}}"#).unwrap();
        backend.add_all_and_commit("update doc1").unwrap();

        let history = backend.log_for_document("items.json", "doc1").unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn log_for_document_ignores_unrelated_entries() {
        let dir = tempdir().unwrap();
        let backend = GitBackend::init_or_open(dir.path(), "main", "Test", "test@example.com").unwrap();

        std::fs::write(dir.path().join("items.json"), r#"{"doc1": {"id": "doc1"}}"#).unwrap();
        backend.add_all_and_commit("create doc1").unwrap();

        std::fs::write(
            dir.path().join("items.json"),
            r#"{"doc1": {"id": "doc1"}, "doc2": {"id": "doc2"}}"#,
        )
        .unwrap();
        backend.add_all_and_commit("create doc2").unwrap();

        let history = backend.log_for_document("items.json", "doc1").unwrap();
        assert_eq!(history.len(), 1);
    }
}
