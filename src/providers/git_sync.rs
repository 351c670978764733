// The Git-sync wrapper (C7): a decorator that versions and synchronises an
// inner provider through a Git repository. All mutable state (the git backend,
// the inner provider, and the dirty set) lives behind one async mutex so the
// periodic background sync task and the `Provider` methods never race each
// other; `git2::Repository` itself tolerates only one caller at a time anyway.

use crate::contracts::{Document, IndexDefinition, Provider, QueryOptions, SchemaDefinition};
use crate::error::{Result, StoreError};
use crate::git::{CommitInfo, GitBackend, MergeOutcome};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    AcceptLocal,
    AcceptRemote,
    Merge,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub remote: Option<String>,
    pub branch: String,
    pub interval_secs: u64,
    pub auto_commit: bool,
    pub auto_sync: bool,
    pub author_name: String,
    pub author_email: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            remote: None,
            branch: "main".to_string(),
            interval_secs: 0,
            auto_commit: true,
            auto_sync: false,
            author_name: "PolyStore".to_string(),
            author_email: "polystore@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitSyncConfig {
    pub repository_path: PathBuf,
    pub sync_options: SyncOptions,
    pub conflict_strategy: ConflictStrategy,
}

/// Everything that exists only once connected. Absent (`None` on the
/// surrounding `backend` field) before the first `connect`.
struct State {
    backend: Option<GitBackend>,
    inner: Box<dyn Provider>,
    dirty: HashSet<String>,
    pending_conflict: bool,
}

impl State {
    fn backend(&self) -> Result<&GitBackend> {
        self.backend.as_ref().ok_or_else(not_connected)
    }
}

pub struct GitSyncProvider {
    config: GitSyncConfig,
    state: Arc<Mutex<State>>,
    sync_task: Option<JoinHandle<()>>,
}

impl GitSyncProvider {
    pub fn new(config: GitSyncConfig, inner: Box<dyn Provider>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State {
                backend: None,
                inner,
                dirty: HashSet::new(),
                pending_conflict: false,
            })),
            sync_task: None,
        }
    }

    /// Commit dirty state immediately, bypassing auto-commit gating. Exposed as
    /// an explicit flush point per the disconnect-discipline design note.
    pub async fn commit_now(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        commit_dirty(&mut state, &self.config.sync_options)?;
        Ok(())
    }

    /// Pull then push immediately, applying the configured conflict strategy on
    /// divergence. Used both by the periodic timer and as an explicit flush
    /// point.
    pub async fn sync_now(&self) -> Result<()> {
        run_sync_cycle(&self.state, &self.config).await
    }

    /// Manually resolve a pending `merge` conflict raised by the periodic sync.
    pub async fn resolve_conflicts(&self, strategy: ConflictStrategy) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.pending_conflict {
            return Ok(());
        }
        apply_conflict_strategy(&mut state, &self.config, strategy).await?;
        state.pending_conflict = false;
        Ok(())
    }

    /// History of `id`'s entry within `collection`'s committed file. The file
    /// provider stores each collection as `{<id>: <document>, ...}` in a
    /// single `<collection>.json`, so this diffs that file's JSON content
    /// between commits rather than looking for a per-document path. Assumes
    /// the wrapped provider uses the split (one file per collection) layout;
    /// an inner provider configured for the aggregate `database.json` layout
    /// is not addressed by this path today.
    pub async fn get_history(&self, collection: &str, id: &str) -> Result<Vec<CommitInfo>> {
        let state = self.state.lock().await;
        let path = format!("{collection}.json");
        state.backend()?.log_for_document(&path, id)
    }

    /// Check out `hash`, read through the inner provider, then restore the
    /// prior branch on every exit path.
    pub async fn get_version(
        &self,
        collection: &str,
        id: &str,
        hash: &str,
    ) -> Result<Option<Document>> {
        let mut state = self.state.lock().await;

        let previous_branch = state.backend()?.checkout_commit(hash)?;
        state.inner.disconnect().await?;
        state.inner.connect().await?;
        let result = state.inner.read(collection, id).await;

        let restore = state.backend()?.checkout_branch(&previous_branch);
        state.inner.disconnect().await?;
        state.inner.connect().await?;
        restore?;

        result
    }

    pub async fn revert_to(&self, hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.backend()?.is_dirty()? {
            return Err(StoreError::sync(
                "revert_to requires a clean working tree; commit or discard pending changes first",
            ));
        }
        state.backend()?.reset_hard(hash)?;
        state.inner.disconnect().await?;
        state.inner.connect().await?;
        Ok(())
    }
}

fn not_connected() -> StoreError {
    StoreError::connection("git-sync provider is not connected")
}

fn commit_dirty(state: &mut State, sync_options: &SyncOptions) -> Result<()> {
    if !sync_options.auto_commit || state.dirty.is_empty() {
        return Ok(());
    }
    let Some(backend) = state.backend.as_ref() else {
        return Ok(());
    };
    let summary = state.dirty.iter().cloned().collect::<Vec<_>>().join(", ");
    let message = format!("update: {summary}");
    backend.add_all_and_commit(&message)?;
    state.dirty.clear();
    Ok(())
}

async fn run_sync_cycle(state_arc: &Arc<Mutex<State>>, config: &GitSyncConfig) -> Result<()> {
    let mut state = state_arc.lock().await;
    commit_dirty(&mut state, &config.sync_options)?;

    let Some(remote) = config.sync_options.remote.clone() else {
        return Ok(());
    };

    let outcome = state.backend()?.fetch_and_merge(&remote)?;
    match outcome {
        MergeOutcome::UpToDate | MergeOutcome::FastForwarded => {}
        MergeOutcome::Diverged => match config.conflict_strategy {
            ConflictStrategy::Merge => {
                state.pending_conflict = true;
                return Err(StoreError::merge_conflict(
                    "remote has diverged; call resolve_conflicts() to pick a strategy",
                ));
            }
            strategy => apply_conflict_strategy(&mut state, config, strategy).await?,
        },
    }

    if let Err(e) = state.backend()?.push(&remote) {
        warn!("push to '{remote}' failed: {e}");
    }

    Ok(())
}

async fn apply_conflict_strategy(
    state: &mut State,
    config: &GitSyncConfig,
    strategy: ConflictStrategy,
) -> Result<()> {
    match strategy {
        ConflictStrategy::AcceptLocal => {
            state.backend()?.reset_hard("HEAD")?;
        }
        ConflictStrategy::AcceptRemote => {
            let Some(remote) = &config.sync_options.remote else {
                return Err(StoreError::configuration(
                    "accept-remote conflict strategy requires a configured remote",
                ));
            };
            let remote_ref = format!("{remote}/{}", config.sync_options.branch);
            state.backend()?.reset_hard(&remote_ref)?;
            state.inner.disconnect().await?;
            state.inner.connect().await?;
        }
        ConflictStrategy::Merge => {
            state.pending_conflict = true;
            return Err(StoreError::merge_conflict(
                "remote has diverged; call resolve_conflicts() to pick a strategy",
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl Provider for GitSyncProvider {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.backend.is_some() {
            warn!("git-sync provider already connected; connect() is a no-op");
            return Ok(());
        }

        let backend = GitBackend::init_or_open(
            &self.config.repository_path,
            &self.config.sync_options.branch,
            &self.config.sync_options.author_name,
            &self.config.sync_options.author_email,
        )?;
        state.backend = Some(backend);
        state.inner.connect().await?;

        if let Some(remote) = self.config.sync_options.remote.clone() {
            if self.config.sync_options.auto_sync {
                if let Err(e) = state.backend()?.fetch_and_merge(&remote) {
                    warn!("initial sync with '{remote}' failed: {e}");
                }
            }
        }
        drop(state);

        if self.config.sync_options.interval_secs > 0 && self.config.sync_options.auto_sync {
            let state_arc = self.state.clone();
            let config = self.config.clone();
            let interval = Duration::from_secs(self.config.sync_options.interval_secs);
            self.sync_task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if let Err(e) = run_sync_cycle(&state_arc, &config).await {
                        warn!("periodic git sync failed: {e}");
                    }
                }
            }));
        }

        info!(
            "git-sync provider connected at {}",
            self.config.repository_path.display()
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(handle) = self.sync_task.take() {
            handle.abort();
        }

        let mut state = self.state.lock().await;
        if state.backend.is_none() {
            warn!("git-sync provider already disconnected; disconnect() is a no-op");
            return Ok(());
        }

        let commit_result = commit_dirty(&mut state, &self.config.sync_options);
        let sync_result = if self.config.sync_options.auto_sync {
            match (&self.config.sync_options.remote, state.backend.as_ref()) {
                (Some(remote), Some(backend)) => backend.push(remote),
                _ => Ok(()),
            }
        } else {
            Ok(())
        };

        // Inner-provider closure happens even if commit/sync failed above.
        let disconnect_result = state.inner.disconnect().await;
        state.backend = None;

        commit_result?;
        if let Err(e) = sync_result {
            warn!("best-effort sync on disconnect failed: {e}");
        }
        disconnect_result
    }

    async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state.backend.is_some() && state.inner.is_connected().await
    }

    async fn create(&mut self, collection: &str, document: Document) -> Result<Document> {
        let mut state = self.pre_mutate().await?;
        let result = state.inner.create(collection, document).await?;
        self.post_mutate(state, collection).await?;
        Ok(result)
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let state = self.state.lock().await;
        state.inner.read(collection, id).await
    }

    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        partial: Document,
    ) -> Result<Option<Document>> {
        let mut state = self.pre_mutate().await?;
        let result = state.inner.update(collection, id, partial).await?;
        self.post_mutate(state, collection).await?;
        Ok(result)
    }

    async fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        let mut state = self.pre_mutate().await?;
        let result = state.inner.delete(collection, id).await?;
        self.post_mutate(state, collection).await?;
        Ok(result)
    }

    async fn query(&self, collection: &str, options: QueryOptions) -> Result<Vec<Document>> {
        let state = self.state.lock().await;
        state.inner.query(collection, options).await
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.inner.begin_transaction().await
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.pre_mutate().await?;
        state.inner.commit().await?;
        self.post_mutate(state, "transaction").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.inner.rollback().await
    }

    async fn ensure_schema(&mut self, collection: &str, def: Option<SchemaDefinition>) -> Result<()> {
        let mut state = self.pre_mutate().await?;
        state.inner.ensure_schema(collection, def).await?;
        self.post_mutate(state, collection).await?;
        Ok(())
    }

    async fn ensure_index(&mut self, collection: &str, def: IndexDefinition) -> Result<()> {
        let mut state = self.pre_mutate().await?;
        state.inner.ensure_index(collection, def).await?;
        self.post_mutate(state, collection).await?;
        Ok(())
    }
}

impl GitSyncProvider {
    /// The mutation path's pre-step: lock the shared state and, if auto-sync is
    /// on, fetch and attempt a fast-forward merge so incoming conflicts are
    /// visible before the inner provider is touched.
    async fn pre_mutate(&self) -> Result<tokio::sync::MutexGuard<'_, State>> {
        let state = self.state.lock().await;
        if state.backend.is_none() {
            return Err(not_connected());
        }

        if self.config.sync_options.auto_sync {
            if let Some(remote) = self.config.sync_options.remote.clone() {
                if let Err(e) = state.backend()?.fetch_and_merge(&remote) {
                    warn!("pre-operation sync with '{remote}' failed: {e}");
                }
            }
        }

        Ok(state)
    }

    /// The mutation path's post-step: mark `collection` dirty and, if
    /// auto-commit is on, stage and commit.
    async fn post_mutate<'a>(
        &self,
        mut state: tokio::sync::MutexGuard<'a, State>,
        collection: &str,
    ) -> Result<()> {
        state.dirty.insert(collection.to_string());
        commit_dirty(&mut state, &self.config.sync_options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::file::{FileProvider, FileProviderConfig};
    use serde_json::json;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> GitSyncConfig {
        GitSyncConfig {
            repository_path: dir.to_path_buf(),
            sync_options: SyncOptions {
                auto_commit: true,
                branch: "main".to_string(),
                ..SyncOptions::default()
            },
            conflict_strategy: ConflictStrategy::Merge,
        }
    }

    fn inner_provider(dir: &std::path::Path) -> Box<dyn Provider> {
        Box::new(FileProvider::new(FileProviderConfig {
            directory_path: dir.to_path_buf(),
            use_single_file: false,
            pretty_print: false,
            write_debounce_ms: 5,
        }))
    }

    #[tokio::test]
    async fn history_grows_with_mutations() {
        let dir = tempdir().unwrap();
        let mut provider = GitSyncProvider::new(config(dir.path()), inner_provider(dir.path()));
        provider.connect().await.unwrap();

        let created = provider
            .create("items", Document::from_value(json!({"value": 1})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        tokio::time::sleep(Duration::from_millis(30)).await;
        provider
            .update("items", &id, Document::from_value(json!({"value": 2})).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        provider
            .update("items", &id, Document::from_value(json!({"value": 3})).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let history = provider.get_history("items", &id).await.unwrap();
        assert!(history.len() >= 3);
    }

    #[tokio::test]
    async fn disconnect_then_reconnect_preserves_history() {
        let dir = tempdir().unwrap();
        let mut provider = GitSyncProvider::new(config(dir.path()), inner_provider(dir.path()));
        provider.connect().await.unwrap();
        provider
            .create("items", Document::from_value(json!({"value": 1})).unwrap())
            .await
            .unwrap();
        provider.disconnect().await.unwrap();

        provider.connect().await.unwrap();
        let results = provider.query("items", QueryOptions::new()).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
