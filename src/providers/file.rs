// The file provider (C5): an in-memory mirror of one or more collections,
// persisted out-of-band through a debounced write pipeline with per-target
// locking and atomic replace. Reads/writes/queries run entirely against the
// mirror; persistence never blocks a caller's operation.

use crate::contracts::{Document, Provider, QueryOptions};
use crate::error::{Result, StoreError};
use crate::lock::{FileLock, LockConfig};
use crate::query;
use crate::types::{ValidatedCollectionName, ValidatedDocumentId};
use crate::validation::validate_connected;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const AGGREGATE_KEY: &str = "__aggregate__";

#[derive(Debug, Clone, Deserialize)]
pub struct FileProviderConfig {
    pub directory_path: PathBuf,
    pub use_single_file: bool,
    pub pretty_print: bool,
    pub write_debounce_ms: u64,
}

impl Default for FileProviderConfig {
    fn default() -> Self {
        Self {
            directory_path: PathBuf::from("."),
            use_single_file: false,
            pretty_print: false,
            write_debounce_ms: 300,
        }
    }
}

type Collection = IndexMap<String, Document>;

pub struct FileProvider {
    config: FileProviderConfig,
    connected: bool,
    mirror: Arc<RwLock<HashMap<String, Collection>>>,
    dirty: Arc<Mutex<HashSet<String>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl FileProvider {
    pub fn new(config: FileProviderConfig) -> Self {
        Self {
            config,
            connected: false,
            mirror: Arc::new(RwLock::new(HashMap::new())),
            dirty: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn aggregate_path(&self) -> PathBuf {
        self.config.directory_path.join("database.json")
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.config.directory_path.join(format!("{collection}.json"))
    }

    /// Scan the configured directory (creating it if missing) and load every
    /// collection file into the mirror. A missing file is an empty mirror.
    async fn load(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.directory_path).await?;

        let mut mirror = self.mirror.write().await;
        mirror.clear();

        if self.config.use_single_file {
            let path = self.aggregate_path();
            if let Ok(bytes) = tokio::fs::read(&path).await {
                let root: Map<String, Value> = serde_json::from_slice(&bytes)?;
                for (collection, value) in root {
                    mirror.insert(collection, parse_collection(value)?);
                }
            }
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&self.config.directory_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(collection) = name.strip_suffix(".json") else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            let value: Value = serde_json::from_slice(&bytes)?;
            mirror.insert(collection.to_string(), parse_collection(value)?);
        }

        Ok(())
    }

    /// Schedule a debounced flush for `collection`, cancelling any timer
    /// already pending for the same target so repeated mutations coalesce.
    async fn mark_dirty(&self, collection: &str) {
        let key = if self.config.use_single_file {
            AGGREGATE_KEY.to_string()
        } else {
            collection.to_string()
        };

        self.dirty.lock().await.insert(collection.to_string());

        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.remove(&key) {
            handle.abort();
        }

        let mirror = self.mirror.clone();
        let dirty = self.dirty.clone();
        let debounce = Duration::from_millis(self.config.write_debounce_ms);
        let target = if self.config.use_single_file {
            self.aggregate_path()
        } else {
            self.collection_path(collection)
        };
        let use_single_file = self.config.use_single_file;
        let pretty_print = self.config.pretty_print;
        let key_for_task = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = flush(&mirror, &dirty, &target, use_single_file, pretty_print).await {
                warn!("debounced flush of {} failed: {e}", target.display());
            }
            let _ = key_for_task;
        });

        tasks.insert(key, handle);
    }

    /// Cancel all pending debounce timers and flush every dirty collection
    /// synchronously. Called from `disconnect`, the sole guaranteed flush point.
    async fn flush_all(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        drop(tasks);

        if self.config.use_single_file {
            flush(
                &self.mirror,
                &self.dirty,
                &self.aggregate_path(),
                true,
                self.config.pretty_print,
            )
            .await?;
            return Ok(());
        }

        let dirty_collections: Vec<String> = self.dirty.lock().await.iter().cloned().collect();
        for collection in dirty_collections {
            let target = self.collection_path(&collection);
            flush(
                &self.mirror,
                &self.dirty,
                &target,
                false,
                self.config.pretty_print,
            )
            .await?;
        }
        Ok(())
    }
}

fn parse_collection(value: Value) -> Result<Collection> {
    let Value::Object(map) = value else {
        return Ok(Collection::new());
    };
    let mut collection = Collection::new();
    for (id, doc_value) in map {
        let doc = Document::from_value(doc_value)
            .ok_or_else(|| StoreError::query(format!("stored document for '{id}' is not an object")))?;
        collection.insert(id, doc);
    }
    Ok(collection)
}

/// Write pipeline: acquire the per-target lock, serialise the current mirror
/// state (one collection, or the whole database in aggregate mode) to
/// `<target>.tmp`, then atomically rename onto `<target>`. Dirty flags for
/// whatever was actually persisted are cleared only after the rename succeeds.
async fn flush(
    mirror: &Arc<RwLock<HashMap<String, Collection>>>,
    dirty: &Arc<Mutex<HashSet<String>>>,
    target: &Path,
    use_single_file: bool,
    pretty_print: bool,
) -> Result<()> {
    let lock_config = LockConfig::default();
    let _lock = FileLock::acquire(target, &lock_config).await?;

    let body = {
        let mirror = mirror.read().await;
        if use_single_file {
            let mut root = Map::new();
            for (collection, docs) in mirror.iter() {
                root.insert(collection.clone(), collection_to_value(docs));
            }
            Value::Object(root)
        } else {
            let name = target
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            match mirror.get(name) {
                Some(docs) => collection_to_value(docs),
                None => Value::Object(Map::new()),
            }
        }
    };

    let bytes = if pretty_print {
        serde_json::to_vec_pretty(&body)?
    } else {
        serde_json::to_vec(&body)?
    };

    let mut tmp_path = target.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, target).await?;

    let mut dirty = dirty.lock().await;
    if use_single_file {
        dirty.clear();
    } else if let Some(name) = target.file_stem().and_then(|s| s.to_str()) {
        dirty.remove(name);
    }

    Ok(())
}

fn collection_to_value(docs: &Collection) -> Value {
    let mut map = Map::new();
    for (id, doc) in docs {
        map.insert(id.clone(), doc.clone().into_value());
    }
    Value::Object(map)
}

#[async_trait]
impl Provider for FileProvider {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            warn!("file provider already connected; connect() is a no-op");
            return Ok(());
        }
        self.load().await?;
        self.connected = true;
        debug!(
            directory = %self.config.directory_path.display(),
            "file provider connected"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            warn!("file provider already disconnected; disconnect() is a no-op");
            return Ok(());
        }
        self.flush_all().await?;
        self.connected = false;
        debug!("file provider disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn create(&mut self, collection: &str, mut document: Document) -> Result<Document> {
        validate_connected(self.connected)?;
        let collection_name = ValidatedCollectionName::new(collection)?;

        let id = match document.id() {
            Some(id) => ValidatedDocumentId::new(id)?.into_string(),
            None => {
                let generated = ValidatedDocumentId::generate();
                document.set_id(generated.as_str());
                generated.into_string()
            }
        };

        {
            let mut mirror = self.mirror.write().await;
            let bucket = mirror.entry(collection_name.as_str().to_string()).or_default();
            if bucket.contains_key(&id) {
                return Err(StoreError::query(format!(
                    "document '{id}' already exists in collection '{collection_name}'"
                )));
            }
            bucket.insert(id, document.deep_clone());
        }

        self.mark_dirty(collection_name.as_str()).await;
        Ok(document)
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let mirror = self.mirror.read().await;
        Ok(mirror
            .get(collection)
            .and_then(|bucket| bucket.get(id))
            .map(Document::deep_clone))
    }

    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        partial: Document,
    ) -> Result<Option<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let updated = {
            let mut mirror = self.mirror.write().await;
            let Some(bucket) = mirror.get_mut(collection) else {
                return Ok(None);
            };
            let Some(existing) = bucket.get_mut(id) else {
                return Ok(None);
            };
            existing.merge(&partial);
            existing.deep_clone()
        };

        self.mark_dirty(collection).await;
        Ok(Some(updated))
    }

    async fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let removed = {
            let mut mirror = self.mirror.write().await;
            mirror
                .get_mut(collection)
                .map(|bucket| bucket.shift_remove(id).is_some())
                .unwrap_or(false)
        };

        if removed {
            self.mark_dirty(collection).await;
        }
        Ok(removed)
    }

    async fn query(&self, collection: &str, options: QueryOptions) -> Result<Vec<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;

        let mirror = self.mirror.read().await;
        let items: Vec<Document> = mirror
            .get(collection)
            .map(|bucket| bucket.values().map(Document::deep_clone).collect())
            .unwrap_or_default();
        Ok(query::run_query(items, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config(dir: &Path) -> FileProviderConfig {
        FileProviderConfig {
            directory_path: dir.to_path_buf(),
            use_single_file: false,
            pretty_print: false,
            write_debounce_ms: 20,
        }
    }

    #[tokio::test]
    async fn durability_across_reconnect() {
        let dir = tempdir().unwrap();

        let mut provider = FileProvider::new(config(dir.path()));
        provider.connect().await.unwrap();
        let created = provider
            .create("items", Document::from_value(json!({"name": "a"})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        tokio::time::sleep(Duration::from_millis(60)).await;
        provider.disconnect().await.unwrap();

        let mut reopened = FileProvider::new(config(dir.path()));
        reopened.connect().await.unwrap();
        let read = reopened.read("items", &id).await.unwrap().unwrap();
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn disconnect_flushes_pending_writes() {
        let dir = tempdir().unwrap();
        let mut provider = FileProvider::new(FileProviderConfig {
            write_debounce_ms: 10_000,
            ..config(dir.path())
        });
        provider.connect().await.unwrap();
        let created = provider
            .create("items", Document::from_value(json!({"name": "a"})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        provider.disconnect().await.unwrap();

        let mut reopened = FileProvider::new(config(dir.path()));
        reopened.connect().await.unwrap();
        assert!(reopened.read("items", &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let dir = tempdir().unwrap();
        let mut provider = FileProvider::new(config(dir.path()));
        provider.connect().await.unwrap();
        provider
            .create(
                "items",
                Document::from_value(json!({"id": "fixed", "value": 1})).unwrap(),
            )
            .await
            .unwrap();

        let result = provider
            .create(
                "items",
                Document::from_value(json!({"id": "fixed", "value": 2})).unwrap(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn aggregate_layout_round_trips() {
        let dir = tempdir().unwrap();
        let agg_config = FileProviderConfig {
            use_single_file: true,
            ..config(dir.path())
        };

        let mut provider = FileProvider::new(agg_config.clone());
        provider.connect().await.unwrap();
        let created = provider
            .create("items", Document::from_value(json!({"name": "a"})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();
        tokio::time::sleep(Duration::from_millis(60)).await;
        provider.disconnect().await.unwrap();

        assert!(dir.path().join("database.json").exists());

        let mut reopened = FileProvider::new(agg_config);
        reopened.connect().await.unwrap();
        assert!(reopened.read("items", &id).await.unwrap().is_some());
    }
}
