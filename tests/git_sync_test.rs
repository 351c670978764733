// Scenario 8: wrapping a provider in the Git-sync decorator grows a commit
// history as the wrapped collection mutates.

#![cfg(feature = "git-sync")]

use polystore::providers::file::{FileProvider, FileProviderConfig};
use polystore::{ConflictStrategy, Document, GitSyncProvider, Provider};
use serde_json::json;
use tempfile::tempdir;

#[tokio::test]
async fn git_sync_history_grows_with_mutations_and_matches_author() {
    let dir = tempdir().unwrap();
    let inner = Box::new(FileProvider::new(FileProviderConfig {
        directory_path: dir.path().to_path_buf(),
        use_single_file: false,
        pretty_print: false,
        write_debounce_ms: 5,
    }));

    let config = polystore::providers::git_sync::GitSyncConfig {
        repository_path: dir.path().to_path_buf(),
        sync_options: polystore::providers::git_sync::SyncOptions {
            author_name: "Scenario Author".to_string(),
            author_email: "scenario@example.com".to_string(),
            ..Default::default()
        },
        conflict_strategy: ConflictStrategy::Merge,
    };

    let mut provider = GitSyncProvider::new(config, inner);
    provider.connect().await.unwrap();

    let created = provider
        .create("items", Document::from_value(json!({"value": 1})).unwrap())
        .await
        .unwrap();
    let id = created.id().unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    provider
        .update("items", &id, Document::from_value(json!({"value": 2})).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    provider
        .update("items", &id, Document::from_value(json!({"value": 3})).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let history = provider.get_history("items", &id).await.unwrap();
    assert!(history.len() >= 3);
    for commit in &history {
        assert_eq!(commit.author_name, "Scenario Author");
        assert_eq!(commit.author_email, "scenario@example.com");
    }

    // Newest first.
    for window in history.windows(2) {
        assert!(window[0].timestamp_secs >= window[1].timestamp_secs);
    }
}
