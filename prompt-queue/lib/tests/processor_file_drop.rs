//! End-to-end tests of the processor with the file-drop sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use prompt_queue_lib::{
    FileDropSink, JsonFileKv, QueueConfig, QueueItem, QueueProcessor, QueueStore, Sink,
    TerminalAction, parse_rate_limit_message,
};
use tempfile::tempdir;

#[tokio::test]
async fn due_items_become_files_and_are_marked_processed() {
    let workspace = tempdir().unwrap();
    let state = workspace.path().join("state.json");
    let sink = FileDropSink::from_config(&QueueConfig::default(), workspace.path().to_path_buf());
    let processor = QueueProcessor::new(QueueStore::new(JsonFileKv::new(state.clone())), sink);

    let ready = QueueItem::new("write the release notes", Utc::now() - Duration::seconds(5), "");
    let waiting = QueueItem::new("not yet", Utc::now() + Duration::hours(2), "");
    processor.store().add(ready.clone()).await.unwrap();
    processor.store().add(waiting.clone()).await.unwrap();

    let changes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&changes);
    processor.subscribe(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(processor.process().await.unwrap(), 1);
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    let out = workspace.path().join(".prompt-queue");
    let files: Vec<_> = std::fs::read_dir(&out).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with(&format!("_{}.md", ready.id)), "unexpected name {name}");
    let content = std::fs::read_to_string(&files[0]).unwrap();
    assert!(content.ends_with("write the release notes\n"));

    let reopened = QueueStore::new(JsonFileKv::new(state));
    assert_eq!(reopened.get_pending().await.unwrap(), vec![waiting]);
    assert_eq!(reopened.len().await.unwrap(), 2);

    assert_eq!(processor.process().await.unwrap(), 0);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remove_action_and_forced_delivery() {
    let workspace = tempdir().unwrap();
    let sink = FileDropSink::new(workspace.path().to_path_buf(), "drops", "{id}.md")
        .with_terminal_action(TerminalAction::Remove);
    let processor = QueueProcessor::new(
        QueueStore::new(JsonFileKv::new(workspace.path().join("state.json"))),
        sink,
    );

    let item = QueueItem::after_hours("later", 5.0, "");
    processor.store().add(item.clone()).await.unwrap();
    assert_eq!(processor.process().await.unwrap(), 0);

    processor.force_deliver(&item.id).await.unwrap();

    assert!(processor.store().is_empty().await.unwrap());
    let written = workspace.path().join("drops").join(format!("{}.md", item.id));
    assert!(written.exists());
}

#[tokio::test]
async fn failed_write_keeps_item_for_retry() {
    let workspace = tempdir().unwrap();
    std::fs::write(workspace.path().join("blocked"), "file in the way").unwrap();
    let config = QueueConfig::default().with_output_directory("blocked/out");
    let processor = QueueProcessor::new(
        QueueStore::new(JsonFileKv::new(workspace.path().join("state.json"))),
        Sink::from_config(&config, workspace.path().to_path_buf()),
    );

    let item = QueueItem::new("retry me", Utc::now() - Duration::minutes(1), "");
    processor.store().add(item.clone()).await.unwrap();

    let report = processor.process_report().await.unwrap();
    assert!(report.delivered.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(processor.store().get_pending().await.unwrap(), vec![item.clone()]);

    std::fs::remove_file(workspace.path().join("blocked")).unwrap();
    let report = processor.process_report().await.unwrap();
    assert_eq!(report.delivered, vec![item.id]);
}

#[tokio::test]
async fn rate_limit_message_schedules_item() {
    let info = parse_rate_limit_message("Rate limit exceeded. Try again in 4h 30m.").unwrap();
    assert!(info.delay_hours > 4.5 && info.delay_hours <= 5.0);

    let item = QueueItem::after_hours("pick up where we left off", info.delay_hours, "");
    assert!(item.not_before > Utc::now() + Duration::hours(4));
    assert!(!item.is_due(Utc::now()));
}
