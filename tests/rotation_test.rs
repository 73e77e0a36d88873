use frappe_otel::app::config::WatchConfig;
use frappe_otel::buffer::ExporterHandle;
use frappe_otel::collector::{LogSource, ServerMetadata, SourceWatcher, WatchContext, spawn_watchers};
use frappe_otel::domain::{LogRecord, ServiceIdentity, TelemetryItem};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn context(exporter: ExporterHandle) -> WatchContext {
    WatchContext {
        metadata: Arc::new(ServerMetadata {
            server_name: "bench-1".to_string(),
            host_name: "host-1".to_string(),
            public_ip: "unknown".to_string(),
            environment: "staging".to_string(),
        }),
        base_identity: ServiceIdentity {
            tenant: None,
            service_name: "frappe".to_string(),
            service_version: "15.2.0".to_string(),
            environment: "staging".to_string(),
        },
        exporter,
        config: WatchConfig {
            poll_interval: Duration::from_millis(10),
            reopen_backoff: Duration::from_millis(10),
            max_reopen_backoff: Duration::from_millis(40),
        },
        submit_timeout: Duration::from_millis(100),
    }
}

async fn next_log(rx: &mut mpsc::Receiver<TelemetryItem>) -> LogRecord {
    let item = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("record within timeout")
        .expect("channel open");
    match item {
        TelemetryItem::Log(record) => record,
        other => panic!("unexpected item {other:?}"),
    }
}

fn append(path: &std::path::Path, content: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

fn offset(record: &LogRecord) -> u64 {
    record.source.fields["log.offset"].parse().unwrap()
}

#[tokio::test]
async fn test_rename_rotation_ships_every_line_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web.log");
    std::fs::write(&path, "").unwrap();

    let (handle, mut rx) = ExporterHandle::channel(64);
    let cancel = CancellationToken::new();
    let source = LogSource::new(&path, "frappe.web", "frappe-web");
    let task = tokio::spawn(SourceWatcher::new(source, context(handle), cancel.clone()).run());
    tokio::time::sleep(Duration::from_millis(100)).await;

    append(&path, "line-1\nline-2\nline-3\n");
    let mut records = Vec::new();
    for _ in 0..3 {
        records.push(next_log(&mut rx).await);
    }

    std::fs::rename(&path, dir.path().join("web.log.1")).unwrap();
    append(&path, "line-4\nline-5\n");
    for _ in 0..2 {
        records.push(next_log(&mut rx).await);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "no duplicates after rotation");

    let messages: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, ["line-1", "line-2", "line-3", "line-4", "line-5"]);

    let offsets: Vec<_> = records.iter().map(offset).collect();
    assert_eq!(offsets, [0, 7, 14, 0, 7]);
    assert!(offsets[..3].windows(2).all(|w| w[0] < w[1]));
    assert!(offsets[3..].windows(2).all(|w| w[0] < w[1]));

    for record in &records {
        assert_eq!(record.source.tag, "frappe.web");
        assert_eq!(record.source.fields["server.name"], "bench-1");
        let identity = record.identity.as_ref().unwrap();
        assert_eq!(identity.service_name, "frappe-web");
        assert_eq!(identity.service_version, "15.2.0");
        assert!(record.trace.is_none());
    }

    cancel.cancel();
    let state = task.await.unwrap();
    assert_eq!(state.offset, 14);
}

#[tokio::test]
async fn test_file_moved_away_and_back_resumes_without_reshipping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web.log");
    let parked = dir.path().join("web.log.tmp");
    std::fs::write(&path, "").unwrap();

    let (handle, mut rx) = ExporterHandle::channel(64);
    let cancel = CancellationToken::new();
    let source = LogSource::new(&path, "frappe.web", "frappe-web");
    let task = tokio::spawn(SourceWatcher::new(source, context(handle), cancel.clone()).run());
    tokio::time::sleep(Duration::from_millis(100)).await;

    append(&path, "a\nb\nc\n");
    for _ in 0..3 {
        next_log(&mut rx).await;
    }

    std::fs::rename(&path, &parked).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::rename(&parked, &path).unwrap();
    append(&path, "d\n");

    let record = next_log(&mut rx).await;
    assert_eq!(record.message, "d");
    assert_eq!(offset(&record), 6);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "already shipped lines are not sent again");

    cancel.cancel();
    assert_eq!(task.await.unwrap().offset, 8);
}

#[tokio::test]
async fn test_file_created_after_start_is_read_from_the_beginning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.log");

    let (handle, mut rx) = ExporterHandle::channel(16);
    let cancel = CancellationToken::new();
    let source = LogSource::new(&path, "frappe.schedule", "frappe-schedule").with_site("tenant-b");
    let task = tokio::spawn(SourceWatcher::new(source, context(handle), cancel.clone()).run());
    tokio::time::sleep(Duration::from_millis(60)).await;

    append(&path, "Scheduler tick\n");
    let record = next_log(&mut rx).await;
    assert_eq!(record.message, "Scheduler tick");
    assert_eq!(offset(&record), 0);
    assert_eq!(
        record.identity.and_then(|i| i.tenant).as_deref(),
        Some("tenant-b")
    );

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_watchers_run_independently_per_source() {
    let dir = tempfile::tempdir().unwrap();
    let web = dir.path().join("web.log");
    let worker = dir.path().join("worker.log");
    std::fs::write(&web, "").unwrap();
    std::fs::write(&worker, "").unwrap();
    let missing = dir.path().join("never-created.log");

    let (handle, mut rx) = ExporterHandle::channel(16);
    let cancel = CancellationToken::new();
    let sources = vec![
        LogSource::new(&missing, "frappe.missing", "frappe"),
        LogSource::new(&web, "frappe.web", "frappe-web"),
        LogSource::new(&worker, "frappe.worker", "frappe-worker"),
    ];
    let tasks = spawn_watchers(&sources, &context(handle), &cancel);
    tokio::time::sleep(Duration::from_millis(100)).await;

    append(&worker, "job finished\n");
    let record = next_log(&mut rx).await;
    assert_eq!(record.source.tag, "frappe.worker");

    append(&web, "GET /app 200\n");
    let record = next_log(&mut rx).await;
    assert_eq!(record.source.tag, "frappe.web");

    cancel.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
