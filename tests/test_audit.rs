use std::sync::Arc;

use similar_asserts::assert_eq;

use terrarium::audit::{
    AuditEvent, AuditEventKind, AuditLevel, AuditManager, AuditSink, FileSink, MemorySink,
    MultiSink,
};

fn event(message: &str) -> AuditEvent {
    AuditEvent::new(AuditLevel::Info, AuditEventKind::SystemEvent, message)
        .with_template("page.html")
        .with_resource("upper")
}

#[test]
fn test_file_sink_writes_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let sink = FileSink::new(&path, 1024 * 1024, 2).unwrap();
    sink.log(&event("one")).unwrap();
    sink.log(&event("two")).unwrap();
    sink.close().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["type"], "system_event");
        assert_eq!(parsed["template_name"], "page.html");
        assert!(parsed["timestamp"].is_string());
    }
}

#[test]
fn test_file_sink_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    // every event is larger than the size budget, so each write rotates
    let sink = FileSink::new(&path, 64, 2).unwrap();
    sink.log(&event("first")).unwrap();
    sink.log(&event("second")).unwrap();
    sink.log(&event("third")).unwrap();
    sink.close().unwrap();

    assert!(path.exists());
    assert!(dir.path().join("audit.log.1").exists());
    assert!(dir.path().join("audit.log.2").exists());
    assert!(!dir.path().join("audit.log.3").exists());

    let newest = std::fs::read_to_string(&path).unwrap();
    assert!(newest.contains("third"));
    let backup = std::fs::read_to_string(dir.path().join("audit.log.1")).unwrap();
    assert!(backup.contains("second"));
}

#[test]
fn test_multi_sink_aggregates_errors() {
    struct FailingSink;

    impl AuditSink for FailingSink {
        fn log(&self, _event: &AuditEvent) -> Result<(), terrarium::Error> {
            Err(terrarium::Error::new(
                terrarium::ErrorKind::InvalidOperation,
                "sink is broken",
            ))
        }
    }

    let memory = Arc::new(MemorySink::new(8));
    let multi = MultiSink::new(vec![
        Arc::new(FailingSink) as Arc<dyn AuditSink>,
        memory.clone(),
    ]);
    let err = multi.log(&event("x")).unwrap_err();
    assert!(err.to_string().contains("1 audit sink(s) failed"));
    // the healthy sink still received the event
    assert_eq!(memory.len(), 1);
}

#[test]
fn test_manager_disabled_drops_everything() {
    let sink = Arc::new(MemorySink::new(8));
    let manager = AuditManager::new(sink.clone());
    manager.set_enabled(false);
    manager.record(event("dropped"));
    assert!(sink.is_empty());
    manager.set_enabled(true);
    manager.record(event("kept"));
    assert_eq!(sink.len(), 1);
}
