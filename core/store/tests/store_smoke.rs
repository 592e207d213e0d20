//! End-to-end exercise of the store daemon over its socket, raw protocol
//! framing first, then the full pickup flow through the client crate.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use carline_core::actions::{self, SubmitForm, TeacherAction};
use carline_core::dashboard;
use carline_core::store::{RecordStore, RecordWatch, SocketStore, WatchEvent};
use carline_core::tracking::{TrackingUpdate, TrackingView};
use carline_core::{CarlineError, Identity};
use carline_store_protocol::{
    ParentStatus, PickupRecord, TeacherStatus, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

struct DaemonGuard {
    child: Child,
    socket_path: PathBuf,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon_at(home: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_carline-store"))
        .env("HOME", home)
        .env_remove("CARLINE_STORE_SOCKET")
        .env_remove("CARLINE_DEBUG_LOG")
        .spawn()
        .expect("spawn carline-store");

    let socket_path = home.join(".carline").join("store.sock");
    wait_for_socket(&socket_path);
    DaemonGuard { child, socket_path }
}

fn wait_for_socket(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("store socket {} never came up", path.display());
}

fn raw_request(socket: &Path, body: &str) -> serde_json::Value {
    let mut stream = UnixStream::connect(socket).expect("connect to store");
    stream.write_all(body.as_bytes()).expect("write request");
    stream.write_all(b"\n").expect("write newline");

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    serde_json::from_str(&line).expect("parse response")
}

fn base_form() -> SubmitForm {
    SubmitForm {
        parent_name: "Dana Okafor".to_string(),
        student_names: "Femi, Tolu".to_string(),
        pickup_helper: None,
        status: ParentStatus::FiveMins,
        eta_choice: Some("10-15 minutes".to_string()),
        message: Some("Femi has a dentist visit".to_string()),
    }
}

fn teacher() -> Identity {
    Identity {
        id: "usr-test".to_string(),
        name: Some("Ms. Reyes".to_string()),
    }
}

fn next_record_snapshot(watch: &RecordWatch) -> Option<PickupRecord> {
    match watch.recv_timeout(Duration::from_secs(5)) {
        Some(WatchEvent::Snapshot(snapshot)) => snapshot,
        Some(WatchEvent::Lost(reason)) => panic!("record watch lost: {reason}"),
        None => panic!("no snapshot from the store"),
    }
}

#[test]
fn health_reports_store_state() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());

    let response = raw_request(
        &daemon.socket_path,
        &format!(
            r#"{{"protocol_version":{},"method":"get_health","id":"t1"}}"#,
            PROTOCOL_VERSION
        ),
    );
    assert_eq!(response["ok"], true);
    assert_eq!(response["id"], "t1");
    assert_eq!(response["data"]["status"], "ok");
    assert_eq!(response["data"]["protocol_version"], PROTOCOL_VERSION);
    assert_eq!(response["data"]["records"], 0);
}

#[test]
fn rejects_protocol_mismatch() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());

    let response = raw_request(
        &daemon.socket_path,
        r#"{"protocol_version":99,"method":"get_health"}"#,
    );
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "protocol_mismatch");
}

#[test]
fn rejects_invalid_json() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());

    let response = raw_request(&daemon.socket_path, "{this is not json");
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "invalid_json");
}

#[test]
fn rejects_oversized_requests() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());

    let mut stream = UnixStream::connect(&daemon.socket_path).expect("connect to store");
    let chunk = vec![b'a'; 64 * 1024];
    let mut sent = 0usize;
    while sent <= MAX_REQUEST_BYTES {
        if stream.write_all(&chunk).is_err() {
            break;
        }
        sent += chunk.len();
    }
    let _ = stream.write_all(b"\n");

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    let response: serde_json::Value = serde_json::from_str(&line).expect("parse response");
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "request_too_large");
}

#[test]
fn validates_submissions_over_the_wire() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());

    let body = serde_json::json!({
        "protocol_version": PROTOCOL_VERSION,
        "method": "create_record",
        "params": {
            "parent_name": "   ",
            "student_names": "Femi",
            "status": "arrived"
        }
    });
    let response = raw_request(&daemon.socket_path, &body.to_string());
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "missing_field");
}

#[test]
fn reports_missing_records_without_failing() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());
    let store = SocketStore::new(daemon.socket_path.clone());

    assert!(store.fetch("rec-gone").expect("fetch").is_none());
    assert!(!store.delete("rec-gone").expect("delete"));

    let err = store
        .merge_update(
            "rec-gone",
            carline_store_protocol::RecordPatch {
                teacher_status: Some(TeacherStatus::Seen),
                ..Default::default()
            },
        )
        .expect_err("update must be rejected");
    match err {
        CarlineError::StoreRejected { code, .. } => assert_eq!(code, "not_found"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn collection_watch_pushes_commits() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());
    let store = SocketStore::new(daemon.socket_path.clone());

    let watch = store.watch_collection().expect("watch collection");
    match watch.recv_timeout(Duration::from_secs(5)) {
        Some(WatchEvent::Snapshot(records)) => assert!(records.is_empty()),
        other => panic!("expected initial snapshot, got {other:?}"),
    }

    let record = actions::submit(&store, base_form()).expect("submit");
    match watch.recv_timeout(Duration::from_secs(5)) {
        Some(WatchEvent::Snapshot(records)) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, record.id);
        }
        other => panic!("expected pushed snapshot, got {other:?}"),
    }
}

#[test]
fn records_survive_a_restart() {
    let home = tempfile::tempdir().expect("temp home");
    let record_id;
    {
        let daemon = spawn_daemon_at(home.path());
        let store = SocketStore::new(daemon.socket_path.clone());
        let record = actions::submit(&store, base_form()).expect("submit");
        record_id = record.id;
    }
    {
        let daemon = spawn_daemon_at(home.path());
        let store = SocketStore::new(daemon.socket_path.clone());
        let fetched = store
            .fetch(&record_id)
            .expect("fetch")
            .expect("record survived the restart");
        assert_eq!(fetched.parent_name, "Dana Okafor");
        assert_eq!(fetched.teacher_status, TeacherStatus::Pending);
    }
}

#[test]
fn pickup_flow_end_to_end() {
    let home = tempfile::tempdir().expect("temp home");
    let daemon = spawn_daemon_at(home.path());
    let store = SocketStore::new(daemon.socket_path.clone());

    // parent submits from the car
    let record = actions::submit(&store, base_form()).expect("submit");
    assert_eq!(record.teacher_status, TeacherStatus::Pending);
    assert_eq!(record.eta.as_deref(), Some("10-15 minutes"));
    assert!(record.parent_session.is_some());

    // and starts tracking it
    let watch = store.watch_record(&record.id).expect("watch record");
    let mut view = TrackingView::new();
    match view.observe(next_record_snapshot(&watch)) {
        TrackingUpdate::Live(tracked) => assert!(!tracked.is_ready()),
        other => panic!("expected live record, got {other:?}"),
    }

    // teacher works the line
    let teacher = teacher();
    actions::apply_action(&store, &record.id, &teacher, &TeacherAction::Seen)
        .expect("seen")
        .expect("patch applied");
    let ready = actions::apply_action(&store, &record.id, &teacher, &TeacherAction::Ready)
        .expect("ready")
        .expect("patch applied");
    assert!(ready.student_ready_at.is_some());

    // the parent's watch converges on ready, with attribution
    let mut saw_ready = false;
    for _ in 0..4 {
        if let TrackingUpdate::Live(tracked) = view.observe(next_record_snapshot(&watch)) {
            if tracked.is_ready() {
                assert_eq!(tracked.record.teacher_name.as_deref(), Some("Ms. Reyes"));
                saw_ready = true;
                break;
            }
        }
    }
    assert!(saw_ready, "tracking never reported the student ready");

    // the ready stamp does not move on a repeat
    let again = actions::apply_action(&store, &record.id, &teacher, &TeacherAction::Ready)
        .expect("ready again")
        .expect("patch applied");
    assert_eq!(again.student_ready_at, ready.student_ready_at);

    // delivered lands in the completed section of the dashboard
    actions::apply_action(&store, &record.id, &teacher, &TeacherAction::Delivered)
        .expect("delivered")
        .expect("patch applied");
    let records = store.list().expect("list");
    let projected = dashboard::project(&records, chrono::Utc::now());
    assert!(projected.active.is_empty());
    assert_eq!(projected.completed_recent.len(), 1);

    // archiving resets the tracking parent exactly once
    assert!(store.delete(&record.id).expect("archive"));
    let mut reset_seen = false;
    for _ in 0..6 {
        match view.observe(next_record_snapshot(&watch)) {
            TrackingUpdate::Reset => {
                reset_seen = true;
                break;
            }
            TrackingUpdate::Live(_) => {}
            TrackingUpdate::Idle => panic!("idle before the reset"),
        }
    }
    assert!(reset_seen, "tracking never reset after the archive");
}
