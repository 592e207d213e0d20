//! In-memory collection state managed by the store daemon.
//!
//! One mutex guards the record map and the watcher registry together, so a
//! commit and its fan-out are atomic: every watcher sees each committed state
//! exactly once, in commit order. Persistence happens inside the commit path;
//! a failed persist is logged and the in-memory state stays authoritative for
//! the life of the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use chrono::Utc;
use rand::RngCore;
use tracing::warn;

use carline_store_protocol::{now_rfc3339, NewRecord, PickupRecord, RecordPatch};

use crate::persist;

pub struct SharedState {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    records: HashMap<String, PickupRecord>,
    store_path: Option<PathBuf>,
    collection_watchers: Vec<Sender<Vec<PickupRecord>>>,
    record_watchers: Vec<RecordWatcher>,
}

struct RecordWatcher {
    record_id: String,
    sender: Sender<Option<PickupRecord>>,
}

impl SharedState {
    /// `store_path: None` keeps the collection memory-only (tests).
    pub fn new(records: HashMap<String, PickupRecord>, store_path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records,
                store_path,
                collection_watchers: Vec::new(),
                record_watchers: Vec::new(),
            }),
        }
    }

    pub fn create_record(&self, new: NewRecord) -> Result<PickupRecord, String> {
        let mut inner = self.lock()?;
        let id = make_record_id();
        let record = PickupRecord::from_submission(id.clone(), new, &now_rfc3339());
        inner.records.insert(id.clone(), record.clone());
        commit(&mut inner, &id);
        Ok(record)
    }

    /// Returns `Ok(None)` when the record id is unknown.
    pub fn update_record(
        &self,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<Option<PickupRecord>, String> {
        let mut inner = self.lock()?;
        let updated = match inner.records.get_mut(record_id) {
            Some(record) => {
                record.apply_patch(patch, &now_rfc3339());
                Some(record.clone())
            }
            None => None,
        };
        if updated.is_some() {
            commit(&mut inner, record_id);
        }
        Ok(updated)
    }

    pub fn delete_record(&self, record_id: &str) -> Result<bool, String> {
        let mut inner = self.lock()?;
        let removed = inner.records.remove(record_id).is_some();
        if removed {
            commit(&mut inner, record_id);
        }
        Ok(removed)
    }

    pub fn get_record(&self, record_id: &str) -> Result<Option<PickupRecord>, String> {
        let inner = self.lock()?;
        Ok(inner.records.get(record_id).cloned())
    }

    pub fn list_records(&self) -> Result<Vec<PickupRecord>, String> {
        let inner = self.lock()?;
        Ok(inner.records.values().cloned().collect())
    }

    pub fn record_count(&self) -> Result<usize, String> {
        let inner = self.lock()?;
        Ok(inner.records.len())
    }

    /// Registers a collection watcher. The current snapshot is delivered
    /// before the receiver is handed back, then one snapshot per commit.
    pub fn watch_collection(&self) -> Result<Receiver<Vec<PickupRecord>>, String> {
        let mut inner = self.lock()?;
        let (sender, receiver) = channel();
        let snapshot: Vec<PickupRecord> = inner.records.values().cloned().collect();
        let _ = sender.send(snapshot);
        inner.collection_watchers.push(sender);
        Ok(receiver)
    }

    /// Registers a single-record watcher. `None` snapshots mean the record
    /// does not exist (never created, or deleted since).
    pub fn watch_record(&self, record_id: &str) -> Result<Receiver<Option<PickupRecord>>, String> {
        let mut inner = self.lock()?;
        let (sender, receiver) = channel();
        let _ = sender.send(inner.records.get(record_id).cloned());
        inner.record_watchers.push(RecordWatcher {
            record_id: record_id.to_string(),
            sender,
        });
        Ok(receiver)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreInner>, String> {
        self.inner
            .lock()
            .map_err(|_| "record state lock poisoned".to_string())
    }
}

/// Persist then fan out. Watchers whose receiving side has gone away are
/// pruned on the failed send. Record watchers whose id is absent from the
/// collection get the absent snapshot again on every commit, and a hung-up
/// client fails that send; a watcher left behind by a deleted or
/// never-created record survives at most one further commit.
fn commit(inner: &mut StoreInner, touched_id: &str) {
    if let Some(path) = inner.store_path.clone() {
        if let Err(err) = persist::save(&path, &inner.records) {
            warn!(error = %err, "Failed to persist record store");
        }
    }

    let StoreInner {
        records,
        collection_watchers,
        record_watchers,
        ..
    } = inner;

    let snapshot: Vec<PickupRecord> = records.values().cloned().collect();
    collection_watchers.retain(|sender| sender.send(snapshot.clone()).is_ok());

    let current = records.get(touched_id).cloned();
    record_watchers.retain(|watcher| {
        if watcher.record_id == touched_id {
            return watcher.sender.send(current.clone()).is_ok();
        }
        if records.contains_key(&watcher.record_id) {
            return true;
        }
        watcher.sender.send(None).is_ok()
    });
}

fn make_record_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let noise = rand::thread_rng().next_u32();
    format!("rec-{}-{:08x}", millis, noise)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carline_store_protocol::{ParentStatus, TeacherStatus};

    fn submission(parent: &str) -> NewRecord {
        NewRecord {
            parent_name: parent.to_string(),
            student_names: "Noah".to_string(),
            pickup_helper: None,
            status: ParentStatus::FiveMins,
            eta: Some("10-15 minutes".to_string()),
            message: None,
            parent_session: Some("ps-1".to_string()),
        }
    }

    fn seen_patch() -> RecordPatch {
        RecordPatch {
            teacher_status: Some(TeacherStatus::Seen),
            teacher_id: Some("usr-1".to_string()),
            teacher_name: Some("Ms. Harper".to_string()),
            ..RecordPatch::default()
        }
    }

    #[test]
    fn create_assigns_id_and_pending_status() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");
        assert!(record.id.starts_with("rec-"));
        assert_eq!(record.teacher_status, TeacherStatus::Pending);
        assert!(record.created_at.is_some());
    }

    #[test]
    fn update_applies_patch() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");

        let updated = state
            .update_record(&record.id, &seen_patch())
            .expect("update")
            .expect("record present");
        assert_eq!(updated.teacher_status, TeacherStatus::Seen);
        assert_eq!(updated.teacher_name.as_deref(), Some("Ms. Harper"));
    }

    #[test]
    fn update_unknown_id_returns_none() {
        let state = SharedState::new(HashMap::new(), None);
        let outcome = state.update_record("rec-missing", &seen_patch()).expect("update");
        assert!(outcome.is_none());
    }

    #[test]
    fn ready_stamp_is_set_once_across_updates() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");

        let ready = RecordPatch {
            teacher_status: Some(TeacherStatus::Ready),
            ..RecordPatch::default()
        };
        let first = state
            .update_record(&record.id, &ready)
            .expect("update")
            .expect("record present");
        let stamp = first.student_ready_at.clone().expect("stamp set");

        let second = state
            .update_record(&record.id, &ready)
            .expect("update")
            .expect("record present");
        assert_eq!(second.student_ready_at.as_deref(), Some(stamp.as_str()));
    }

    #[test]
    fn delete_removes_record() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");
        assert!(state.delete_record(&record.id).expect("delete"));
        assert!(state.get_record(&record.id).expect("get").is_none());
        assert!(!state.delete_record(&record.id).expect("second delete"));
    }

    #[test]
    fn collection_watcher_sees_initial_and_committed_snapshots() {
        let state = SharedState::new(HashMap::new(), None);
        let watcher = state.watch_collection().expect("watch");

        let initial = watcher.recv().expect("initial snapshot");
        assert!(initial.is_empty());

        state.create_record(submission("Dana")).expect("create");
        let after_create = watcher.recv().expect("create snapshot");
        assert_eq!(after_create.len(), 1);

        state.create_record(submission("Femi")).expect("create");
        let after_second = watcher.recv().expect("second snapshot");
        assert_eq!(after_second.len(), 2);
    }

    #[test]
    fn record_watcher_sees_deletion_as_none() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");

        let watcher = state.watch_record(&record.id).expect("watch");
        assert!(watcher.recv().expect("initial").is_some());

        state.delete_record(&record.id).expect("delete");
        assert!(watcher.recv().expect("deletion snapshot").is_none());
    }

    #[test]
    fn record_watcher_ignores_other_records() {
        let state = SharedState::new(HashMap::new(), None);
        let tracked = state.create_record(submission("Dana")).expect("create");

        let watcher = state.watch_record(&tracked.id).expect("watch");
        let _ = watcher.recv().expect("initial");

        state.create_record(submission("Femi")).expect("create unrelated");
        assert!(watcher.try_recv().is_err(), "unrelated commit must not fan out");

        state
            .update_record(&tracked.id, &seen_patch())
            .expect("update")
            .expect("present");
        assert!(watcher.recv().expect("tracked update").is_some());
    }

    #[test]
    fn dropped_watcher_is_pruned_without_disturbing_others() {
        let state = SharedState::new(HashMap::new(), None);
        let kept = state.watch_collection().expect("watch kept");
        let dropped = state.watch_collection().expect("watch dropped");
        let _ = kept.recv();
        let _ = dropped.recv();
        drop(dropped);

        state.create_record(submission("Dana")).expect("create");
        assert_eq!(kept.recv().expect("snapshot").len(), 1);

        state.create_record(submission("Femi")).expect("create");
        assert_eq!(kept.recv().expect("snapshot").len(), 2);
    }

    #[test]
    fn stale_record_watchers_fall_out_after_their_client_leaves() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");

        let watcher = state.watch_record(&record.id).expect("watch");
        assert!(watcher.recv().expect("initial").is_some());

        state.delete_record(&record.id).expect("delete");
        assert!(watcher.recv().expect("deletion snapshot").is_none());
        drop(watcher);

        state.create_record(submission("Femi")).expect("create unrelated");
        let inner = state.inner.lock().expect("lock");
        assert!(inner.record_watchers.is_empty());
    }

    #[test]
    fn live_watcher_on_a_deleted_record_keeps_reporting_absence() {
        let state = SharedState::new(HashMap::new(), None);
        let record = state.create_record(submission("Dana")).expect("create");

        let watcher = state.watch_record(&record.id).expect("watch");
        assert!(watcher.recv().expect("initial").is_some());

        state.delete_record(&record.id).expect("delete");
        assert!(watcher.recv().expect("deletion snapshot").is_none());

        state.create_record(submission("Femi")).expect("create unrelated");
        assert!(watcher.recv().expect("absence resent").is_none());
    }

    #[test]
    fn records_persist_across_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.json");

        let state = SharedState::new(persist::load(&path), Some(path.clone()));
        let record = state.create_record(submission("Dana")).expect("create");

        let reloaded = SharedState::new(persist::load(&path), Some(path.clone()));
        let found = reloaded.get_record(&record.id).expect("get").expect("present");
        assert_eq!(found.parent_name, "Dana");
    }
}
