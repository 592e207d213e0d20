//! Parent-side tracking of a single submitted record.
//!
//! A tracking view consumes record snapshots from a watch channel. A present
//! record is live; an absent one means the record was archived or deleted
//! out from under the parent, and the client must fall back to the
//! submission form. The fallback fires exactly once per disappearance, so a
//! store that repeats "not found" does not wipe state the user already
//! re-entered.

use carline_store_protocol::{PickupRecord, TeacherStatus};

/// A live record plus the read-side helpers the tracking screen needs.
#[derive(Debug, Clone)]
pub struct TrackedRecord {
    pub record: PickupRecord,
}

impl TrackedRecord {
    pub fn is_ready(&self) -> bool {
        self.record.teacher_status == TeacherStatus::Ready
    }

    pub fn is_delivered(&self) -> bool {
        self.record.teacher_status == TeacherStatus::Delivered
    }

    pub fn teacher_reply(&self) -> Option<&str> {
        self.record.teacher_message.as_deref()
    }
}

/// What the client should do with the latest snapshot.
#[derive(Debug, Clone)]
pub enum TrackingUpdate {
    /// The record exists; render it.
    Live(TrackedRecord),
    /// The record vanished; clear the tracked id and show the form.
    Reset,
    /// The record is still gone and the reset already happened.
    Idle,
}

/// Per-subscription state deciding between [`TrackingUpdate::Reset`] and
/// [`TrackingUpdate::Idle`].
#[derive(Debug, Default)]
pub struct TrackingView {
    vanished_handled: bool,
}

impl TrackingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, snapshot: Option<PickupRecord>) -> TrackingUpdate {
        match snapshot {
            Some(record) => {
                self.vanished_handled = false;
                TrackingUpdate::Live(TrackedRecord { record })
            }
            None if self.vanished_handled => TrackingUpdate::Idle,
            None => {
                self.vanished_handled = true;
                TrackingUpdate::Reset
            }
        }
    }
}
