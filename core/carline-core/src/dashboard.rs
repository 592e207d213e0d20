//! Teacher dashboard projection.
//!
//! Turns a raw collection snapshot into what the dashboard renders: active
//! records in work-priority order, plus a capped tail of completed pickups.
//! The projection is pure, so every snapshot from a watch channel can be
//! re-projected without touching the store.

use chrono::{DateTime, Utc};

use carline_store_protocol::{PickupRecord, TeacherStatus};

use crate::record::{created_time, RecordTime};

/// How many completed pickups the dashboard shows before collapsing the
/// rest into a count.
pub const COMPLETED_DISPLAY_CAP: usize = 5;

/// Work-priority rank for dashboard ordering. Untouched records come first,
/// then in-flight ones, then acknowledged-but-idle, then done.
pub fn status_rank(status: TeacherStatus) -> u8 {
    match status {
        TeacherStatus::Pending => 0,
        TeacherStatus::Processing => 1,
        TeacherStatus::Ready => 2,
        TeacherStatus::Seen => 3,
        TeacherStatus::Delivered => 4,
    }
}

/// A record paired with the creation time the view sorts by.
#[derive(Debug, Clone)]
pub struct DashboardEntry {
    pub record: PickupRecord,
    pub created: RecordTime,
}

/// The dashboard's two sections.
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    pub active: Vec<DashboardEntry>,
    pub completed_recent: Vec<DashboardEntry>,
    pub completed_hidden: usize,
}

impl Dashboard {
    pub fn completed_total(&self) -> usize {
        self.completed_recent.len() + self.completed_hidden
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.completed_total() == 0
    }
}

/// Projects a collection snapshot into the dashboard shape.
///
/// Records sort by status rank, then newest-first within a rank. Records
/// without a usable creation timestamp sort as if created at `now`.
pub fn project(records: &[PickupRecord], now: DateTime<Utc>) -> Dashboard {
    let mut entries: Vec<DashboardEntry> = records
        .iter()
        .map(|record| DashboardEntry {
            created: created_time(record, now),
            record: record.clone(),
        })
        .collect();

    entries.sort_by(|a, b| {
        status_rank(a.record.teacher_status)
            .cmp(&status_rank(b.record.teacher_status))
            .then_with(|| b.created.effective().cmp(&a.created.effective()))
    });

    let (completed, active): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|entry| entry.record.teacher_status == TeacherStatus::Delivered);

    let mut completed_recent = completed;
    let completed_hidden = completed_recent.len().saturating_sub(COMPLETED_DISPLAY_CAP);
    completed_recent.truncate(COMPLETED_DISPLAY_CAP);

    Dashboard {
        active,
        completed_recent,
        completed_hidden,
    }
}
