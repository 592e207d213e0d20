//! Plain-text rendering for the CLI views.
//!
//! Formatting is separated from printing so the views can be asserted on in
//! tests. Every function returns a block without a trailing newline; the
//! caller decides how to emit it.

use std::fmt::Write;

use carline_core::dashboard::{Dashboard, DashboardEntry};
use carline_core::tracking::TrackedRecord;
use carline_store_protocol::{ParentStatus, PickupRecord, TeacherStatus};

pub fn format_submission(record: &PickupRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Submitted pickup request {}.", record.id);
    let _ = writeln!(out, "  students: {}", record.student_names);
    let _ = write!(out, "  status: {}", parent_status_label(record.status));
    if let Some(eta) = &record.eta {
        let _ = write!(out, " ({})", eta);
    }
    out
}

pub fn format_dashboard(dashboard: &Dashboard) -> String {
    if dashboard.is_empty() {
        return "The pickup line is empty.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Active ({})", dashboard.active.len());
    if dashboard.active.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for entry in &dashboard.active {
        push_active_entry(&mut out, entry);
    }

    let total = dashboard.completed_total();
    if total > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "Completed ({})", total);
        for entry in &dashboard.completed_recent {
            push_completed_entry(&mut out, entry);
        }
        if dashboard.completed_hidden > 0 {
            let _ = writeln!(out, "  plus {} earlier", dashboard.completed_hidden);
        }
    }

    out.trim_end().to_string()
}

pub fn format_tracking(tracked: &TrackedRecord) -> String {
    let record = &tracked.record;
    let mut out = String::new();
    let _ = writeln!(out, "Pickup request {}", record.id);
    let _ = writeln!(out, "  students: {}", record.student_names);

    let _ = write!(out, "  you: {}", parent_status_label(record.status));
    if let Some(eta) = &record.eta {
        let _ = write!(out, " ({})", eta);
    }
    let _ = writeln!(out);

    let _ = write!(out, "  school: {}", stage_label(record.teacher_status));
    if let Some(name) = &record.teacher_name {
        let _ = write!(out, " ({})", name);
    }
    if let Some(reply) = tracked.teacher_reply() {
        let _ = writeln!(out);
        let _ = write!(out, "  reply: {}", reply);
    }
    if tracked.is_ready() {
        let _ = writeln!(out);
        let _ = write!(out, "  Your student is at the door.");
    }
    if tracked.is_delivered() {
        let _ = writeln!(out);
        let _ = write!(
            out,
            "  Pickup complete. Run `carline submit` for the next one."
        );
    }
    out
}

/// Final frame for a live view whose snapshot stream has ended.
pub fn format_stream_end(reason: &str) -> String {
    format!("Live updates ended: {}", reason)
}

fn push_active_entry(out: &mut String, entry: &DashboardEntry) {
    let record = &entry.record;
    let _ = write!(
        out,
        "  [{}] {}  {} ({})  {}",
        record.teacher_status.as_str(),
        record.id,
        record.parent_name,
        record.student_names,
        parent_status_label(record.status),
    );
    if let Some(eta) = &record.eta {
        let _ = write!(out, "  eta {}", eta);
    }
    if let Some(helper) = &record.pickup_helper {
        let _ = write!(out, "  via {}", helper);
    }
    let _ = writeln!(out);

    if let Some(message) = &record.message {
        let _ = writeln!(out, "        note: {}", message);
    }
    if let Some(reply) = &record.teacher_message {
        let _ = writeln!(out, "        reply: {}", reply);
    }
}

fn push_completed_entry(out: &mut String, entry: &DashboardEntry) {
    let record = &entry.record;
    let _ = writeln!(
        out,
        "  {}  {} ({})",
        record.id, record.parent_name, record.student_names
    );
}

fn parent_status_label(status: ParentStatus) -> &'static str {
    match status {
        ParentStatus::Arrived => "at the door",
        ParentStatus::FiveMins => "a few minutes away",
        ParentStatus::Ready => "asking for the student",
        ParentStatus::Absent => "absent today",
        ParentStatus::ParkTeacher => "parked, teacher brings the student",
        ParentStatus::ParkParent => "parked, walking up",
        ParentStatus::Message => "message only",
    }
}

fn stage_label(status: TeacherStatus) -> &'static str {
    match status {
        TeacherStatus::Pending => "waiting to be seen",
        TeacherStatus::Seen => "seen",
        TeacherStatus::Processing => "getting the student",
        TeacherStatus::Ready => "student ready at the door",
        TeacherStatus::Delivered => "student delivered",
    }
}
