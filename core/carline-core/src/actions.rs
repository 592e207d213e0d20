//! Parent submissions and teacher actions.
//!
//! Both sides of the pickup line funnel through here: a parent's form
//! becomes a validated [`NewRecord`], and a teacher's button press becomes a
//! [`RecordPatch`] stamped with the acting teacher's identity. The store
//! applies patches as unconditional merges; this module decides what goes
//! into them.

use rand::RngCore;

use carline_store_protocol::{
    NewRecord, ParentStatus, PickupRecord, RecordPatch, TeacherStatus,
};

use crate::error::{CarlineError, Result};
use crate::identity::Identity;
use crate::store::RecordStore;

/// Arrival estimates a parent can pick when they are a few minutes out.
pub const ETA_CHOICES: [&str; 4] = ["5 minutes", "10 minutes", "10-15 minutes", "20+ minutes"];

/// Fixed label shown when the parent reports they are already outside.
pub const ARRIVED_ETA: &str = "Arrived";

/// A parent's submission form, as collected by the client.
#[derive(Debug, Clone)]
pub struct SubmitForm {
    pub parent_name: String,
    pub student_names: String,
    pub pickup_helper: Option<String>,
    pub status: ParentStatus,
    pub eta_choice: Option<String>,
    pub message: Option<String>,
}

impl Default for SubmitForm {
    fn default() -> Self {
        Self {
            parent_name: String::new(),
            student_names: String::new(),
            pickup_helper: None,
            status: ParentStatus::Arrived,
            eta_choice: None,
            message: None,
        }
    }
}

impl SubmitForm {
    /// Validates the form and shapes it into the wire payload.
    ///
    /// The arrival estimate is derived from the status: "Arrived" pins it,
    /// "five minutes out" takes the chosen estimate (first choice when the
    /// picker was untouched), and every other status leaves it unset.
    pub fn into_new_record(self) -> Result<NewRecord> {
        let parent_name = require_filled(&self.parent_name, "parent_name")?;
        let student_names = require_filled(&self.student_names, "student_names")?;

        let eta = match self.status {
            ParentStatus::Arrived => Some(ARRIVED_ETA.to_string()),
            ParentStatus::FiveMins => Some(
                normalize(self.eta_choice).unwrap_or_else(|| ETA_CHOICES[0].to_string()),
            ),
            _ => None,
        };

        Ok(NewRecord {
            parent_name,
            student_names,
            pickup_helper: normalize(self.pickup_helper),
            status: self.status,
            eta,
            message: normalize(self.message),
            parent_session: Some(make_session_token()),
        })
    }
}

/// Submits a parent form to the store and returns the committed record.
pub fn submit(store: &dyn RecordStore, form: SubmitForm) -> Result<PickupRecord> {
    let new_record = form.into_new_record()?;
    store.create(new_record)
}

/// What a teacher can do to a record from the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeacherAction {
    Seen,
    Processing,
    Ready,
    Delivered,
    Reply(String),
}

impl TeacherAction {
    pub fn label(&self) -> &'static str {
        match self {
            TeacherAction::Seen => "seen",
            TeacherAction::Processing => "processing",
            TeacherAction::Ready => "ready",
            TeacherAction::Delivered => "delivered",
            TeacherAction::Reply(_) => "reply",
        }
    }

    /// Builds the merge patch for this action, attributed to `teacher`.
    ///
    /// A reply whose text trims to nothing produces no patch at all; the
    /// record must not move to "processing" on an empty send.
    pub fn patch(&self, teacher: &Identity) -> Option<RecordPatch> {
        let mut patch = RecordPatch {
            teacher_id: Some(teacher.id.clone()),
            teacher_name: Some(teacher.label().to_string()),
            ..RecordPatch::default()
        };

        match self {
            TeacherAction::Seen => patch.teacher_status = Some(TeacherStatus::Seen),
            TeacherAction::Processing => patch.teacher_status = Some(TeacherStatus::Processing),
            TeacherAction::Ready => patch.teacher_status = Some(TeacherStatus::Ready),
            TeacherAction::Delivered => patch.teacher_status = Some(TeacherStatus::Delivered),
            TeacherAction::Reply(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                patch.teacher_status = Some(TeacherStatus::Processing);
                patch.teacher_message = Some(trimmed.to_string());
            }
        }

        Some(patch)
    }
}

/// Applies a teacher action to a record. Returns `Ok(None)` when the action
/// is a no-op (an empty reply), otherwise the updated record.
pub fn apply_action(
    store: &dyn RecordStore,
    record_id: &str,
    teacher: &Identity,
    action: &TeacherAction,
) -> Result<Option<PickupRecord>> {
    match action.patch(teacher) {
        Some(patch) => store.merge_update(record_id, patch).map(Some),
        None => Ok(None),
    }
}

fn require_filled(value: &str, field: &'static str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CarlineError::MissingField { field });
    }
    Ok(trimmed.to_string())
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn make_session_token() -> String {
    format!("ps-{:016x}", rand::thread_rng().next_u64())
}
