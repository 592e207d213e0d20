//! Wire protocol types for the carline record store.
//!
//! This crate defines the on-the-wire schema shared by the store daemon and
//! its clients, the pickup record document itself, and the canonical merge
//! semantics applied to it. Validation lives here so every writer hits the
//! same rules at the boundary and malformed input never reaches stored state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

const MAX_NAME_BYTES: usize = 200;
const MAX_TEXT_BYTES: usize = 2000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    CreateRecord,
    UpdateRecord,
    GetRecord,
    ListRecords,
    WatchCollection,
    WatchRecord,
    DeleteRecord,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// The parent's self-reported situation, chosen once at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentStatus {
    Arrived,
    FiveMins,
    Ready,
    Absent,
    ParkTeacher,
    ParkParent,
    Message,
}

impl ParentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentStatus::Arrived => "arrived",
            ParentStatus::FiveMins => "five_mins",
            ParentStatus::Ready => "ready",
            ParentStatus::Absent => "absent",
            ParentStatus::ParkTeacher => "park_teacher",
            ParentStatus::ParkParent => "park_parent",
            ParentStatus::Message => "message",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "arrived" => Some(ParentStatus::Arrived),
            "five_mins" => Some(ParentStatus::FiveMins),
            "ready" => Some(ParentStatus::Ready),
            "absent" => Some(ParentStatus::Absent),
            "park_teacher" => Some(ParentStatus::ParkTeacher),
            "park_parent" => Some(ParentStatus::ParkParent),
            "message" => Some(ParentStatus::Message),
            _ => None,
        }
    }
}

/// The processing stage of a record, owned by the teacher role. Any stage may
/// be set from any other stage; actions are idempotent sets, not guarded
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeacherStatus {
    Pending,
    Seen,
    Processing,
    Ready,
    Delivered,
}

impl TeacherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeacherStatus::Pending => "pending",
            TeacherStatus::Seen => "seen",
            TeacherStatus::Processing => "processing",
            TeacherStatus::Ready => "ready",
            TeacherStatus::Delivered => "delivered",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TeacherStatus::Pending),
            "seen" => Some(TeacherStatus::Seen),
            "processing" => Some(TeacherStatus::Processing),
            "ready" => Some(TeacherStatus::Ready),
            "delivered" => Some(TeacherStatus::Delivered),
            _ => None,
        }
    }
}

/// One stored pickup record. Parent-owned fields are written once at
/// creation; teacher-owned fields change through merge patches. `created_at`
/// is optional on the wire because a snapshot may echo a write whose server
/// stamp has not committed yet; readers must coerce a missing value instead
/// of trusting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRecord {
    pub id: String,
    pub parent_name: String,
    pub student_names: String,
    #[serde(default)]
    pub pickup_helper: Option<String>,
    pub status: ParentStatus,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub parent_session: Option<String>,
    pub teacher_status: TeacherStatus,
    #[serde(default)]
    pub teacher_message: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub last_update_at: String,
    #[serde(default)]
    pub student_ready_at: Option<String>,
}

impl PickupRecord {
    /// Materializes a validated submission into a stored record. The store
    /// supplies the id and the server time.
    pub fn from_submission(id: String, new: NewRecord, now: &str) -> Self {
        Self {
            id,
            parent_name: new.parent_name,
            student_names: new.student_names,
            pickup_helper: new.pickup_helper,
            status: new.status,
            eta: new.eta,
            message: new.message,
            parent_session: new.parent_session,
            teacher_status: TeacherStatus::Pending,
            teacher_message: None,
            teacher_id: None,
            teacher_name: None,
            created_at: Some(now.to_string()),
            last_update_at: now.to_string(),
            student_ready_at: None,
        }
    }

    /// Applies a shallow merge: absent patch fields leave the record
    /// untouched, present fields overwrite. `last_update_at` is always
    /// refreshed. `student_ready_at` is stamped the first time a patch sets
    /// the status to ready and never moves afterwards.
    pub fn apply_patch(&mut self, patch: &RecordPatch, now: &str) {
        if let Some(status) = patch.teacher_status {
            self.teacher_status = status;
            if status == TeacherStatus::Ready && self.student_ready_at.is_none() {
                self.student_ready_at = Some(now.to_string());
            }
        }
        if let Some(message) = &patch.teacher_message {
            self.teacher_message = Some(message.clone());
        }
        if let Some(teacher_id) = &patch.teacher_id {
            self.teacher_id = Some(teacher_id.clone());
        }
        if let Some(teacher_name) = &patch.teacher_name {
            self.teacher_name = Some(teacher_name.clone());
        }
        self.last_update_at = now.to_string();
    }
}

/// Creation payload sent by the parent client. The store assigns the id,
/// the initial teacher status, and both server timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRecord {
    pub parent_name: String,
    pub student_names: String,
    #[serde(default)]
    pub pickup_helper: Option<String>,
    pub status: ParentStatus,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub parent_session: Option<String>,
}

impl NewRecord {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_filled(&self.parent_name, "parent_name")?;
        require_filled(&self.student_names, "student_names")?;
        require_within(&self.parent_name, MAX_NAME_BYTES, "parent_name")?;
        require_within(&self.student_names, MAX_NAME_BYTES, "student_names")?;
        if let Some(message) = &self.message {
            require_within(message, MAX_TEXT_BYTES, "message")?;
        }
        Ok(())
    }
}

/// Teacher-side merge patch. Only teacher-owned fields are expressible here;
/// parent fields stay immutable by construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_status: Option<TeacherStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.teacher_status.is_none()
            && self.teacher_message.is_none()
            && self.teacher_id.is_none()
            && self.teacher_name.is_none()
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.is_empty() {
            return Err(ErrorInfo::new("invalid_params", "patch must set at least one field"));
        }
        if let Some(message) = &self.teacher_message {
            if message.trim().is_empty() {
                return Err(ErrorInfo::new(
                    "invalid_field",
                    "teacher_message must not be blank",
                ));
            }
            require_within(message, MAX_TEXT_BYTES, "teacher_message")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateParams {
    pub record_id: String,
    pub patch: RecordPatch,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordIdParams {
    pub record_id: String,
}

pub fn parse_new_record(params: Value) -> Result<NewRecord, ErrorInfo> {
    let new: NewRecord = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("creation payload is invalid JSON: {}", err),
        )
    })?;
    new.validate()?;
    Ok(new)
}

pub fn parse_update(params: Value) -> Result<UpdateParams, ErrorInfo> {
    let update: UpdateParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("update payload is invalid JSON: {}", err),
        )
    })?;
    require_filled(&update.record_id, "record_id")?;
    update.patch.validate()?;
    Ok(update)
}

pub fn parse_record_id(params: Value) -> Result<RecordIdParams, ErrorInfo> {
    let parsed: RecordIdParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("record id payload is invalid JSON: {}", err),
        )
    })?;
    require_filled(&parsed.record_id, "record_id")?;
    Ok(parsed)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn require_filled(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_within(value: &str, limit: usize, field: &str) -> Result<(), ErrorInfo> {
    if value.len() > limit {
        return Err(ErrorInfo::new(
            "invalid_field",
            format!("{} must be {} bytes or fewer", field, limit),
        ));
    }
    Ok(())
}
