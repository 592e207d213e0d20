//! Session role state: the value object, its pure transitions, and the
//! durable file behind it.
//!
//! The session is two independent facts: "is this device a logged-in
//! teacher" and "which record is this device tracking". Transitions are pure
//! functions over the value object; only [`SessionStore`] touches the disk,
//! so view logic never mixes persistence with state math.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "role": "teacher",
//!   "tracked_record": "rec-..."
//! }
//! ```

use std::io::Write;
use std::path::PathBuf;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::config;
use crate::error::{CarlineError, Result};

const SESSION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Teacher => "teacher",
        }
    }
}

/// The durable session facts for this device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub role: Role,
    pub tracked_record: Option<String>,
}

impl Session {
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

/// Events that move the session forward. Login and logout touch only the
/// role; tracking events touch only the record id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoginSucceeded,
    LoggedOut,
    SubmissionTracked(String),
    TrackingCleared,
}

/// Computes the next session from the current one and an event. Pure; the
/// caller decides when to persist.
pub fn next_session(current: &Session, event: SessionEvent) -> Session {
    match event {
        SessionEvent::LoginSucceeded => Session {
            role: Role::Teacher,
            tracked_record: current.tracked_record.clone(),
        },
        SessionEvent::LoggedOut => Session {
            role: Role::Guest,
            tracked_record: current.tracked_record.clone(),
        },
        SessionEvent::SubmissionTracked(record_id) => Session {
            role: current.role,
            tracked_record: Some(record_id),
        },
        SessionEvent::TrackingCleared => Session {
            role: current.role,
            tracked_record: None,
        },
    }
}

/// Checks a login attempt against the configured shared secret. Exact string
/// equality; there is no per-user identity behind it.
pub fn verify_access_code(attempt: &str, configured: &str) -> Result<()> {
    if attempt == configured {
        Ok(())
    } else {
        Err(CarlineError::AccessCodeRejected)
    }
}

/// What to mount on startup, decided from the session alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartView {
    TeacherDashboard,
    ParentTracking(String),
    SubmissionForm,
}

/// Teacher wins over an open record; an open record wins over the form.
pub fn route(session: &Session) -> StartView {
    if session.is_teacher() {
        return StartView::TeacherDashboard;
    }
    match &session.tracked_record {
        Some(record_id) => StartView::ParentTracking(record_id.clone()),
        None => StartView::SubmissionForm,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    role: Role,
    #[serde(default)]
    tracked_record: Option<String>,
}

/// File-backed persistence for the session value object.
///
/// Missing, empty, corrupt, or version-mismatched files come back as the
/// guest default instead of failing the client.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_path() -> Result<Self> {
        config::get_session_path()
            .map(Self::new)
            .ok_or(CarlineError::HomeDirNotFound)
    }

    pub fn load(&self) -> Session {
        if !self.path.exists() {
            return Session::default();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Failed to read session file; using guest session");
                return Session::default();
            }
        };

        if content.trim().is_empty() {
            return Session::default();
        }

        match serde_json::from_str::<SessionFile>(&content) {
            Ok(file) if file.version == SESSION_VERSION => Session {
                role: file.role,
                tracked_record: file.tracked_record,
            },
            Ok(file) => {
                warn!(
                    found = file.version,
                    expected = SESSION_VERSION,
                    "Unsupported session file version; using guest session"
                );
                Session::default()
            }
            Err(err) => {
                warn!(error = %err, "Failed to parse session file; using guest session");
                Session::default()
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let file = SessionFile {
            version: SESSION_VERSION,
            role: session.role,
            tracked_record: session.tracked_record.clone(),
        };

        let content = serde_json::to_string_pretty(&file).map_err(|source| CarlineError::Json {
            context: "serialize session".to_string(),
            source,
        })?;

        let parent = self.path.parent().ok_or(CarlineError::HomeDirNotFound)?;
        fs::create_dir_all(parent).map_err(|source| CarlineError::Io {
            context: format!("create session directory {}", parent.display()),
            source: source.into(),
        })?;

        let mut temp_file = NamedTempFile::new_in(parent).map_err(|source| CarlineError::Io {
            context: "create session temp file".to_string(),
            source,
        })?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|source| CarlineError::Io {
                context: "write session temp file".to_string(),
                source,
            })?;
        temp_file.flush().map_err(|source| CarlineError::Io {
            context: "flush session temp file".to_string(),
            source,
        })?;
        temp_file
            .persist(&self.path)
            .map_err(|err| CarlineError::Io {
                context: format!("replace session file {}", self.path.display()),
                source: err.error,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked_guest() -> Session {
        Session {
            role: Role::Guest,
            tracked_record: Some("rec-7".to_string()),
        }
    }

    #[test]
    fn login_sets_teacher_and_keeps_tracked_record() {
        let next = next_session(&tracked_guest(), SessionEvent::LoginSucceeded);
        assert_eq!(next.role, Role::Teacher);
        assert_eq!(next.tracked_record.as_deref(), Some("rec-7"));
    }

    #[test]
    fn logout_clears_only_the_role() {
        let teacher = next_session(&tracked_guest(), SessionEvent::LoginSucceeded);
        let next = next_session(&teacher, SessionEvent::LoggedOut);
        assert_eq!(next.role, Role::Guest);
        assert_eq!(next.tracked_record.as_deref(), Some("rec-7"));
    }

    #[test]
    fn submission_tracks_record_without_touching_role() {
        let teacher = next_session(&Session::default(), SessionEvent::LoginSucceeded);
        let next = next_session(
            &teacher,
            SessionEvent::SubmissionTracked("rec-9".to_string()),
        );
        assert_eq!(next.role, Role::Teacher);
        assert_eq!(next.tracked_record.as_deref(), Some("rec-9"));
    }

    #[test]
    fn tracking_cleared_drops_record_only() {
        let next = next_session(&tracked_guest(), SessionEvent::TrackingCleared);
        assert_eq!(next.role, Role::Guest);
        assert!(next.tracked_record.is_none());
    }

    #[test]
    fn verify_access_code_requires_exact_match() {
        assert!(verify_access_code("2468", "2468").is_ok());
        assert!(verify_access_code("2468 ", "2468").is_err());
        assert!(verify_access_code("", "2468").is_err());
        assert!(verify_access_code("sunflower", "2468").is_err());
    }

    #[test]
    fn routing_prefers_teacher_over_tracked_record() {
        let teacher = next_session(&tracked_guest(), SessionEvent::LoginSucceeded);
        assert_eq!(route(&teacher), StartView::TeacherDashboard);
    }

    #[test]
    fn routing_tracks_open_record_for_guests() {
        assert_eq!(
            route(&tracked_guest()),
            StartView::ParentTracking("rec-7".to_string())
        );
        assert_eq!(route(&Session::default()), StartView::SubmissionForm);
    }

    #[test]
    fn session_round_trips_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("session.json"));

        let session = Session {
            role: Role::Teacher,
            tracked_record: Some("rec-3".to_string()),
        };
        store.save(&session).expect("save");
        assert_eq!(store.load(), session);
    }

    #[test]
    fn missing_session_file_loads_guest_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn corrupt_session_file_loads_guest_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{broken").expect("write");
        let store = SessionStore::new(path);
        assert_eq!(store.load(), Session::default());
    }

    #[test]
    fn version_mismatch_loads_guest_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"version": 9, "role": "teacher"}"#).expect("write");
        let store = SessionStore::new(path);
        assert_eq!(store.load(), Session::default());
    }
}
