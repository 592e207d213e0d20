//! Command implementations.
//!
//! Each command loads what it needs and prints through [`crate::render`].
//! Session state is read once in `main` and passed down; commands that
//! change it persist the next session value before printing.

use chrono::Utc;
use clap::{Args, ValueEnum};
use tracing::{info, warn};

use carline_core::actions::{self, SubmitForm, TeacherAction};
use carline_core::config;
use carline_core::error::{CarlineError, Result};
use carline_core::session::{
    next_session, route, verify_access_code, Session, SessionEvent, SessionStore, StartView,
};
use carline_core::store::{RecordStore, WatchEvent};
use carline_core::tracking::{TrackingUpdate, TrackingView};
use carline_core::{AppContext, IdentityStore};
use carline_store_protocol::ParentStatus;

use crate::render;

/// The parent's situation, as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// At the school door
    Arrived,
    /// A few minutes away
    FiveMins,
    /// Asking for the student to be made ready
    Ready,
    /// Student is absent today
    Absent,
    /// Parked; asking the teacher to bring the student out
    ParkTeacher,
    /// Parked; walking up to collect
    ParkParent,
    /// Message only
    Message,
}

impl StatusArg {
    fn into_status(self) -> ParentStatus {
        match self {
            StatusArg::Arrived => ParentStatus::Arrived,
            StatusArg::FiveMins => ParentStatus::FiveMins,
            StatusArg::Ready => ParentStatus::Ready,
            StatusArg::Absent => ParentStatus::Absent,
            StatusArg::ParkTeacher => ParentStatus::ParkTeacher,
            StatusArg::ParkParent => ParentStatus::ParkParent,
            StatusArg::Message => ParentStatus::Message,
        }
    }
}

#[derive(Args)]
pub struct SubmitArgs {
    /// Parent or guardian name
    #[arg(long)]
    pub parent_name: String,
    /// Student name(s) being picked up
    #[arg(long)]
    pub students: String,
    /// Who is picking up, when it is not the parent
    #[arg(long)]
    pub helper: Option<String>,
    /// Situation at the pickup line
    #[arg(long, value_enum, default_value = "arrived")]
    pub status: StatusArg,
    /// Arrival estimate, used with --status five-mins
    #[arg(long)]
    pub eta: Option<String>,
    /// Note for the teacher
    #[arg(long)]
    pub message: Option<String>,
}

#[derive(Args)]
pub struct TrackArgs {
    /// Record id; defaults to this device's tracked submission
    pub record_id: Option<String>,
    /// Render the current state once and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Args)]
pub struct DashboardArgs {
    /// Render the current dashboard once and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Args)]
pub struct LoginArgs {
    /// Shared teacher access code
    #[arg(long)]
    pub code: String,
    /// Display name shown to parents on your updates
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct RecordArg {
    /// Record id
    pub record_id: String,
}

#[derive(Args)]
pub struct ReplyArgs {
    /// Record id
    pub record_id: String,
    /// Reply text; blank text sends nothing
    pub message: String,
}

/// No subcommand: mount whatever the saved session points at.
pub fn open(sessions: &SessionStore, session: &Session) -> Result<()> {
    match route(session) {
        StartView::TeacherDashboard => dashboard(session, DashboardArgs { once: false }),
        StartView::ParentTracking(record_id) => track(
            sessions,
            session,
            TrackArgs {
                record_id: Some(record_id),
                once: false,
            },
        ),
        StartView::SubmissionForm => {
            println!("No active pickup request on this device.");
            println!("Submit one with:");
            println!("  carline submit --parent-name \"Your name\" --students \"Student name(s)\"");
            Ok(())
        }
    }
}

pub fn submit(sessions: &SessionStore, session: &Session, args: SubmitArgs) -> Result<()> {
    let context = AppContext::from_environment()?;

    let form = SubmitForm {
        parent_name: args.parent_name,
        student_names: args.students,
        pickup_helper: args.helper,
        status: args.status.into_status(),
        eta_choice: args.eta,
        message: args.message,
    };
    let record = actions::submit(context.store.as_ref(), form)?;

    let next = next_session(session, SessionEvent::SubmissionTracked(record.id.clone()));
    sessions.save(&next)?;

    info!(record_id = %record.id, "Submission created");
    println!("{}", render::format_submission(&record));
    println!("Run `carline track` to follow it.");
    Ok(())
}

pub fn track(sessions: &SessionStore, session: &Session, args: TrackArgs) -> Result<()> {
    let context = AppContext::from_environment()?;
    track_with_store(context.store.as_ref(), sessions, session, args)
}

fn track_with_store(
    store: &dyn RecordStore,
    sessions: &SessionStore,
    session: &Session,
    args: TrackArgs,
) -> Result<()> {
    let record_id = match args.record_id.or_else(|| session.tracked_record.clone()) {
        Some(record_id) => record_id,
        None => {
            println!("No pickup request to track. Submit one with `carline submit`.");
            return Ok(());
        }
    };

    let watch = store.watch_record(&record_id)?;
    let mut view = TrackingView::new();

    loop {
        let event = watch.recv().ok_or(CarlineError::SubscriptionLost {
            context: "record watch channel closed".to_string(),
        })?;
        let snapshot = match event {
            WatchEvent::Snapshot(snapshot) => snapshot,
            WatchEvent::Lost(reason) => {
                warn!(%reason, "Record watch ended");
                println!("{}", render::format_stream_end(&reason));
                return Ok(());
            }
        };

        match view.observe(snapshot) {
            TrackingUpdate::Live(tracked) => {
                println!("{}", render::format_tracking(&tracked));
                if args.once {
                    return Ok(());
                }
            }
            TrackingUpdate::Reset => {
                if session.tracked_record.as_deref() == Some(record_id.as_str()) {
                    let next = next_session(session, SessionEvent::TrackingCleared);
                    sessions.save(&next)?;
                }
                println!("This pickup request was archived by the school.");
                println!("Submit a new one with `carline submit` next time.");
                return Ok(());
            }
            TrackingUpdate::Idle => {}
        }
    }
}

pub fn dashboard(session: &Session, args: DashboardArgs) -> Result<()> {
    require_teacher(session)?;

    let context = AppContext::from_environment()?;
    dashboard_with_store(context.store.as_ref(), args)
}

fn dashboard_with_store(store: &dyn RecordStore, args: DashboardArgs) -> Result<()> {
    let watch = store.watch_collection()?;

    loop {
        let event = watch.recv().ok_or(CarlineError::SubscriptionLost {
            context: "collection watch channel closed".to_string(),
        })?;
        match event {
            WatchEvent::Snapshot(records) => {
                let projected = carline_core::dashboard::project(&records, Utc::now());
                println!("{}", render::format_dashboard(&projected));
                if args.once {
                    return Ok(());
                }
            }
            WatchEvent::Lost(reason) => {
                warn!(%reason, "Dashboard watch ended");
                println!("{}", render::format_stream_end(&reason));
                return Ok(());
            }
        }
    }
}

pub fn login(sessions: &SessionStore, session: &Session, args: LoginArgs) -> Result<()> {
    let app_config = config::load_app_config();
    verify_access_code(&args.code, &app_config.access_code)?;

    let next = next_session(session, SessionEvent::LoginSucceeded);
    sessions.save(&next)?;
    info!("Teacher login succeeded");

    if let Some(name) = args.name {
        let identity = IdentityStore::at_default_path()?.set_name(&name)?;
        println!("Signed in as teacher {}.", identity.label());
    } else {
        println!("Signed in as teacher.");
    }
    Ok(())
}

pub fn logout(sessions: &SessionStore, session: &Session) -> Result<()> {
    let next = next_session(session, SessionEvent::LoggedOut);
    sessions.save(&next)?;
    println!("Signed out. Parent views keep working.");
    Ok(())
}

pub fn seen(session: &Session, args: RecordArg) -> Result<()> {
    mark(session, &args.record_id, TeacherAction::Seen)
}

pub fn processing(session: &Session, args: RecordArg) -> Result<()> {
    mark(session, &args.record_id, TeacherAction::Processing)
}

pub fn ready(session: &Session, args: RecordArg) -> Result<()> {
    mark(session, &args.record_id, TeacherAction::Ready)
}

pub fn delivered(session: &Session, args: RecordArg) -> Result<()> {
    mark(session, &args.record_id, TeacherAction::Delivered)
}

pub fn reply(session: &Session, args: ReplyArgs) -> Result<()> {
    require_teacher(session)?;

    let context = AppContext::from_environment()?;
    let action = TeacherAction::Reply(args.message);
    match actions::apply_action(
        context.store.as_ref(),
        &args.record_id,
        &context.identity,
        &action,
    )? {
        Some(record) => {
            info!(record_id = %record.id, "Reply sent");
            println!("Reply sent to {}.", record.parent_name);
        }
        None => println!("Reply was empty; nothing sent."),
    }
    Ok(())
}

pub fn archive(session: &Session, args: RecordArg) -> Result<()> {
    require_teacher(session)?;

    let context = AppContext::from_environment()?;
    if context.store.delete(&args.record_id)? {
        info!(record_id = %args.record_id, "Record archived");
        println!("Archived {}.", args.record_id);
    } else {
        println!("No record {} to archive.", args.record_id);
    }
    Ok(())
}

fn mark(session: &Session, record_id: &str, action: TeacherAction) -> Result<()> {
    require_teacher(session)?;

    let context = AppContext::from_environment()?;
    match actions::apply_action(context.store.as_ref(), record_id, &context.identity, &action)? {
        Some(record) => {
            info!(record_id = %record.id, action = action.label(), "Record updated");
            println!("Marked {} as {}.", record.id, record.teacher_status.as_str());
        }
        None => println!("Nothing to update."),
    }
    Ok(())
}

fn require_teacher(session: &Session) -> Result<()> {
    if session.is_teacher() {
        Ok(())
    } else {
        Err(CarlineError::TeacherRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::mpsc;
    use std::sync::Mutex;

    use carline_core::store::{CollectionWatch, RecordWatch, Watch};
    use carline_core::MemoryStore;
    use carline_store_protocol::{NewRecord, PickupRecord, RecordPatch};

    fn sample_record(id: &str) -> PickupRecord {
        let new = NewRecord {
            parent_name: "Dana Okafor".to_string(),
            student_names: "Femi".to_string(),
            pickup_helper: None,
            status: ParentStatus::Arrived,
            eta: Some("Arrived".to_string()),
            message: None,
            parent_session: Some("ps-1".to_string()),
        };
        PickupRecord::from_submission(id.to_string(), new, "2025-03-10T08:00:00+00:00")
    }

    fn scripted<T>(events: Vec<WatchEvent<T>>) -> Watch<T> {
        let (sender, receiver) = mpsc::channel();
        for event in events {
            let _ = sender.send(event);
        }
        Watch::new(receiver, Box::new(|| {}))
    }

    /// Store whose watches replay a fixed event script, then hang up.
    struct ScriptedStore {
        record_events: Mutex<Vec<WatchEvent<Option<PickupRecord>>>>,
        collection_events: Mutex<Vec<WatchEvent<Vec<PickupRecord>>>>,
    }

    impl ScriptedStore {
        fn with_record_events(events: Vec<WatchEvent<Option<PickupRecord>>>) -> Self {
            Self {
                record_events: Mutex::new(events),
                collection_events: Mutex::new(Vec::new()),
            }
        }

        fn with_collection_events(events: Vec<WatchEvent<Vec<PickupRecord>>>) -> Self {
            Self {
                record_events: Mutex::new(Vec::new()),
                collection_events: Mutex::new(events),
            }
        }
    }

    impl RecordStore for ScriptedStore {
        fn create(&self, _new_record: NewRecord) -> Result<PickupRecord> {
            unreachable!()
        }

        fn merge_update(&self, _record_id: &str, _patch: RecordPatch) -> Result<PickupRecord> {
            unreachable!()
        }

        fn fetch(&self, _record_id: &str) -> Result<Option<PickupRecord>> {
            unreachable!()
        }

        fn list(&self) -> Result<Vec<PickupRecord>> {
            unreachable!()
        }

        fn delete(&self, _record_id: &str) -> Result<bool> {
            unreachable!()
        }

        fn watch_collection(&self) -> Result<CollectionWatch> {
            let events = std::mem::take(&mut *self.collection_events.lock().unwrap());
            Ok(scripted(events))
        }

        fn watch_record(&self, _record_id: &str) -> Result<RecordWatch> {
            let events = std::mem::take(&mut *self.record_events.lock().unwrap());
            Ok(scripted(events))
        }
    }

    #[test]
    fn status_arg_spells_kebab_case() {
        assert_eq!(
            StatusArg::from_str("five-mins", true).expect("parse"),
            StatusArg::FiveMins
        );
        assert_eq!(
            StatusArg::from_str("park-teacher", true).expect("parse"),
            StatusArg::ParkTeacher
        );
        assert!(StatusArg::from_str("lost", true).is_err());
    }

    #[test]
    fn status_arg_maps_onto_wire_statuses() {
        let pairs = [
            (StatusArg::Arrived, ParentStatus::Arrived),
            (StatusArg::FiveMins, ParentStatus::FiveMins),
            (StatusArg::Ready, ParentStatus::Ready),
            (StatusArg::Absent, ParentStatus::Absent),
            (StatusArg::ParkTeacher, ParentStatus::ParkTeacher),
            (StatusArg::ParkParent, ParentStatus::ParkParent),
            (StatusArg::Message, ParentStatus::Message),
        ];
        for (arg, status) in pairs {
            assert_eq!(arg.into_status(), status);
        }
    }

    #[test]
    fn teacher_commands_require_a_teacher_session() {
        let guest = Session::default();
        assert!(matches!(
            require_teacher(&guest),
            Err(CarlineError::TeacherRequired)
        ));

        let teacher = next_session(&guest, SessionEvent::LoginSucceeded);
        assert!(require_teacher(&teacher).is_ok());
    }

    #[test]
    fn track_ends_cleanly_when_the_stream_closes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = SessionStore::new(dir.path().join("session.json"));
        let store = ScriptedStore::with_record_events(vec![
            WatchEvent::Snapshot(Some(sample_record("rec-1"))),
            WatchEvent::Lost("record store closed the watch stream".to_string()),
        ]);

        let args = TrackArgs {
            record_id: Some("rec-1".to_string()),
            once: false,
        };
        track_with_store(&store, &sessions, &Session::default(), args).expect("clean end");
    }

    #[test]
    fn track_errors_when_the_watch_channel_dies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = SessionStore::new(dir.path().join("session.json"));
        let store = ScriptedStore::with_record_events(vec![WatchEvent::Snapshot(Some(
            sample_record("rec-1"),
        ))]);

        let args = TrackArgs {
            record_id: Some("rec-1".to_string()),
            once: false,
        };
        match track_with_store(&store, &sessions, &Session::default(), args) {
            Err(CarlineError::SubscriptionLost { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn vanished_record_clears_the_saved_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = SessionStore::new(dir.path().join("session.json"));
        let session = next_session(
            &Session::default(),
            SessionEvent::SubmissionTracked("rec-1".to_string()),
        );
        sessions.save(&session).expect("save");

        let store = MemoryStore::new();
        let args = TrackArgs {
            record_id: None,
            once: false,
        };
        track_with_store(&store, &sessions, &session, args).expect("reset path");

        assert!(sessions.load().tracked_record.is_none());
    }

    #[test]
    fn vanished_record_keeps_an_unrelated_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = SessionStore::new(dir.path().join("session.json"));
        let session = next_session(
            &Session::default(),
            SessionEvent::SubmissionTracked("rec-1".to_string()),
        );
        sessions.save(&session).expect("save");

        let store = MemoryStore::new();
        let args = TrackArgs {
            record_id: Some("rec-2".to_string()),
            once: false,
        };
        track_with_store(&store, &sessions, &session, args).expect("reset on other id");

        assert_eq!(sessions.load().tracked_record.as_deref(), Some("rec-1"));
    }

    #[test]
    fn dashboard_ends_cleanly_when_the_stream_closes() {
        let store = ScriptedStore::with_collection_events(vec![
            WatchEvent::Snapshot(Vec::new()),
            WatchEvent::Lost("record store closed the watch stream".to_string()),
        ]);
        dashboard_with_store(&store, DashboardArgs { once: false }).expect("clean end");
    }
}
