//! Client-side core for the carline pickup coordination system.
//!
//! Everything the user-facing clients share lives here: session and device
//! identity state, the parent submission flow, teacher actions, the
//! dashboard and tracking projections, and access to the record store
//! daemon. The crate is fully synchronous; clients drive it from plain
//! threads and degrade to sensible defaults when local state is damaged or
//! the store is unreachable.

pub mod actions;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod record;
pub mod session;
pub mod store;
pub mod tracking;

pub use actions::{SubmitForm, TeacherAction};
pub use context::AppContext;
pub use dashboard::{Dashboard, DashboardEntry};
pub use error::{CarlineError, Result};
pub use identity::{Identity, IdentityStore};
pub use record::RecordTime;
pub use session::{Role, Session, SessionEvent, SessionStore, StartView};
pub use store::{
    CollectionWatch, MemoryStore, RecordStore, RecordWatch, SocketStore, Watch, WatchEvent,
};
pub use tracking::{TrackedRecord, TrackingUpdate, TrackingView};
