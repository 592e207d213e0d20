//! Shared application context for client commands.

use std::sync::Arc;

use crate::error::Result;
use crate::identity::{Identity, IdentityStore};
use crate::store::{RecordStore, SocketStore};

/// What every client command needs: the record store and who is acting.
pub struct AppContext {
    pub store: Arc<dyn RecordStore>,
    pub identity: Identity,
}

impl AppContext {
    pub fn new(store: Arc<dyn RecordStore>, identity: Identity) -> Self {
        Self { store, identity }
    }

    /// Builds the production context: socket-backed store plus the durable
    /// device identity under the carline home directory.
    pub fn from_environment() -> Result<Self> {
        let store = SocketStore::from_env()?;
        let identity = IdentityStore::at_default_path()?.load_or_create()?;
        Ok(Self::new(Arc::new(store), identity))
    }
}
