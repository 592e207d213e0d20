//! Device identity for attribution fields.
//!
//! Identity here is ambient, not an account: a stable generated id plus an
//! optional display label, created on first use and shared by both roles on
//! the device. Teacher writes stamp the current id and label onto the record
//! so the dashboard can show who handled it. Logging out does not touch the
//! identity; only the session role flag changes.

use std::io::Write;
use std::path::PathBuf;

use fs_err as fs;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::config;
use crate::error::{CarlineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Identity {
    /// Display label for attribution: the chosen name, or the raw id until
    /// one is set.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_path() -> Result<Self> {
        config::get_identity_path()
            .map(Self::new)
            .ok_or(CarlineError::HomeDirNotFound)
    }

    /// Loads the device identity, generating and persisting a fresh one when
    /// the file is missing or unreadable.
    pub fn load_or_create(&self) -> Result<Identity> {
        if self.path.exists() {
            match fs::read_to_string(&self.path) {
                Ok(content) => match serde_json::from_str::<Identity>(&content) {
                    Ok(identity) if !identity.id.trim().is_empty() => return Ok(identity),
                    Ok(_) => {
                        warn!("Identity file has an empty id; regenerating");
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to parse identity file; regenerating");
                    }
                },
                Err(err) => {
                    warn!(error = %err, "Failed to read identity file; regenerating");
                }
            }
        }

        let identity = Identity {
            id: make_identity_id(),
            name: None,
        };
        self.save(&identity)?;
        Ok(identity)
    }

    /// Sets the display label used for future attribution writes.
    pub fn set_name(&self, name: &str) -> Result<Identity> {
        let mut identity = self.load_or_create()?;
        let trimmed = name.trim();
        identity.name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self.save(&identity)?;
        Ok(identity)
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        let content = serde_json::to_string_pretty(identity).map_err(|source| CarlineError::Json {
            context: "serialize identity".to_string(),
            source,
        })?;

        let parent = self.path.parent().ok_or(CarlineError::HomeDirNotFound)?;
        fs::create_dir_all(parent).map_err(|source| CarlineError::Io {
            context: format!("create identity directory {}", parent.display()),
            source: source.into(),
        })?;

        let mut temp_file = NamedTempFile::new_in(parent).map_err(|source| CarlineError::Io {
            context: "create identity temp file".to_string(),
            source,
        })?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|source| CarlineError::Io {
                context: "write identity temp file".to_string(),
                source,
            })?;
        temp_file.flush().map_err(|source| CarlineError::Io {
            context: "flush identity temp file".to_string(),
            source,
        })?;
        temp_file
            .persist(&self.path)
            .map_err(|err| CarlineError::Io {
                context: format!("replace identity file {}", self.path.display()),
                source: err.error,
            })?;

        Ok(())
    }
}

fn make_identity_id() -> String {
    let noise = rand::thread_rng().next_u64() & 0xffff_ffff_ffff;
    format!("usr-{:012x}", noise)
}
