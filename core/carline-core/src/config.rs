//! Configuration loading and dot-directory paths.
//!
//! Everything carline persists lives under `~/.carline`: the app config, the
//! device identity, the session file, the store daemon's collection file and
//! socket, and the client log directory.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use fs_err as fs;

/// Environment override for the store socket path, honored by the daemon and
/// every client.
pub const SOCKET_ENV: &str = "CARLINE_STORE_SOCKET";

const SOCKET_NAME: &str = "store.sock";

/// Fallback shared access code used when no config file exists. Deployments
/// are expected to set their own in `config.json`.
pub const DEFAULT_ACCESS_CODE: &str = "2468";

/// Returns the path to the carline directory (~/.carline).
pub fn get_carline_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".carline"))
}

/// Returns the path to the app configuration file.
pub fn get_config_path() -> Option<PathBuf> {
    get_carline_dir().map(|d| d.join("config.json"))
}

/// Returns the path to the durable session file.
pub fn get_session_path() -> Option<PathBuf> {
    get_carline_dir().map(|d| d.join("session.json"))
}

/// Returns the path to the device identity file.
pub fn get_identity_path() -> Option<PathBuf> {
    get_carline_dir().map(|d| d.join("identity.json"))
}

/// Returns the client log directory.
pub fn get_logs_dir() -> Option<PathBuf> {
    get_carline_dir().map(|d| d.join("logs"))
}

/// Returns the store daemon socket path, honoring `CARLINE_STORE_SOCKET`.
pub fn get_socket_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    get_carline_dir().map(|d| d.join(SOCKET_NAME))
}

/// App configuration. Today this is just the shared teacher access code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub access_code: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            access_code: DEFAULT_ACCESS_CODE.to_string(),
        }
    }
}

/// Loads the app configuration, returning defaults if the file is missing or
/// unreadable.
pub fn load_app_config() -> AppConfig {
    get_config_path()
        .map(|p| load_app_config_from(&p))
        .unwrap_or_default()
}

/// Loads the app configuration from an explicit path, with the same defaults.
pub fn load_app_config_from(path: &Path) -> AppConfig {
    fs::read_to_string(path)
        .ok()
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default()
}
