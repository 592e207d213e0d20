//! File-backed persistence for the record collection.
//!
//! The collection is small (one school's pickup queue), so the whole map is
//! written on every commit as a versioned JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "records": {
//!     "rec-...": { ... PickupRecord fields ... }
//!   }
//! }
//! ```
//!
//! A missing, empty, corrupt, or version-mismatched file starts an empty
//! collection with a warning instead of failing startup. Saves go through a
//! temp file in the same directory plus rename, so a crash mid-write never
//! leaves a truncated store behind.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use carline_store_protocol::PickupRecord;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: HashMap<String, PickupRecord>,
}

pub fn load(path: &Path) -> HashMap<String, PickupRecord> {
    if !path.exists() {
        return HashMap::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Failed to read store file; starting empty");
            return HashMap::new();
        }
    };

    if content.trim().is_empty() {
        warn!(path = %path.display(), "Store file is empty; starting empty");
        return HashMap::new();
    }

    match serde_json::from_str::<StoreFile>(&content) {
        Ok(store_file) if store_file.version == STORE_VERSION => store_file.records,
        Ok(store_file) => {
            warn!(
                found = store_file.version,
                expected = STORE_VERSION,
                "Unsupported store file version; starting empty"
            );
            HashMap::new()
        }
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Failed to parse store file; starting empty");
            HashMap::new()
        }
    }
}

pub fn save(path: &Path, records: &HashMap<String, PickupRecord>) -> Result<(), String> {
    let store_file = StoreFile {
        version: STORE_VERSION,
        records: records.clone(),
    };

    let content = serde_json::to_string_pretty(&store_file)
        .map_err(|err| format!("Failed to serialize store file: {}", err))?;

    let parent_dir = path
        .parent()
        .ok_or_else(|| "Store file path has no parent directory".to_string())?;
    fs::create_dir_all(parent_dir)
        .map_err(|err| format!("Failed to create store directory: {}", err))?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|err| format!("Temp file error: {}", err))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|err| format!("Failed to write temp store file: {}", err))?;
    temp_file
        .flush()
        .map_err(|err| format!("Failed to flush temp store file: {}", err))?;
    temp_file
        .persist(path)
        .map_err(|err| format!("Failed to replace store file: {}", err.error))?;

    Ok(())
}
