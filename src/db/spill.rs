//! Disk cache for status updates the store could not accept.
//!
//! One record per file: the file content is the plain wire encoding of the
//! message, the name is 32 hex digits of a random 128-bit id. Files are
//! written to a temp name and renamed into place, so a record is either
//! fully present or absent; writer and sweeper coordinate through file
//! presence alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use prost::Message;

use crate::protobuf::meshtastic::KiezboxMessage;

/// Extension of finished record files; everything else in the cache
/// directory is ignored.
pub const SPILL_EXTENSION: &str = "pb";

/// Persist one message under a fresh random name. Creates the directory on
/// first use.
pub fn spill_message(dir: &Path, message: &KiezboxMessage) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
    let name = format!("{:032x}.{}", rand::random::<u128>(), SPILL_EXTENSION);
    let tmp = dir.join(format!(".{}.tmp", name));
    let path = dir.join(name);

    fs::write(&tmp, message.encode_to_vec())
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("failed to move record into {}", path.display()))?;
    Ok(path)
}

/// Read one cached record back.
pub fn read_message(path: &Path) -> Result<KiezboxMessage> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    KiezboxMessage::decode(bytes.as_slice())
        .with_context(|| format!("failed to decode {}", path.display()))
}

/// List finished record files. A missing directory is an empty cache, not
/// an error.
pub fn list_records(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to list cache directory {}", dir.display()))
        }
    };
    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(SPILL_EXTENSION)
        {
            records.push(path);
        }
    }
    Ok(records)
}

/// Remove a record, tolerating that the file may already be gone.
pub fn remove_record(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
    }
}
