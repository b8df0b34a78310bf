//! On-disk follow targets, keyed by room.
//!
//! The follow target is the only client state that survives a restart.
//! The file is a flat JSON object: `{ "AB12CD34": "<user uuid>", ... }`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::presence::FollowTarget;
use crate::room::RoomId;

#[derive(Debug, Error)]
pub enum FollowStoreError {
    #[error("follow store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("follow store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct FollowStore {
    path: PathBuf,
    targets: BTreeMap<String, Uuid>,
}

impl FollowStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FollowStoreError> {
        let path = path.into();
        let targets = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, targets })
    }

    /// Follow target remembered for `room`.
    pub fn load(&self, room: &RoomId) -> FollowTarget {
        FollowTarget::from(self.targets.get(room.as_str()).copied())
    }

    /// Remember (or forget) the follow target for `room` and write the file.
    pub fn save(&mut self, room: &RoomId, target: &FollowTarget) -> Result<(), FollowStoreError> {
        match target.get() {
            Some(user_id) => {
                self.targets.insert(room.as_str().to_string(), user_id);
            }
            None => {
                self.targets.remove(room.as_str());
            }
        }
        self.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), FollowStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&self.targets)?)?;
        log::debug!("wrote {} follow targets to {}", self.targets.len(), self.path.display());
        Ok(())
    }
}
