//! File-backed relay state.
//!
//! Implements [`RelayStateStore`] with a small postcard-encoded record, so
//! the relay process can drive the pin to its last commanded level on boot
//! before the broker is reachable.  Writes go to a temporary file that is
//! renamed over the old one; a crash mid-write leaves the previous record.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{RelayStateStore, StoreError};
use crate::records::SwitchState;

const RECORD_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RelayRecord {
    version: u8,
    state: SwitchState,
}

pub struct FileRelayState {
    path: PathBuf,
}

impl FileRelayState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RelayStateStore for FileRelayState {
    fn load(&self) -> Result<Option<SwitchState>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("relay state: {} absent, no state to restore", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        let record: RelayRecord =
            postcard::from_bytes(&bytes).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        if record.version != RECORD_VERSION {
            warn!(
                "relay state: unknown record version {}, ignoring",
                record.version
            );
            return Ok(None);
        }
        Ok(Some(record.state))
    }

    fn save(&mut self, state: SwitchState) -> Result<(), StoreError> {
        let record = RelayRecord {
            version: RECORD_VERSION,
            state,
        };
        let bytes =
            postcard::to_allocvec(&record).map_err(|e| StoreError::Corrupted(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
