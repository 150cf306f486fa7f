use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stratus_domain::{DeploymentId, PHASE_RECORD_VERSION, PhaseRecord};
use tracing::debug;

use crate::error::ArtifactError;
use crate::fs_util::{remove_if_exists, write_atomic};

/// Reads and writes the phase record of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStore {
    path: PathBuf,
    deployment: DeploymentId,
}

impl PhaseStore {
    #[must_use]
    pub const fn new(path: PathBuf, deployment: DeploymentId) -> Self {
        Self { path, deployment }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, or a fresh `not-deployed` record when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be read or decoded, or was
    /// written by a newer version.
    pub fn load(&self) -> Result<PhaseRecord, ArtifactError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no phase record; starting fresh");
                return Ok(PhaseRecord::new(self.deployment.clone()));
            }
            Err(source) => {
                return Err(ArtifactError::Io {
                    context: format!("failed to read phase record {}", self.path.display()),
                    source,
                });
            }
        };

        let record: PhaseRecord =
            serde_json::from_slice(&bytes).map_err(|source| ArtifactError::JsonDecode {
                path: self.path.clone(),
                source,
            })?;
        if record.version > PHASE_RECORD_VERSION {
            return Err(ArtifactError::PhaseRecordVersion {
                path: self.path.clone(),
                found: record.version,
                supported: PHASE_RECORD_VERSION,
            });
        }
        debug!(phase = %record.phase, "loaded phase record");
        Ok(record)
    }

    /// Persist the record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be encoded or written.
    pub fn save(&self, record: &PhaseRecord) -> Result<(), ArtifactError> {
        let mut payload =
            serde_json::to_vec_pretty(record).map_err(|source| ArtifactError::JsonEncode {
                path: self.path.clone(),
                source,
            })?;
        payload.push(b'\n');
        write_atomic(&self.path, &payload)?;
        debug!(phase = %record.phase, "saved phase record");
        Ok(())
    }

    /// Delete the record; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be removed.
    pub fn remove(&self) -> Result<bool, ArtifactError> {
        remove_if_exists(&self.path)
    }
}
