//! Checksummed checkpoint files
//!
//! A checkpoint is a bincode envelope around a model-specific payload. The
//! envelope records which model wrote it and a SHA-256 of the payload bytes,
//! so truncated or foreign files are rejected before any state is replaced.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Model variant that wrote a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    Random,
    Xgb,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointKind::Random => write!(f, "random"),
            CheckpointKind::Xgb => write!(f, "xgb"),
        }
    }
}

/// On-disk wrapper of every checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    pub kind: CheckpointKind,
    pub saved_at: DateTime<Utc>,
    /// Hex SHA-256 of `payload`
    pub checksum: String,
    pub payload: Vec<u8>,
}

/// Serialize `payload` and write it atomically to `path`
pub fn save<T: Serialize>(path: &Path, kind: CheckpointKind, payload: &T) -> Result<()> {
    let payload = bincode::serialize(payload)?;
    let envelope = CheckpointEnvelope {
        kind,
        saved_at: Utc::now(),
        checksum: compute_checksum(&payload),
        payload,
    };
    let bytes = bincode::serialize(&envelope)?;
    write_atomic(path, &bytes)?;

    info!(
        path = %path.display(),
        kind = %kind,
        bytes = bytes.len(),
        checksum = %envelope.checksum,
        "Checkpoint saved"
    );
    Ok(())
}

/// Read and verify a checkpoint of the expected kind
pub fn load<T: DeserializeOwned>(path: &Path, kind: CheckpointKind) -> Result<T> {
    let envelope = read_envelope(path)?;
    if envelope.kind != kind {
        return Err(Error::integrity(
            path,
            format!("expected a {} checkpoint, found {}", kind, envelope.kind),
        ));
    }
    let payload = bincode::deserialize(&envelope.payload)
        .map_err(|e| Error::integrity(path, format!("undecodable payload: {}", e)))?;

    debug!(
        path = %path.display(),
        kind = %kind,
        saved_at = %envelope.saved_at,
        "Checkpoint loaded"
    );
    Ok(payload)
}

/// Read the envelope and verify its checksum without decoding the payload
pub fn read_envelope(path: &Path) -> Result<CheckpointEnvelope> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let envelope: CheckpointEnvelope = bincode::deserialize(&bytes)
        .map_err(|e| Error::integrity(path, format!("undecodable envelope: {}", e)))?;

    let computed = compute_checksum(&envelope.payload);
    if computed != envelope.checksum {
        return Err(Error::integrity(
            path,
            format!(
                "checksum mismatch: expected {}, got {}",
                envelope.checksum, computed
            ),
        ));
    }
    Ok(envelope)
}

/// Write to a sibling temp file, fsync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);
    let mut file = File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
    file.write_all(bytes).map_err(|e| Error::io(&temp_path, e))?;
    file.sync_all().map_err(|e| Error::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io(path, e)
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Hex SHA-256 of `data`
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
