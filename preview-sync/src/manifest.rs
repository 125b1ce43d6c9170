//! Dependency-manifest fingerprinting.
//!
//! The digest of the manifests recorded after the last successful install
//! lives at `<working copy>/.git/preview-dependencies.sha256`, inside the git
//! directory so that `git reset --hard` leaves it alone. Writes use the
//! atomic `.tmp` + rename pattern.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

const STORE_FILE: &str = "preview-dependencies.sha256";

/// Where the recorded fingerprint for `working_copy` is kept.
pub fn store_path(working_copy: &Path) -> PathBuf {
    working_copy.join(".git").join(STORE_FILE)
}

/// SHA-256 over every manifest, in the given order.
///
/// Absent manifests contribute a marker so that adding or removing a
/// lockfile changes the digest.
pub fn fingerprint(working_copy: &Path, manifests: &[String]) -> Result<String, SyncError> {
    let mut hasher = Sha256::new();
    for name in manifests {
        let path = working_copy.join(name);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        match std::fs::read(&path) {
            Ok(bytes) => {
                hasher.update([1u8]);
                hasher.update(&bytes);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => hasher.update([0u8]),
            Err(e) => return Err(io_err(&path, e)),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The fingerprint recorded after the last install, if any.
pub fn load(working_copy: &Path) -> Result<Option<String>, SyncError> {
    let path = store_path(working_copy);
    match std::fs::read_to_string(&path) {
        Ok(s) => Ok(Some(s.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(&path, e)),
    }
}

/// Record `digest` as the installed fingerprint.
pub fn save(working_copy: &Path, digest: &str) -> Result<(), SyncError> {
    let path = store_path(working_copy);
    let tmp = path.with_extension("sha256.tmp");
    std::fs::write(&tmp, digest).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
