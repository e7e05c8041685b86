//! Filesystem cache of raw source payloads.
//!
//! One JSON document per (source kind, request key), named after the digest
//! of the key. Entries are written to a temporary file in the same directory
//! and renamed into place, so readers see either the previous or the new
//! complete entry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tempfile::NamedTempFile;

use crate::config::SourceKind;
use crate::errors::*;

pub type CacheResult<T> = Result<T, CacheError>;

/// Size and modification time reported by a remote, used for change
/// detection without downloading the payload.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: Option<u64>,
    pub modified: Option<String>,
}

impl Fingerprint {
    pub fn is_known(&self) -> bool {
        self.size.is_some() || self.modified.is_some()
    }

    /// True when both fingerprints share at least one known field and no
    /// shared field differs.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        let mut compared = false;
        if let (Some(a), Some(b)) = (self.size, other.size) {
            if a != b {
                return false;
            }
            compared = true;
        }
        if let (Some(a), Some(b)) = (&self.modified, &other.modified) {
            if a != b {
                return false;
            }
            compared = true;
        }
        compared
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    pub fingerprint: Option<Fingerprint>,
    /// Seconds since the unix epoch.
    pub stored_at: u64,
}

impl CacheEntry {
    pub fn is_stale(&self, probe: &Fingerprint) -> bool {
        match &self.fingerprint {
            Some(stored) if probe.is_known() => !stored.matches(probe),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new<P: AsRef<Path>>(root: P) -> CacheResult<CacheStore> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context(CacheIoSnafu { path: root.clone() })?;
        Ok(CacheStore { root })
    }

    pub fn entry_path(&self, kind: SourceKind, key: &str) -> PathBuf {
        self.root
            .join(kind.as_str())
            .join(format!("{}.json", sha256::digest(key)))
    }

    pub fn get(&self, kind: SourceKind, key: &str) -> CacheResult<Option<CacheEntry>> {
        let path = self.entry_path(kind, key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).context(CacheIoSnafu { path: path.clone() })?;
        let entry: CacheEntry =
            serde_json::from_str(&contents).context(CacheJsonSnafu { path: path.clone() })?;
        if entry.key != key {
            debug!("cache: digest collision on {:?}, ignoring entry", path);
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn put(
        &self,
        kind: SourceKind,
        key: &str,
        payload: &str,
        fingerprint: Option<Fingerprint>,
    ) -> CacheResult<()> {
        let path = self.entry_path(kind, key);
        let dir = self.root.join(kind.as_str());
        fs::create_dir_all(&dir).context(CacheIoSnafu { path: dir.clone() })?;

        let entry = CacheEntry {
            key: key.to_string(),
            payload: payload.to_string(),
            fingerprint,
            stored_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        let mut tmp = NamedTempFile::new_in(&dir).context(CacheIoSnafu { path: dir.clone() })?;
        serde_json::to_writer(&mut tmp, &entry).context(CacheJsonSnafu { path: path.clone() })?;
        tmp.flush()
            .context(CacheIoSnafu { path: tmp.path().to_path_buf() })?;
        tmp.as_file()
            .sync_all()
            .context(CacheIoSnafu { path: tmp.path().to_path_buf() })?;
        tmp.persist(&path).context(PersistSnafu { path: path.clone() })?;
        debug!("cache: stored {} bytes for {} {:?}", payload.len(), kind, key);
        Ok(())
    }

    /// Whether the cached entry differs from what the remote reports. A
    /// missing entry, or a probe with nothing to compare, counts as stale.
    pub fn is_stale(&self, kind: SourceKind, key: &str, probe: &Fingerprint) -> CacheResult<bool> {
        Ok(self
            .get(kind, key)?
            .map(|entry| entry.is_stale(probe))
            .unwrap_or(true))
    }
}
