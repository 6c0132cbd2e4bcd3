//! ---
//! exu_section: "03-persistence-logging"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Persistence abstractions and storage bindings."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{PersistenceError, Result};

/// Current settings envelope version.
pub const SETTINGS_VERSION: u16 = 1;

/// Values that survive engine restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Seconds since the epoch of the last successful reconciliation. Zero
    /// when no check has ever succeeded.
    #[serde(default)]
    pub last_check: i64,
}

/// Storage backend for [`PersistedSettings`].
pub trait SettingsStore: Send + Sync + Debug {
    /// Read the current settings.
    fn load(&self) -> Result<PersistedSettings>;
    /// Replace the stored settings.
    fn save(&self, settings: &PersistedSettings) -> Result<()>;

    /// Convenience accessor for the last-check timestamp.
    fn last_check(&self) -> Result<i64> {
        Ok(self.load()?.last_check)
    }

    /// Convenience writer for the last-check timestamp.
    fn set_last_check(&self, timestamp: i64) -> Result<()> {
        let mut settings = self.load()?;
        settings.last_check = timestamp;
        self.save(&settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u16,
    updated_at: DateTime<Utc>,
    hash: String,
    settings: PersistedSettings,
}

/// JSON file backend. The envelope carries a SHA-256 of the payload which is
/// verified on open.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    cached: Mutex<PersistedSettings>,
}

impl JsonSettingsStore {
    /// Open the store, creating the parent directory when needed. A missing
    /// file yields default settings; an unreadable or corrupt file is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let settings = if path.exists() {
            read_envelope(&path)?
        } else {
            debug!(path = %path.display(), "settings file missing; using defaults");
            PersistedSettings::default()
        };
        Ok(Self {
            path,
            cached: Mutex::new(settings),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<PersistedSettings> {
        Ok(*self.cached.lock())
    }

    fn save(&self, settings: &PersistedSettings) -> Result<()> {
        let envelope = SettingsEnvelope {
            version: SETTINGS_VERSION,
            updated_at: Utc::now(),
            hash: compute_hash(settings)?,
            settings: *settings,
        };
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &envelope)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        *self.cached.lock() = *settings;
        debug!(path = %self.path.display(), last_check = settings.last_check, "settings persisted");
        Ok(())
    }
}

/// In-memory backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<PersistedSettings>,
}

impl MemorySettingsStore {
    /// Create a store pre-populated with a last-check timestamp.
    pub fn with_last_check(last_check: i64) -> Self {
        Self {
            inner: Mutex::new(PersistedSettings { last_check }),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<PersistedSettings> {
        Ok(*self.inner.lock())
    }

    fn save(&self, settings: &PersistedSettings) -> Result<()> {
        *self.inner.lock() = *settings;
        Ok(())
    }
}

fn read_envelope(path: &Path) -> Result<PersistedSettings> {
    let bytes = fs::read(path)?;
    let envelope: SettingsEnvelope = serde_json::from_slice(&bytes)?;
    if envelope.version != SETTINGS_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: envelope.version,
            expected: SETTINGS_VERSION,
        });
    }
    if envelope.hash != compute_hash(&envelope.settings)? {
        return Err(PersistenceError::HashMismatch(path.display().to_string()));
    }
    Ok(envelope.settings)
}

fn compute_hash(settings: &PersistedSettings) -> Result<String> {
    let json = serde_json::to_vec(settings)?;
    Ok(hex::encode(Sha256::digest(&json)))
}
