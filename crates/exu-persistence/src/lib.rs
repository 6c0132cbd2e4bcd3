//! ---
//! exu_section: "03-persistence-logging"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Persistence abstractions and storage bindings."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Durable settings for the update engine. The only persisted value is the
//! timestamp of the last successful reconciliation.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing settings files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a settings file fails integrity verification.
    #[error("settings hash mismatch in {0}")]
    HashMismatch(String),
    /// Reported when a settings file was written by an unknown format version.
    #[error("unsupported settings version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found on disk.
        found: u16,
        /// Version understood by this build.
        expected: u16,
    },
}

pub mod settings;

pub use settings::{
    JsonSettingsStore, MemorySettingsStore, PersistedSettings, SettingsStore, SETTINGS_VERSION,
};
