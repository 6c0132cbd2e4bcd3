//! ---
//! exu_section: "03-persistence-logging"
//! exu_subsection: "tests"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Settings store integration tests."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::fs;

use exu_persistence::{JsonSettingsStore, PersistedSettings, PersistenceError, SettingsStore};
use tempfile::tempdir;

#[test]
fn last_check_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let store = JsonSettingsStore::open(&path).unwrap();
    store.set_last_check(1_700_000_000).unwrap();
    drop(store);

    let reopened = JsonSettingsStore::open(&path).unwrap();
    assert_eq!(
        reopened.load().unwrap(),
        PersistedSettings {
            last_check: 1_700_000_000
        }
    );
}

#[test]
fn tampered_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = JsonSettingsStore::open(&path).unwrap();
    store.set_last_check(100).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, raw.replace("\"last_check\": 100", "\"last_check\": 999")).unwrap();

    let err = JsonSettingsStore::open(&path).unwrap_err();
    assert!(matches!(err, PersistenceError::HashMismatch(_)));
}

#[test]
fn garbage_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "not json").unwrap();

    let err = JsonSettingsStore::open(&path).unwrap_err();
    assert!(matches!(err, PersistenceError::Json(_)));
}

#[test]
fn unknown_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{"version": 9, "updated_at": "2024-01-01T00:00:00Z", "hash": "", "settings": {"last_check": 1}}"#,
    )
    .unwrap();

    let err = JsonSettingsStore::open(&path).unwrap_err();
    assert!(matches!(
        err,
        PersistenceError::UnsupportedVersion { found: 9, .. }
    ));
}
