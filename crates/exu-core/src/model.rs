//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host-reported install/run status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Enabled,
    Disabled,
    Downloading,
    Uninstalled,
    Error,
}

impl LifecycleState {
    /// Only enabled or errored components are offered to the repository.
    pub fn participates_in_checks(self) -> bool {
        matches!(self, LifecycleState::Enabled | LifecycleState::Error)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Enabled => "enabled",
            LifecycleState::Disabled => "disabled",
            LifecycleState::Downloading => "downloading",
            LifecycleState::Uninstalled => "uninstalled",
            LifecycleState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Where the host found a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// Installed for the current user; the only kind the updater manages.
    PerUser,
    /// Installed system-wide by a package manager.
    System,
}

/// Opaque version token as published by the repository (usually an integer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(pub Value);

impl VersionToken {
    /// Wire representation of the token.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<u64> for VersionToken {
    fn from(value: u64) -> Self {
        Self(Value::from(value))
    }
}

impl From<&str> for VersionToken {
    fn from(value: &str) -> Self {
        Self(Value::from(value))
    }
}

/// A component as enumerated by the host, before any filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostComponent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<VersionToken>,
    pub kind: ComponentKind,
    pub state: LifecycleState,
}

/// Inventory entry for a component eligible for updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRecord {
    pub id: String,
    pub name: String,
    pub installed_version: Option<VersionToken>,
    pub lifecycle_state: LifecycleState,
}

impl ComponentRecord {
    /// Whether this record is offered to the repository in a bulk query.
    pub fn is_checkable(&self) -> bool {
        self.installed_version.is_some() && self.lifecycle_state.participates_in_checks()
    }
}

impl From<HostComponent> for ComponentRecord {
    fn from(component: HostComponent) -> Self {
        Self {
            id: component.id,
            name: component.name,
            installed_version: component.version,
            lifecycle_state: component.state,
        }
    }
}

/// A component the repository reported as upgradable in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub target_version_tag: Option<String>,
}

impl PendingUpdate {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            target_version_tag: None,
        }
    }

    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.target_version_tag = Some(tag.into());
        self
    }
}

/// Lifecycle notification delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: String,
    pub state: LifecycleState,
    #[serde(default)]
    pub error: Option<String>,
}

impl LifecycleEvent {
    pub fn new(id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            id: id.into(),
            state,
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: LifecycleState::Error,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_enabled_and_error_participate() {
        let participating: Vec<_> = [
            LifecycleState::Enabled,
            LifecycleState::Disabled,
            LifecycleState::Downloading,
            LifecycleState::Uninstalled,
            LifecycleState::Error,
        ]
        .into_iter()
        .filter(|state| state.participates_in_checks())
        .collect();
        assert_eq!(
            participating,
            vec![LifecycleState::Enabled, LifecycleState::Error]
        );
    }

    #[test]
    fn record_without_version_is_not_checkable() {
        let record = ComponentRecord {
            id: "a@example.com".into(),
            name: "A".into(),
            installed_version: None,
            lifecycle_state: LifecycleState::Enabled,
        };
        assert!(!record.is_checkable());
    }

    #[test]
    fn version_token_displays_strings_unquoted() {
        assert_eq!(VersionToken::from("12").to_string(), "12");
        assert_eq!(VersionToken::from(12u64).to_string(), "12");
    }
}
