//! ---
//! exu_section: "05-networking-external-interfaces"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Extension repository protocol and client."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation name marking a component as upgradable.
pub const UPGRADE_OPERATION: &str = "upgrade";

/// Bulk "what needs upgrading" query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateQuery {
    /// `id -> version` or `id -> record`, depending on the payload variant.
    pub installed: IndexMap<String, Value>,
    /// Version tag of the host environment.
    pub host_version: String,
}

impl UpdateQuery {
    /// Query-string pairs as the repository expects them: the installed map
    /// travels JSON-encoded in a single parameter.
    pub fn to_params(&self) -> serde_json::Result<Vec<(&'static str, String)>> {
        Ok(vec![
            ("installed", serde_json::to_string(&self.installed)?),
            ("shell_version", self.host_version.clone()),
        ])
    }
}

/// Bulk query response: one operation descriptor per component id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateInfo(pub IndexMap<String, OperationDescriptor>);

impl UpdateInfo {
    /// Parse a raw response body.
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Iterate over `(id, descriptor)` pairs in response order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OperationDescriptor)> {
        self.0.iter().map(|(id, op)| (id.as_str(), op))
    }

    /// Number of ids named by the response.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the response names no ids at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, OperationDescriptor)> for UpdateInfo {
    fn from_iter<T: IntoIterator<Item = (String, OperationDescriptor)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-id operation. Older repositories answer with a bare string, newer ones
/// with an object that may carry a version tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationDescriptor {
    /// `"upgrade"`, `"none"`, ...
    Bare(String),
    /// `{ "operation": "upgrade", "version_tag": 1234 }`
    Detailed {
        /// Operation name.
        operation: String,
        /// Opaque tag of the version to fetch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version_tag: Option<VersionTag>,
    },
}

impl OperationDescriptor {
    /// Shorthand for a bare upgrade descriptor.
    pub fn upgrade() -> Self {
        Self::Bare(UPGRADE_OPERATION.to_owned())
    }

    /// Shorthand for an upgrade descriptor carrying a version tag.
    pub fn upgrade_to(tag: impl Into<String>) -> Self {
        Self::Detailed {
            operation: UPGRADE_OPERATION.to_owned(),
            version_tag: Some(VersionTag::Text(tag.into())),
        }
    }

    /// Operation name regardless of representation.
    pub fn operation(&self) -> &str {
        match self {
            Self::Bare(op) => op,
            Self::Detailed { operation, .. } => operation,
        }
    }

    /// Whether this descriptor asks for an upgrade.
    pub fn is_upgrade(&self) -> bool {
        self.operation() == UPGRADE_OPERATION
    }

    /// Version tag rendered as an opaque string, when present.
    pub fn version_tag(&self) -> Option<String> {
        match self {
            Self::Bare(_) => None,
            Self::Detailed { version_tag, .. } => version_tag.as_ref().map(VersionTag::render),
        }
    }
}

/// Version tags are numeric on the reference repository but treated as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionTag {
    /// Numeric tag.
    Number(serde_json::Number),
    /// Textual tag.
    Text(String),
}

impl VersionTag {
    fn render(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// Per-item artifact fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Component id.
    pub id: String,
    /// Targeted version; `None` lets the repository resolve the latest.
    pub version_tag: Option<String>,
    /// Version tag of the host environment.
    pub host_version: String,
    /// Extension API version of the host.
    pub api_version: u32,
}

impl FetchRequest {
    /// Query-string pairs; `version_tag` is omitted when not targeted.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(3);
        if let Some(tag) = &self.version_tag {
            params.push(("version_tag", tag.clone()));
        }
        params.push(("shell_version", self.host_version.clone()));
        params.push(("api_version", self.api_version.to_string()));
        params
    }
}
