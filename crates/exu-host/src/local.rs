//! ---
//! exu_section: "06-host-integration"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Filesystem-backed component host."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use exu_common::config::HostConfig;
use exu_core::{
    ComponentHost, ComponentKind, HostComponent, HostError, LifecycleEvent, LifecycleState,
    VersionToken,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::unpack_into;

/// Per-extension descriptor file.
pub const METADATA_FILE: &str = "metadata.json";

const EVENT_CAPACITY: usize = 256;

/// Fields of `metadata.json` the host cares about. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    pub uuid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
}

/// Host backed by a per-user extensions directory plus read-only system
/// directories.
#[derive(Debug)]
pub struct LocalExtensionHost {
    extensions_dir: PathBuf,
    system_dirs: Vec<PathBuf>,
    disabled: HashSet<String>,
    transient: Mutex<HashMap<String, LifecycleState>>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LocalExtensionHost {
    pub fn new(
        extensions_dir: impl Into<PathBuf>,
        system_dirs: Vec<PathBuf>,
        disabled: impl IntoIterator<Item = String>,
    ) -> Result<Self, HostError> {
        let extensions_dir = extensions_dir.into();
        fs::create_dir_all(&extensions_dir)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            extensions_dir,
            system_dirs,
            disabled: disabled.into_iter().collect(),
            transient: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn from_config(config: &HostConfig) -> Result<Self, HostError> {
        Self::new(
            config.extensions_dir.clone(),
            config.system_dirs.clone(),
            config.disabled.iter().cloned(),
        )
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    fn component_dir(&self, id: &str) -> Result<PathBuf, HostError> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\'])
            && id != "..";
        if !valid {
            return Err(HostError::UnknownComponent(id.to_owned()));
        }
        Ok(self.extensions_dir.join(id))
    }

    fn scan(&self, root: &Path, kind: ComponentKind) -> Vec<HostComponent> {
        if !root.is_dir() {
            return Vec::new();
        }
        let transient = self.transient.lock();
        WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() == METADATA_FILE && !in_hidden_dir(entry.path()))
            .filter_map(|entry| match read_metadata(entry.path()) {
                Ok(metadata) => Some(metadata),
                Err(err) => {
                    warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "skipping unreadable extension"
                    );
                    None
                }
            })
            .map(|metadata| {
                let state = transient
                    .get(&metadata.uuid)
                    .copied()
                    .unwrap_or_else(|| self.resting_state(&metadata.uuid));
                HostComponent {
                    id: metadata.uuid,
                    name: metadata.name,
                    version: metadata.version.map(VersionToken),
                    kind,
                    state,
                }
            })
            .collect()
    }

    fn resting_state(&self, id: &str) -> LifecycleState {
        if self.disabled.contains(id) {
            LifecycleState::Disabled
        } else {
            LifecycleState::Enabled
        }
    }
}

fn in_hidden_dir(path: &Path) -> bool {
    path.parent()
        .and_then(Path::file_name)
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn read_metadata(path: &Path) -> Result<ExtensionMetadata, HostError> {
    let id = path
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw).map_err(|err| HostError::Metadata {
        id,
        reason: err.to_string(),
    })
}

#[async_trait]
impl ComponentHost for LocalExtensionHost {
    /// Per-user extensions shadow system ones with the same uuid.
    fn components(&self) -> Result<Vec<HostComponent>, HostError> {
        let mut components = self.scan(&self.extensions_dir, ComponentKind::PerUser);
        let user: HashSet<String> = components.iter().map(|c| c.id.clone()).collect();
        for dir in &self.system_dirs {
            components.extend(
                self.scan(dir, ComponentKind::System)
                    .into_iter()
                    .filter(|c| !user.contains(&c.id)),
            );
        }
        components.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(components)
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn report(&self, event: LifecycleEvent) {
        {
            let mut transient = self.transient.lock();
            match event.state {
                LifecycleState::Enabled | LifecycleState::Disabled => {
                    transient.remove(&event.id);
                }
                state => {
                    transient.insert(event.id.clone(), state);
                }
            }
        }
        debug!(id = %event.id, state = %event.state, "lifecycle event");
        let _ = self.events.send(event);
    }

    async fn uninstall(&self, id: &str) -> Result<(), HostError> {
        let dir = self.component_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!(id, "extension removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(id, "nothing to remove");
            }
            Err(err) => return Err(err.into()),
        }
        self.report(LifecycleEvent::new(id, LifecycleState::Uninstalled));
        Ok(())
    }

    async fn install_from_artifact(&self, id: &str, payload: Bytes) -> Result<(), HostError> {
        let target = self.component_dir(id)?;
        let staging = self.extensions_dir.join(format!(".{id}.staging"));
        let owned_id = id.to_owned();
        let outcome =
            tokio::task::spawn_blocking(move || stage(&owned_id, &payload, &staging, &target))
                .await
                .map_err(|err| HostError::Artifact {
                    id: id.to_owned(),
                    reason: err.to_string(),
                })?;
        outcome?;
        info!(id, "extension installed");
        self.report(LifecycleEvent::new(id, LifecycleState::Enabled));
        Ok(())
    }
}

/// Unpack into a staging directory, check the descriptor, then move into place.
fn stage(id: &str, payload: &[u8], staging: &Path, target: &Path) -> Result<(), HostError> {
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    let result = unpack_into(payload, staging)
        .map_err(|err| HostError::Artifact {
            id: id.to_owned(),
            reason: err.to_string(),
        })
        .and_then(|()| read_metadata(&staging.join(METADATA_FILE)))
        .and_then(|metadata| {
            if metadata.uuid == id {
                Ok(())
            } else {
                Err(HostError::Artifact {
                    id: id.to_owned(),
                    reason: format!("archive describes '{}'", metadata.uuid),
                })
            }
        })
        .and_then(|()| {
            if target.exists() {
                fs::remove_dir_all(target)?;
            }
            fs::rename(staging, target)?;
            Ok(())
        });
    if result.is_err() && staging.exists() {
        let _ = fs::remove_dir_all(staging);
    }
    result
}
