//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::sync::Arc;

use exu_repository::{FetchRequest, RepositoryClient};
use tracing::{debug, warn};

use crate::host::ComponentHost;
use crate::model::{LifecycleEvent, LifecycleState, PendingUpdate};

/// Drives the download/uninstall/install sequence for one component.
///
/// Outcomes are never returned to the caller; they reach the orchestrator as
/// lifecycle events published through the host.
#[derive(Debug, Clone)]
pub struct UpdateInstaller {
    host: Arc<dyn ComponentHost>,
    repository: Arc<dyn RepositoryClient>,
    host_version: String,
    api_version: u32,
    version_targeting: bool,
}

impl UpdateInstaller {
    pub fn new(
        host: Arc<dyn ComponentHost>,
        repository: Arc<dyn RepositoryClient>,
        host_version: impl Into<String>,
        api_version: u32,
        version_targeting: bool,
    ) -> Self {
        Self {
            host,
            repository,
            host_version: host_version.into(),
            api_version,
            version_targeting,
        }
    }

    fn request_for(&self, update: &PendingUpdate) -> FetchRequest {
        let version_tag = if self.version_targeting {
            update.target_version_tag.clone()
        } else {
            None
        };
        FetchRequest {
            id: update.id.clone(),
            version_tag,
            host_version: self.host_version.clone(),
            api_version: self.api_version,
        }
    }

    pub async fn install(&self, update: &PendingUpdate) {
        self.host
            .report(LifecycleEvent::new(&update.id, LifecycleState::Downloading));

        let request = self.request_for(update);
        let payload = match self.repository.fetch_artifact(&request).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(id = %update.id, error = %err, "artifact download failed");
                self.host.report(LifecycleEvent::error(
                    &update.id,
                    format!("Failed to download extension '{}'", update.display_name),
                ));
                return;
            }
        };
        debug!(id = %update.id, bytes = payload.len(), "artifact downloaded");

        if let Err(err) = self.host.uninstall(&update.id).await {
            warn!(id = %update.id, error = %err, "uninstall failed");
            self.host
                .report(LifecycleEvent::error(&update.id, err.to_string()));
            return;
        }
        if let Err(err) = self.host.install_from_artifact(&update.id, payload).await {
            warn!(id = %update.id, error = %err, "install failed");
            self.host
                .report(LifecycleEvent::error(&update.id, err.to_string()));
        }
    }

    /// Run [`install`](Self::install) on its own task.
    pub fn spawn(&self, update: PendingUpdate) -> tokio::task::JoinHandle<()> {
        let installer = self.clone();
        tokio::spawn(async move { installer.install(&update).await })
    }
}
