//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use exu_common::config::InstalledPayload;
use exu_repository::{RepositoryClient, Result as RepositoryResult, UpdateInfo, UpdateQuery};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::inventory::InventoryStore;
use crate::model::{ComponentRecord, PendingUpdate};

/// Builds bulk queries from the inventory and turns repository answers into
/// pending updates.
#[derive(Debug, Clone)]
pub struct Reconciler {
    host_version: String,
    payload: InstalledPayload,
}

impl Reconciler {
    pub fn new(host_version: impl Into<String>, payload: InstalledPayload) -> Self {
        Self {
            host_version: host_version.into(),
            payload,
        }
    }

    pub fn host_version(&self) -> &str {
        &self.host_version
    }

    /// Snapshot the checkable part of the inventory into a query.
    pub fn build_query(&self, inventory: &InventoryStore) -> UpdateQuery {
        let installed: IndexMap<String, Value> = inventory
            .checkable()
            .map(|record| (record.id.clone(), self.encode(record)))
            .collect();
        UpdateQuery {
            installed,
            host_version: self.host_version.clone(),
        }
    }

    fn encode(&self, record: &ComponentRecord) -> Value {
        let version = record
            .installed_version
            .as_ref()
            .map(|v| v.as_value().clone())
            .unwrap_or(Value::Null);
        match self.payload {
            InstalledPayload::Versions => version,
            InstalledPayload::Records => json!({
                "uuid": record.id,
                "name": record.name,
                "version": version,
                "state": record.lifecycle_state,
            }),
        }
    }

    /// Keep only upgrade operations for ids the inventory still knows.
    /// The result is ordered by id.
    pub fn interpret(&self, inventory: &InventoryStore, info: &UpdateInfo) -> Vec<PendingUpdate> {
        let mut pending: Vec<PendingUpdate> = info
            .iter()
            .filter(|(_, op)| op.is_upgrade())
            .filter_map(|(id, op)| {
                let Some(record) = inventory.get(id) else {
                    debug!(id, "repository named an unknown component; dropping");
                    return None;
                };
                Some(PendingUpdate {
                    id: record.id.clone(),
                    display_name: record.name.clone(),
                    target_version_tag: op.version_tag(),
                })
            })
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        pending.dedup_by(|a, b| a.id == b.id);
        pending
    }

    /// Query the repository and interpret the answer in one step.
    pub async fn check_for_updates(
        &self,
        repository: &dyn RepositoryClient,
        inventory: &InventoryStore,
    ) -> RepositoryResult<Vec<PendingUpdate>> {
        let query = self.build_query(inventory);
        info!(installed = query.installed.len(), host_version = %self.host_version, "checking for updates");
        let answer = repository.query_updates(&query).await?;
        Ok(self.interpret(inventory, &answer))
    }
}
