//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use indexmap::IndexMap;
use tracing::debug;

use crate::host::{ComponentHost, HostError};
use crate::model::{ComponentKind, ComponentRecord, HostComponent, LifecycleState};

/// In-memory record of the components the updater manages.
#[derive(Debug, Clone)]
pub struct InventoryStore {
    self_id: String,
    records: IndexMap<String, ComponentRecord>,
}

impl InventoryStore {
    /// Create an empty store that will never track `self_id`.
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            records: IndexMap::new(),
        }
    }

    /// Rescan the host and replace the current mapping.
    pub fn reload(&mut self, host: &dyn ComponentHost) -> Result<usize, HostError> {
        let components = host.components()?;
        Ok(self.replace_with(components))
    }

    /// Replace the mapping with the eligible subset of `components`.
    ///
    /// Drops the updater itself, anything not installed per-user, disabled
    /// components, and components without a version token. Records are kept
    /// in id order so identical host state yields an identical store.
    pub fn replace_with(&mut self, components: impl IntoIterator<Item = HostComponent>) -> usize {
        let mut records: IndexMap<String, ComponentRecord> = components
            .into_iter()
            .filter(|c| self.is_eligible(c))
            .map(|c| (c.id.clone(), ComponentRecord::from(c)))
            .collect();
        records.sort_keys();
        self.records = records;
        debug!(count = self.records.len(), "inventory reloaded");
        self.records.len()
    }

    fn is_eligible(&self, component: &HostComponent) -> bool {
        component.id != self.self_id
            && component.kind == ComponentKind::PerUser
            && component.state != LifecycleState::Disabled
            && component.version.is_some()
    }

    pub fn get(&self, id: &str) -> Option<&ComponentRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &ComponentRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records offered to the repository in a bulk query.
    pub fn checkable(&self) -> impl Iterator<Item = &ComponentRecord> {
        self.records.values().filter(|r| r.is_checkable())
    }

    /// Overwrite the recorded state and return the previous one. `None` means
    /// the id is unknown and the caller should reload.
    pub fn update_state(&mut self, id: &str, state: LifecycleState) -> Option<LifecycleState> {
        let record = self.records.get_mut(id)?;
        Some(std::mem::replace(&mut record.lifecycle_state, state))
    }
}
