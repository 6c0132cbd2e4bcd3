//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! Per-item update state machine.
//!
//! [`UpdateOrchestrator`] is a reducer: every input (a reconciliation result,
//! a user action, a host lifecycle event) mutates the current batch and
//! returns the [`Effect`]s the caller must carry out. It never touches the
//! network or the host itself.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::host::Notification;
use crate::inventory::InventoryStore;
use crate::model::{LifecycleEvent, LifecycleState, PendingUpdate};

const UNKNOWN_FAILURE: &str = "unknown error";

/// Work requested of the caller after a reducer step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Deliver to the notification sink.
    Notify(Notification),
    /// Dispatch a download/replace for one component.
    Install(PendingUpdate),
    /// Rescan the host into the inventory.
    ReloadInventory,
}

/// Where a single batch item is in its update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    /// Offered to the user, nothing dispatched yet.
    Idle,
    /// Handed to the installer, no lifecycle event seen yet.
    Requested,
    /// The host reported the download.
    Downloading,
}

#[derive(Debug, Clone)]
struct BatchItem {
    update: PendingUpdate,
    phase: ItemPhase,
    observed: Option<LifecycleState>,
}

impl BatchItem {
    fn new(update: PendingUpdate, phase: ItemPhase) -> Self {
        Self {
            update,
            phase,
            observed: None,
        }
    }
}

/// Pending updates of one reconciliation cycle plus the running error count.
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    items: IndexMap<String, BatchItem>,
    error_count: usize,
    started_announced: bool,
}

impl UpdateBatch {
    fn idle(updates: Vec<PendingUpdate>) -> Self {
        let items = updates
            .into_iter()
            .map(|u| (u.id.clone(), BatchItem::new(u, ItemPhase::Idle)))
            .collect();
        Self {
            items,
            ..Self::default()
        }
    }

    /// Updates not yet resolved, in batch order.
    pub fn pending(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.items.values().map(|item| &item.update)
    }

    pub fn phase(&self, id: &str) -> Option<ItemPhase> {
        self.items.get(id).map(|item| item.phase)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// True once any item has been dispatched.
    pub fn in_flight(&self) -> bool {
        self.items.values().any(|item| item.phase != ItemPhase::Idle)
    }
}

/// Owns the current batch and the memory of failed items.
#[derive(Debug, Default)]
pub struct UpdateOrchestrator {
    batch: Option<UpdateBatch>,
    failed: IndexMap<String, PendingUpdate>,
    auto_update: bool,
}

impl UpdateOrchestrator {
    pub fn new(auto_update: bool) -> Self {
        Self {
            auto_update,
            ..Self::default()
        }
    }

    pub fn batch(&self) -> Option<&UpdateBatch> {
        self.batch.as_ref()
    }

    /// Items whose last attempt failed and may be retried.
    pub fn failed(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.failed.values()
    }

    /// Accept the result of a reconciliation cycle.
    pub fn offer(&mut self, updates: Vec<PendingUpdate>) -> Vec<Effect> {
        if self.batch.as_ref().is_some_and(UpdateBatch::in_flight) {
            debug!(
                offered = updates.len(),
                "batch in flight; keeping it and ignoring new reconciliation result"
            );
            return Vec::new();
        }
        if updates.is_empty() {
            self.batch = None;
            return Vec::new();
        }

        info!(count = updates.len(), "updates available");
        self.batch = Some(UpdateBatch::idle(updates.clone()));
        let mut effects = vec![Effect::Notify(Notification::UpdatesAvailable(updates))];
        if self.auto_update {
            effects.extend(self.start_batch());
        }
        effects
    }

    /// Dispatch every idle item of the current batch.
    pub fn start_batch(&mut self) -> Vec<Effect> {
        let Some(batch) = self.batch.as_mut() else {
            debug!("no batch to start");
            return Vec::new();
        };
        let effects: Vec<Effect> = batch
            .items
            .values_mut()
            .filter(|item| item.phase == ItemPhase::Idle)
            .map(|item| {
                item.phase = ItemPhase::Requested;
                Effect::Install(item.update.clone())
            })
            .collect();
        info!(dispatched = effects.len(), "batch started");
        effects
    }

    /// Re-issue the update of a single failed item.
    pub fn retry(&mut self, id: &str) -> Vec<Effect> {
        let Some(update) = self.failed.shift_remove(id) else {
            warn!(id, "retry requested for an item that has not failed");
            return Vec::new();
        };
        let batch = self.batch.get_or_insert_with(UpdateBatch::default);
        match batch.items.get_mut(id) {
            Some(item) if item.phase != ItemPhase::Idle => {
                debug!(id, "item already in flight");
                return Vec::new();
            }
            Some(item) => item.phase = ItemPhase::Requested,
            None => {
                batch.items.insert(
                    id.to_owned(),
                    BatchItem::new(update.clone(), ItemPhase::Requested),
                );
            }
        }
        info!(id, "retrying update");
        vec![Effect::Install(update)]
    }

    /// Drop an idle batch. Dispatched items cannot be cancelled and stay.
    pub fn abandon(&mut self) -> Vec<Effect> {
        let Some(batch) = self.batch.as_mut() else {
            return Vec::new();
        };
        batch.items.retain(|_, item| item.phase != ItemPhase::Idle);
        if batch.items.is_empty() {
            debug!("idle batch abandoned");
            self.batch = None;
        }
        Vec::new()
    }

    /// Apply a host lifecycle event.
    pub fn on_lifecycle(
        &mut self,
        inventory: &mut InventoryStore,
        event: &LifecycleEvent,
    ) -> Vec<Effect> {
        let recorded = inventory.update_state(&event.id, event.state);
        let mut effects = self.apply_to_batch(recorded, event);
        if recorded.is_none() {
            debug!(id = %event.id, state = %event.state, "event for untracked component");
            if !effects.contains(&Effect::ReloadInventory) {
                effects.push(Effect::ReloadInventory);
            }
        }
        effects
    }

    fn apply_to_batch(
        &mut self,
        recorded: Option<LifecycleState>,
        event: &LifecycleEvent,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(batch) = self.batch.as_mut() else {
            return effects;
        };
        let Some(item) = batch
            .items
            .get_mut(&event.id)
            .filter(|item| item.phase != ItemPhase::Idle)
        else {
            return effects;
        };

        let prior = recorded.or(item.observed);
        item.observed = Some(event.state);

        match (prior, event.state) {
            (
                None | Some(LifecycleState::Enabled | LifecycleState::Error),
                LifecycleState::Downloading,
            ) => {
                item.phase = ItemPhase::Downloading;
                if !batch.started_announced {
                    batch.started_announced = true;
                    effects.push(Effect::Notify(Notification::BatchStarted));
                }
            }
            (Some(LifecycleState::Uninstalled), LifecycleState::Enabled) => {
                effects.extend(self.settle_success(&event.id));
            }
            (
                Some(LifecycleState::Downloading | LifecycleState::Uninstalled),
                LifecycleState::Error,
            ) => {
                let message = event
                    .error
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_FAILURE.to_owned());
                effects.extend(self.settle_failure(&event.id, message));
            }
            _ => {}
        }
        effects
    }

    /// Settle dispatched items against a fresh host scan after lifecycle
    /// events were dropped. Only items known to have started are resolved;
    /// the rest keep waiting for their next event.
    pub fn resync(&mut self, inventory: &InventoryStore) -> Vec<Effect> {
        let Some(batch) = self.batch.as_ref() else {
            return Vec::new();
        };
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (id, item) in &batch.items {
            if item.phase == ItemPhase::Idle {
                continue;
            }
            let started = item.phase == ItemPhase::Downloading
                || item.observed == Some(LifecycleState::Uninstalled);
            let resting = inventory.get(id).map(|record| record.lifecycle_state);
            match resting {
                Some(LifecycleState::Enabled) if started => succeeded.push(id.clone()),
                Some(LifecycleState::Error) if started => failed.push(id.clone()),
                _ => warn!(
                    id = %id,
                    phase = ?item.phase,
                    state = ?resting,
                    "in-flight item not settled by rescan; waiting for its next event"
                ),
            }
        }

        let mut effects = Vec::new();
        for id in succeeded {
            effects.extend(self.settle_success(&id));
        }
        for id in failed {
            effects.extend(self.settle_failure(&id, UNKNOWN_FAILURE.to_owned()));
        }
        effects
    }

    fn settle_success(&mut self, id: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(item) = self.batch.as_mut().and_then(|b| b.items.shift_remove(id)) {
            self.failed.shift_remove(id);
            info!(id, "item updated");
            effects.push(Effect::Notify(Notification::ItemSucceeded(item.update)));
        }
        effects.extend(self.complete_if_done());
        effects
    }

    fn settle_failure(&mut self, id: &str, message: String) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(batch) = self.batch.as_mut() {
            if let Some(item) = batch.items.shift_remove(id) {
                batch.error_count += 1;
                warn!(id, error = %message, "item update failed");
                self.failed.insert(id.to_owned(), item.update.clone());
                effects.push(Effect::Notify(Notification::ItemFailed {
                    update: item.update,
                    message,
                }));
            }
        }
        effects.extend(self.complete_if_done());
        effects
    }

    fn complete_if_done(&mut self) -> Vec<Effect> {
        let Some(batch) = self.batch.as_ref() else {
            return Vec::new();
        };
        if !batch.items.is_empty() {
            return Vec::new();
        }
        let all_succeeded = batch.error_count == 0;
        info!(all_succeeded, errors = batch.error_count, "batch finished");
        self.batch = None;
        vec![
            Effect::Notify(Notification::BatchFinished { all_succeeded }),
            Effect::ReloadInventory,
        ]
    }
}
