//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! Contracts of the collaborators the engine drives but does not implement:
//! the component host and the user-facing notification sink.

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::model::{HostComponent, LifecycleEvent, PendingUpdate};

/// Failures raised by a [`ComponentHost`].
#[derive(Debug, Error)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid metadata for {id}: {reason}")]
    Metadata { id: String, reason: String },
    #[error("unknown component {0}")]
    UnknownComponent(String),
    #[error("artifact for {id} could not be installed: {reason}")]
    Artifact { id: String, reason: String },
}

/// The environment that owns installed components.
///
/// Successful `uninstall` and `install_from_artifact` calls publish
/// `Uninstalled` and `Enabled` events. A failed call only returns `Err`; the
/// caller turns it into an `Error` event through [`report`](Self::report).
#[async_trait]
pub trait ComponentHost: Send + Sync + Debug {
    /// Authoritative, unfiltered component list.
    fn components(&self) -> Result<Vec<HostComponent>, HostError>;

    /// Subscribe to lifecycle notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;

    /// Publish a lifecycle event on behalf of the updater.
    fn report(&self, event: LifecycleEvent);

    async fn uninstall(&self, id: &str) -> Result<(), HostError>;

    async fn install_from_artifact(&self, id: &str, payload: Bytes) -> Result<(), HostError>;
}

/// Outbound, fire-and-forget user notifications.
pub trait NotificationSink: Send + Sync + Debug {
    fn updates_available(&self, updates: &[PendingUpdate]);
    fn batch_started(&self);
    fn item_succeeded(&self, update: &PendingUpdate);
    fn item_failed(&self, update: &PendingUpdate, message: &str);
    fn batch_finished(&self, all_succeeded: bool);
}

/// Milestones emitted by the orchestrator, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    UpdatesAvailable(Vec<PendingUpdate>),
    BatchStarted,
    ItemSucceeded(PendingUpdate),
    ItemFailed {
        update: PendingUpdate,
        message: String,
    },
    BatchFinished {
        all_succeeded: bool,
    },
}

impl Notification {
    pub fn deliver(&self, sink: &dyn NotificationSink) {
        match self {
            Notification::UpdatesAvailable(updates) => sink.updates_available(updates),
            Notification::BatchStarted => sink.batch_started(),
            Notification::ItemSucceeded(update) => sink.item_succeeded(update),
            Notification::ItemFailed { update, message } => sink.item_failed(update, message),
            Notification::BatchFinished { all_succeeded } => sink.batch_finished(*all_succeeded),
        }
    }
}

/// Sink that only writes structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn updates_available(&self, updates: &[PendingUpdate]) {
        let names: Vec<&str> = updates.iter().map(|u| u.display_name.as_str()).collect();
        info!(count = updates.len(), ?names, "extension updates available");
    }

    fn batch_started(&self) {
        info!("updating extensions");
    }

    fn item_succeeded(&self, update: &PendingUpdate) {
        info!(id = %update.id, name = %update.display_name, "extension updated");
    }

    fn item_failed(&self, update: &PendingUpdate, message: &str) {
        warn!(id = %update.id, name = %update.display_name, error = %message, "extension update failed");
    }

    fn batch_finished(&self, all_succeeded: bool) {
        if all_succeeded {
            info!("extensions updated");
        } else {
            warn!("failed to update some extensions");
        }
    }
}
