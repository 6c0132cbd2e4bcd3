//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! Decides when to ask the repository for upgrades, interprets the answer
//! against the local inventory, and supervises each component replacement
//! until the host reports a terminal state.

pub mod engine;
pub mod host;
pub mod installer;
pub mod inventory;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod scheduler;

pub use engine::{EngineCommand, EngineContext, EngineHandle, EngineOptions, EngineStatus};
pub use host::{ComponentHost, HostError, LogNotificationSink, Notification, NotificationSink};
pub use installer::UpdateInstaller;
pub use inventory::InventoryStore;
pub use metrics::UpdaterMetrics;
pub use model::{
    ComponentKind, ComponentRecord, HostComponent, LifecycleEvent, LifecycleState, PendingUpdate,
    VersionToken,
};
pub use orchestrator::{Effect, ItemPhase, UpdateBatch, UpdateOrchestrator};
pub use reconcile::Reconciler;
pub use scheduler::UpdateScheduler;
