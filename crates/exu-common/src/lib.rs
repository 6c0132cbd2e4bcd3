//! ---
//! exu_section: "01-core-functionality"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Shared primitives and utilities for the update engine."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! Shared primitives for the extension updater workspace.
//! This crate exposes configuration loading, logging, and the clock
//! abstraction consumed by the scheduler.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, HostConfig, InstalledPayload, LoadedAppConfig, LoggingConfig, RepositoryConfig,
    SettingsConfig, UpdateConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{Clock, ManualClock, SystemClock};
