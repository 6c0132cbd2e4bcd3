//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! Single dispatch context driving the updater.
//!
//! Timer firings, command messages, repository responses, and host lifecycle
//! events are all handled by one task, one at a time. Network I/O and
//! installs run on spawned tasks and report back through channels.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use exu_common::config::{AppConfig, InstalledPayload};
use exu_common::time::{Clock, SystemClock};
use exu_persistence::SettingsStore;
use exu_repository::{RepositoryClient, RepositoryError, UpdateInfo};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::host::{ComponentHost, Notification, NotificationSink};
use crate::installer::UpdateInstaller;
use crate::inventory::InventoryStore;
use crate::metrics::UpdaterMetrics;
use crate::model::{LifecycleEvent, PendingUpdate};
use crate::orchestrator::{Effect, UpdateOrchestrator};
use crate::reconcile::Reconciler;
use crate::scheduler::UpdateScheduler;

const COMMAND_QUEUE: usize = 32;
const CHECK_QUEUE: usize = 4;

/// Static knobs of an engine instance.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub scheduler: UpdateScheduler,
    pub self_id: String,
    pub auto_update: bool,
    pub host_version: String,
    pub installed_payload: InstalledPayload,
    pub api_version: u32,
    pub version_targeting: bool,
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            scheduler: UpdateScheduler::from_config(&config.update),
            self_id: config.update.self_id.clone(),
            auto_update: config.update.auto_update,
            host_version: config.host.version.clone(),
            installed_payload: config.repository.installed_payload,
            api_version: config.repository.api_version,
            version_targeting: config.repository.version_targeting,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Messages accepted by the dispatch loop.
#[derive(Debug)]
pub enum EngineCommand {
    /// Run a reconciliation now instead of waiting for the timer.
    CheckNow,
    /// Dispatch every item of the offered batch.
    UpdateAll,
    /// Re-issue one failed item.
    Retry(String),
    /// Drop the offered batch.
    Ignore,
    Status(oneshot::Sender<EngineStatus>),
    Shutdown,
}

/// Point-in-time view of the engine, for operators and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub tracked: Vec<String>,
    pub pending: Vec<PendingUpdate>,
    pub failed: Vec<PendingUpdate>,
    pub batch_in_flight: bool,
    pub check_in_flight: bool,
    pub next_check_in: Option<Duration>,
}

/// Cloneable handle posting commands into the dispatch loop.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn check_now(&self) -> bool {
        self.send(EngineCommand::CheckNow).await
    }

    pub async fn update_all(&self) -> bool {
        self.send(EngineCommand::UpdateAll).await
    }

    pub async fn retry(&self, id: impl Into<String>) -> bool {
        self.send(EngineCommand::Retry(id.into())).await
    }

    pub async fn ignore(&self) -> bool {
        self.send(EngineCommand::Ignore).await
    }

    /// `None` once the loop has stopped.
    pub async fn status(&self) -> Option<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        if !self.send(EngineCommand::Status(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    /// Stop the loop and wait for it. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "engine task ended abnormally");
            }
        }
    }
}

struct CheckOutcome {
    result: std::result::Result<UpdateInfo, RepositoryError>,
    started: Instant,
}

/// Owns the inventory and the current batch for the lifetime of the engine.
#[derive(Debug)]
pub struct EngineContext {
    options: EngineOptions,
    inventory: InventoryStore,
    orchestrator: UpdateOrchestrator,
    reconciler: Reconciler,
    installer: UpdateInstaller,
    host: Arc<dyn ComponentHost>,
    repository: Arc<dyn RepositoryClient>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    metrics: Option<UpdaterMetrics>,
    check_in_flight: bool,
}

impl EngineContext {
    pub fn new(
        options: EngineOptions,
        host: Arc<dyn ComponentHost>,
        repository: Arc<dyn RepositoryClient>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let installer = UpdateInstaller::new(
            host.clone(),
            repository.clone(),
            options.host_version.clone(),
            options.api_version,
            options.version_targeting,
        );
        Self {
            inventory: InventoryStore::new(options.self_id.clone()),
            orchestrator: UpdateOrchestrator::new(options.auto_update),
            reconciler: Reconciler::new(options.host_version.clone(), options.installed_payload),
            installer,
            host,
            repository,
            settings,
            notifier,
            clock: Arc::new(SystemClock),
            metrics: None,
            check_in_flight: false,
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: UpdaterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Read persisted settings, subscribe to the host, scan the inventory and
    /// spawn the dispatch loop. Fails if the settings store is unusable.
    pub fn start(mut self) -> Result<EngineHandle> {
        let last_check = self
            .settings
            .last_check()
            .context("settings store unavailable")?;
        let events = self.host.subscribe();
        let tracked = self
            .inventory
            .reload(self.host.as_ref())
            .context("initial inventory scan failed")?;
        let first = self
            .options
            .scheduler
            .initial_delay(last_check, self.clock.now_unix());
        info!(
            tracked,
            last_check,
            first_check_in = first.as_secs(),
            "update engine started"
        );

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let task = tokio::spawn(self.run(rx, events, first));
        Ok(EngineHandle {
            commands: tx,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut events: broadcast::Receiver<LifecycleEvent>,
        first: Duration,
    ) {
        let (checks_tx, mut checks_rx) = mpsc::channel::<CheckOutcome>(CHECK_QUEUE);
        let mut deadline = Some(Instant::now() + first);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = wait_until(deadline) => {
                    deadline = None;
                    self.begin_check(&checks_tx);
                }
                command = commands.recv() => match command {
                    None | Some(EngineCommand::Shutdown) => break,
                    Some(EngineCommand::Status(reply)) => {
                        let _ = reply.send(self.status(deadline));
                    }
                    Some(command) => self.handle_command(command, &checks_tx),
                },
                Some(outcome) = checks_rx.recv() => {
                    let delay = self.finish_check(outcome);
                    deadline = Some(Instant::now() + delay);
                }
                event = events.recv(), if events_open => match event {
                    Ok(event) => {
                        let effects = self.orchestrator.on_lifecycle(&mut self.inventory, &event);
                        self.apply(effects);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lifecycle events dropped; rescanning host");
                        self.reload_inventory();
                        let effects = self.orchestrator.resync(&self.inventory);
                        self.apply(effects);
                    }
                    Err(RecvError::Closed) => {
                        warn!("host closed lifecycle channel");
                        events_open = false;
                    }
                },
            }
        }
        info!("update engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand, checks: &mpsc::Sender<CheckOutcome>) {
        debug!(?command, "engine command");
        let effects = match command {
            EngineCommand::CheckNow => {
                self.begin_check(checks);
                return;
            }
            EngineCommand::UpdateAll => self.orchestrator.start_batch(),
            EngineCommand::Retry(id) => self.orchestrator.retry(&id),
            EngineCommand::Ignore => self.orchestrator.abandon(),
            EngineCommand::Status(_) | EngineCommand::Shutdown => return,
        };
        self.apply(effects);
    }

    fn begin_check(&mut self, checks: &mpsc::Sender<CheckOutcome>) {
        if self.check_in_flight {
            debug!("check already running");
            return;
        }
        let query = self.reconciler.build_query(&self.inventory);
        info!(
            installed = query.installed.len(),
            host_version = %self.reconciler.host_version(),
            "checking for updates"
        );
        self.check_in_flight = true;
        let repository = self.repository.clone();
        let checks = checks.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = repository.query_updates(&query).await;
            let _ = checks.send(CheckOutcome { result, started }).await;
        });
    }

    fn finish_check(&mut self, outcome: CheckOutcome) -> Duration {
        self.check_in_flight = false;
        let elapsed = outcome.started.elapsed().as_secs_f64();
        let scheduler = self.options.scheduler;
        match outcome.result {
            Ok(info) => {
                let pending = self.reconciler.interpret(&self.inventory, &info);
                let now = self.clock.now_unix();
                if let Err(err) = self.settings.set_last_check(now) {
                    warn!(error = %err, "failed to persist last check timestamp");
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_check_succeeded(pending.len(), elapsed);
                }
                info!(available = pending.len(), "update check finished");
                let effects = self.orchestrator.offer(pending);
                self.apply(effects);
                scheduler.after_success()
            }
            Err(err) => {
                warn!(
                    error = %err,
                    retry_in = scheduler.after_failure().as_secs(),
                    "update check failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_check_failed(elapsed);
                }
                scheduler.after_failure()
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notify(notification) => {
                    self.record(&notification);
                    notification.deliver(self.notifier.as_ref());
                }
                Effect::Install(update) => {
                    debug!(id = %update.id, "dispatching install");
                    self.installer.spawn(update);
                }
                Effect::ReloadInventory => self.reload_inventory(),
            }
        }
    }

    fn record(&self, notification: &Notification) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match notification {
            Notification::ItemSucceeded(_) => metrics.record_item_succeeded(),
            Notification::ItemFailed { .. } => metrics.record_item_failed(),
            Notification::BatchFinished { all_succeeded } => {
                metrics.record_batch_finished(*all_succeeded)
            }
            Notification::UpdatesAvailable(_) | Notification::BatchStarted => {}
        }
    }

    fn reload_inventory(&mut self) {
        if let Err(err) = self.inventory.reload(self.host.as_ref()) {
            warn!(error = %err, "inventory rescan failed; keeping previous view");
        }
    }

    fn status(&self, deadline: Option<Instant>) -> EngineStatus {
        let batch = self.orchestrator.batch();
        EngineStatus {
            tracked: self.inventory.all().map(|r| r.id.clone()).collect(),
            pending: batch
                .map(|b| b.pending().cloned().collect())
                .unwrap_or_default(),
            failed: self.orchestrator.failed().cloned().collect(),
            batch_in_flight: batch.is_some_and(|b| b.in_flight()),
            check_in_flight: self.check_in_flight,
            next_check_in: deadline.map(|d| d.saturating_duration_since(Instant::now())),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
