//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use exu_core::{
    ComponentHost, ComponentKind, HostComponent, HostError, InventoryStore, LifecycleEvent,
    LifecycleState, Notification, NotificationSink, PendingUpdate, VersionToken,
};
use exu_repository::{
    FetchRequest, OperationDescriptor, RepositoryClient, RepositoryError, UpdateInfo, UpdateQuery,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub const SELF_ID: &str = "updater@patapon.info";

pub fn component(id: &str, version: u64, state: LifecycleState) -> HostComponent {
    HostComponent {
        id: id.into(),
        name: id.split('@').next().unwrap_or(id).to_uppercase(),
        version: Some(VersionToken::from(version)),
        kind: ComponentKind::PerUser,
        state,
    }
}

pub fn inventory_of(components: Vec<HostComponent>) -> InventoryStore {
    let mut store = InventoryStore::new(SELF_ID);
    store.replace_with(components);
    store
}

pub fn upgrade_info(ids: &[&str]) -> UpdateInfo {
    ids.iter()
        .map(|id| ((*id).to_owned(), OperationDescriptor::upgrade()))
        .collect()
}

/// In-memory host. Installs succeed unless the id is listed as broken.
#[derive(Debug)]
pub struct FakeHost {
    components: Mutex<Vec<HostComponent>>,
    events: broadcast::Sender<LifecycleEvent>,
    broken_installs: Mutex<HashSet<String>>,
    reported: Mutex<Vec<LifecycleEvent>>,
}

impl FakeHost {
    pub fn new(components: Vec<HostComponent>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            components: Mutex::new(components),
            events,
            broken_installs: Mutex::new(HashSet::new()),
            reported: Mutex::new(Vec::new()),
        }
    }

    pub fn break_install(&self, id: &str) {
        self.broken_installs.lock().insert(id.to_owned());
    }

    pub fn add(&self, component: HostComponent) {
        self.components.lock().push(component);
    }

    pub fn reported(&self) -> Vec<LifecycleEvent> {
        self.reported.lock().clone()
    }

    pub fn version_of(&self, id: &str) -> Option<VersionToken> {
        self.components
            .lock()
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| c.version.clone())
    }

    fn set_state(&self, id: &str, state: LifecycleState) {
        if let Some(c) = self.components.lock().iter_mut().find(|c| c.id == id) {
            c.state = state;
        }
    }
}

#[async_trait]
impl ComponentHost for FakeHost {
    fn components(&self) -> Result<Vec<HostComponent>, HostError> {
        Ok(self.components.lock().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn report(&self, event: LifecycleEvent) {
        self.set_state(&event.id, event.state);
        self.reported.lock().push(event.clone());
        let _ = self.events.send(event);
    }

    async fn uninstall(&self, id: &str) -> Result<(), HostError> {
        self.report(LifecycleEvent::new(id, LifecycleState::Uninstalled));
        Ok(())
    }

    async fn install_from_artifact(&self, id: &str, _payload: Bytes) -> Result<(), HostError> {
        if self.broken_installs.lock().contains(id) {
            return Err(HostError::Artifact {
                id: id.to_owned(),
                reason: "corrupt archive".into(),
            });
        }
        if let Some(c) = self.components.lock().iter_mut().find(|c| c.id == id) {
            let next = c
                .version
                .as_ref()
                .and_then(|v| v.as_value().as_u64())
                .map_or(1, |v| v + 1);
            c.version = Some(VersionToken::from(next));
        }
        self.report(LifecycleEvent::new(id, LifecycleState::Enabled));
        Ok(())
    }
}

/// Scripted repository. Queued answers are served first, then `fallback`.
#[derive(Debug, Default)]
pub struct FakeRepository {
    answers: Mutex<VecDeque<Result<UpdateInfo, u16>>>,
    fallback: Mutex<UpdateInfo>,
    failing_fetches: Mutex<HashSet<String>>,
    queries: Mutex<Vec<UpdateQuery>>,
    fetches: Mutex<Vec<FetchRequest>>,
}

impl FakeRepository {
    pub fn answering(info: UpdateInfo) -> Self {
        let repo = Self::default();
        *repo.fallback.lock() = info;
        repo
    }

    pub fn queue(&self, answer: Result<UpdateInfo, u16>) {
        self.answers.lock().push_back(answer);
    }

    pub fn fail_fetch(&self, id: &str) {
        self.failing_fetches.lock().insert(id.to_owned());
    }

    pub fn allow_fetch(&self, id: &str) {
        self.failing_fetches.lock().remove(id);
    }

    pub fn set_fallback(&self, info: UpdateInfo) {
        *self.fallback.lock() = info;
    }

    pub fn queries(&self) -> Vec<UpdateQuery> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn fetches(&self) -> Vec<FetchRequest> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl RepositoryClient for FakeRepository {
    async fn query_updates(&self, query: &UpdateQuery) -> exu_repository::Result<UpdateInfo> {
        self.queries.lock().push(query.clone());
        let next = self.answers.lock().pop_front();
        match next {
            Some(Ok(info)) => Ok(info),
            Some(Err(status)) => Err(RepositoryError::Status {
                status,
                url: "fake://update-info/".into(),
            }),
            None => Ok(self.fallback.lock().clone()),
        }
    }

    async fn fetch_artifact(&self, request: &FetchRequest) -> exu_repository::Result<Bytes> {
        self.fetches.lock().push(request.clone());
        if self.failing_fetches.lock().contains(&request.id) {
            return Err(RepositoryError::Status {
                status: 404,
                url: format!("fake://download-extension/{}", request.id),
            });
        }
        Ok(Bytes::from_static(b"artifact"))
    }
}

/// Sink that remembers every notification in delivery order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
        self.seen.lock().iter().filter(|n| predicate(n)).count()
    }
}

impl NotificationSink for RecordingSink {
    fn updates_available(&self, updates: &[PendingUpdate]) {
        self.seen
            .lock()
            .push(Notification::UpdatesAvailable(updates.to_vec()));
    }

    fn batch_started(&self) {
        self.seen.lock().push(Notification::BatchStarted);
    }

    fn item_succeeded(&self, update: &PendingUpdate) {
        self.seen
            .lock()
            .push(Notification::ItemSucceeded(update.clone()));
    }

    fn item_failed(&self, update: &PendingUpdate, message: &str) {
        self.seen.lock().push(Notification::ItemFailed {
            update: update.clone(),
            message: message.to_owned(),
        });
    }

    fn batch_finished(&self, all_succeeded: bool) {
        self.seen
            .lock()
            .push(Notification::BatchFinished { all_succeeded });
    }
}
