//! ---
//! exu_section: "02-update-engine"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Update reconciliation and lifecycle orchestration."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{component, upgrade_info, FakeHost, FakeRepository, RecordingSink, SELF_ID};
use exu_common::time::ManualClock;
use exu_core::{
    ComponentHost, EngineContext, EngineHandle, EngineOptions, HostComponent, LifecycleEvent,
    LifecycleState, Notification, PendingUpdate, UpdateScheduler,
};
use exu_persistence::{MemorySettingsStore, PersistedSettings, PersistenceError, SettingsStore};
use exu_repository::{OperationDescriptor, UpdateInfo};

const NOW: i64 = 1_700_000_000;
const DAY: u64 = 86_400;
const INTERVAL: Duration = Duration::from_secs(5 * DAY);
const RETRY: Duration = Duration::from_secs(300);

struct Harness {
    host: Arc<FakeHost>,
    repository: Arc<FakeRepository>,
    settings: Arc<MemorySettingsStore>,
    sink: Arc<RecordingSink>,
    handle: EngineHandle,
}

fn options(auto_update: bool) -> EngineOptions {
    EngineOptions {
        scheduler: UpdateScheduler::new(INTERVAL, RETRY),
        self_id: SELF_ID.to_owned(),
        auto_update,
        ..EngineOptions::default()
    }
}

fn start(
    components: Vec<HostComponent>,
    repository: FakeRepository,
    last_check: i64,
    auto_update: bool,
) -> Harness {
    let host = Arc::new(FakeHost::new(components));
    let repository = Arc::new(repository);
    let settings = Arc::new(MemorySettingsStore::with_last_check(last_check));
    let sink = Arc::new(RecordingSink::default());
    let handle = EngineContext::new(
        options(auto_update),
        host.clone(),
        repository.clone(),
        settings.clone(),
        sink.clone(),
    )
    .with_clock(Arc::new(ManualClock::new(NOW)))
    .start()
    .expect("engine starts");
    Harness {
        host,
        repository,
        settings,
        sink,
        handle,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn overdue_check_fires_at_startup_and_persists_timestamp() {
    let h = start(
        vec![component("a@x", 1, LifecycleState::Enabled)],
        FakeRepository::answering(UpdateInfo::default()),
        0,
        false,
    );
    settle().await;

    assert_eq!(h.repository.query_count(), 1);
    assert_eq!(h.settings.last_check().unwrap(), NOW);
    let status = h.handle.status().await.unwrap();
    let next = status.next_check_in.unwrap();
    assert!(next > INTERVAL - Duration::from_secs(1) && next <= INTERVAL);
    assert!(h.sink.seen().is_empty());
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_check_retries_soon_and_keeps_timestamp() {
    let repository = FakeRepository::answering(UpdateInfo::default());
    repository.queue(Err(500));
    let h = start(
        vec![component("a@x", 1, LifecycleState::Enabled)],
        repository,
        0,
        false,
    );
    settle().await;

    assert_eq!(h.repository.query_count(), 1);
    assert_eq!(h.settings.last_check().unwrap(), 0);
    let next = h.handle.status().await.unwrap().next_check_in.unwrap();
    assert!(next > RETRY - Duration::from_secs(1) && next <= RETRY);

    tokio::time::sleep(RETRY).await;
    assert_eq!(h.repository.query_count(), 2);
    assert_eq!(h.settings.last_check().unwrap(), NOW);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recent_check_waits_for_remaining_interval() {
    let h = start(
        vec![component("a@x", 1, LifecycleState::Enabled)],
        FakeRepository::answering(UpdateInfo::default()),
        NOW - DAY as i64,
        false,
    );
    settle().await;
    assert_eq!(h.repository.query_count(), 0);

    tokio::time::sleep(Duration::from_secs(4 * DAY)).await;
    assert_eq!(h.repository.query_count(), 1);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auto_update_runs_batch_and_counts_install_failures() {
    let h = start(
        vec![
            component("a@x", 1, LifecycleState::Enabled),
            component("b@x", 1, LifecycleState::Enabled),
        ],
        FakeRepository::answering(upgrade_info(&["a@x", "b@x"])),
        0,
        true,
    );
    h.host.break_install("b@x");
    settle().await;

    let seen = h.sink.seen();
    assert_eq!(
        seen[0],
        Notification::UpdatesAvailable(vec![
            PendingUpdate::new("a@x", "A"),
            PendingUpdate::new("b@x", "B"),
        ])
    );
    assert_eq!(seen[1], Notification::BatchStarted);
    assert_eq!(
        seen.last(),
        Some(&Notification::BatchFinished {
            all_succeeded: false
        })
    );
    assert_eq!(
        h.sink
            .count(|n| *n == Notification::ItemSucceeded(PendingUpdate::new("a@x", "A"))),
        1
    );
    assert_eq!(
        h.sink
            .count(|n| matches!(n, Notification::ItemFailed { update, .. } if update.id == "b@x")),
        1
    );
    assert_eq!(
        h.host.version_of("a@x").map(|v| v.to_string()),
        Some("2".to_owned())
    );

    let status = h.handle.status().await.unwrap();
    assert!(status.pending.is_empty());
    assert_eq!(status.failed, vec![PendingUpdate::new("b@x", "B")]);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_reissues_targeted_fetch_after_download_failure() {
    let answer: UpdateInfo = [("a@x".to_owned(), OperationDescriptor::upgrade_to("9"))]
        .into_iter()
        .collect();
    let repository = FakeRepository::answering(answer);
    repository.fail_fetch("a@x");
    let h = start(
        vec![component("a@x", 1, LifecycleState::Enabled)],
        repository,
        0,
        true,
    );
    settle().await;

    assert!(h.sink.seen().contains(&Notification::ItemFailed {
        update: PendingUpdate::new("a@x", "A").with_version_tag("9"),
        message: "Failed to download extension 'A'".into(),
    }));
    assert_eq!(
        h.sink.seen().last(),
        Some(&Notification::BatchFinished {
            all_succeeded: false
        })
    );

    h.repository.allow_fetch("a@x");
    assert!(h.handle.retry("a@x").await);
    settle().await;

    let fetches = h.repository.fetches();
    assert_eq!(fetches.len(), 2);
    assert!(fetches
        .iter()
        .all(|f| f.version_tag.as_deref() == Some("9")));
    assert_eq!(
        h.sink.seen().last(),
        Some(&Notification::BatchFinished {
            all_succeeded: true
        })
    );
    assert!(h.handle.status().await.unwrap().failed.is_empty());
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offered_batch_waits_for_confirmation() {
    let h = start(
        vec![component("a@x", 1, LifecycleState::Enabled)],
        FakeRepository::answering(upgrade_info(&["a@x"])),
        0,
        false,
    );
    settle().await;

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.pending, vec![PendingUpdate::new("a@x", "A")]);
    assert!(!status.batch_in_flight);
    assert!(h.repository.fetches().is_empty());

    assert!(h.handle.ignore().await);
    assert!(h.handle.status().await.unwrap().pending.is_empty());

    assert!(h.handle.check_now().await);
    settle().await;
    assert!(h.handle.update_all().await);
    settle().await;
    assert_eq!(h.repository.fetches().len(), 1);
    assert_eq!(
        h.sink.seen().last(),
        Some(&Notification::BatchFinished {
            all_succeeded: true
        })
    );
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_component_event_rescans_host() {
    let h = start(
        vec![component("a@x", 1, LifecycleState::Enabled)],
        FakeRepository::answering(UpdateInfo::default()),
        NOW,
        false,
    );
    settle().await;

    h.host.add(component("new@x", 3, LifecycleState::Enabled));
    h.host
        .report(LifecycleEvent::new("new@x", LifecycleState::Enabled));
    settle().await;

    let tracked = h.handle.status().await.unwrap().tracked;
    assert_eq!(tracked, vec!["a@x".to_owned(), "new@x".to_owned()]);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_loop() {
    let h = start(
        Vec::new(),
        FakeRepository::answering(UpdateInfo::default()),
        NOW,
        false,
    );
    h.handle.shutdown().await;
    assert!(h.handle.status().await.is_none());
    assert!(!h.handle.check_now().await);
    h.handle.shutdown().await;
}

#[derive(Debug)]
struct UnreadableSettings;

impl SettingsStore for UnreadableSettings {
    fn load(&self) -> exu_persistence::Result<PersistedSettings> {
        Err(PersistenceError::UnsupportedVersion {
            found: 9,
            expected: 1,
        })
    }

    fn save(&self, _settings: &PersistedSettings) -> exu_persistence::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn engine_refuses_to_start_without_settings() {
    let result = EngineContext::new(
        options(false),
        Arc::new(FakeHost::new(Vec::new())),
        Arc::new(FakeRepository::default()),
        Arc::new(UnreadableSettings),
        Arc::new(RecordingSink::default()),
    )
    .start();
    let err = result.err().expect("start must fail");
    assert!(err.to_string().contains("settings store unavailable"));
}
