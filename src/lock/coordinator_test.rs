use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mockall::predicate::eq;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::InMemoryStore;
use crate::BoxError;
use crate::LockConfig;
use crate::MockRemoteStore;
use crate::RemoteError;
use crate::RemoteStore;

fn request(name: &str) -> LockRequest {
    LockRequest::new(name, &LockConfig::default())
        .with_ttl(Duration::from_millis(5000))
        .with_acquire_timeout(Duration::from_millis(2000))
        .with_release_on_finish(true)
}

async fn run_job(
    coordinator: &LockCoordinator,
    runs: Arc<AtomicUsize>,
) -> &'static str {
    coordinator
        .synchronize_with_lock(
            request("jobA"),
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<_, BoxError>("ran")
            },
            || async { "skipped" },
        )
        .await
}

#[test]
fn request_defaults_come_from_config() {
    let config = LockConfig {
        lease_ttl_ms: 1500,
        acquire_timeout_ms: 700,
        release_on_finish: false,
    };
    let request = LockRequest::new("job", &config);

    assert_eq!(request.name(), "job");
    assert_eq!(request.ttl(), Duration::from_millis(1500));
    assert_eq!(request.acquire_timeout(), Duration::from_millis(700));
    assert!(!request.release_on_finish());
}

#[tokio::test(start_paused = true)]
async fn only_one_instance_runs_the_critical_section() {
    let store = Arc::new(InMemoryStore::new());
    let instance_a = LockCoordinator::new(store.clone());
    let instance_b = LockCoordinator::new(store.clone());
    let runs = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(run_job(&instance_a, runs.clone()), run_job(&instance_b, runs.clone()));

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let mut results = vec![a, b];
    results.sort();
    assert_eq!(results, vec!["ran", "skipped"]);
    assert!(instance_a.held_locks().is_empty());
    assert!(instance_b.held_locks().is_empty());
    assert_eq!(store.active_leases(), 0);
    assert_eq!(store.lock_holder("jobA"), None);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn acquire_timeout_runs_fallback_and_leaves_nothing_tracked() {
    let store = Arc::new(InMemoryStore::new());
    let other_instance = store.lease_grant(60).await.unwrap();
    store.lock("jobA", other_instance).await.unwrap();

    let coordinator = LockCoordinator::new(store.clone());
    let started = tokio::time::Instant::now();
    let value = coordinator
        .synchronize_with_lock(
            request("jobA").with_acquire_timeout(Duration::from_millis(1000)),
            || async { Ok::<_, BoxError>(1) },
            || async { -1 },
        )
        .await;

    assert_eq!(value, -1);
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(!coordinator.is_held("jobA"));
    assert!(coordinator.held_locks().is_empty());
    // our lease was revoked, the holder's is untouched
    assert_eq!(store.active_leases(), 1);
    assert_eq!(store.lock_holder("jobA"), Some(other_instance));
    assert!(logs_contain("Acquire lock timeout exceeded for <jobA>"));
}

#[tokio::test(start_paused = true)]
async fn lock_info_is_tracked_while_critical_section_runs() {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = Arc::new(LockCoordinator::new(store.clone()));
    let observer = coordinator.clone();

    let info = coordinator
        .synchronize_with_lock(
            request("report"),
            move || async move { Ok::<_, BoxError>(observer.held_locks()) },
            || async { Default::default() },
        )
        .await;

    let held = &info["report"];
    assert_eq!(held.lock_name, "report");
    assert_eq!(held.lease_ttl, 5000);
    assert_eq!(held.acquire_timeout, 2000);
    assert!(!coordinator.is_held("report"));
}

#[tokio::test(start_paused = true)]
async fn failing_critical_section_falls_back_and_releases() {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = LockCoordinator::new(store.clone());

    let value = coordinator
        .synchronize_with_lock(
            request("job"),
            || async { Err::<&str, BoxError>("boom".into()) },
            || async { "fallback" },
        )
        .await;

    assert_eq!(value, "fallback");
    assert_eq!(store.lock_holder("job"), None);
    assert_eq!(store.active_leases(), 0);
    assert!(coordinator.held_locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicking_critical_section_falls_back() {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = LockCoordinator::new(store.clone());

    let explode = || -> Result<u32, BoxError> { panic!("critical section bug") };

    let value = coordinator
        .synchronize_with_lock(
            request("job"),
            move || async move { explode() },
            || async { 7 },
        )
        .await;

    assert_eq!(value, 7);
    assert_eq!(store.lock_holder("job"), None);
}

#[tokio::test(start_paused = true)]
async fn lock_stays_held_until_ttl_without_release_on_finish() {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = LockCoordinator::new(store.clone());

    let value = coordinator
        .synchronize_with_lock(
            request("nightly").with_release_on_finish(false),
            || async { Ok::<_, BoxError>("done") },
            || async { "skipped" },
        )
        .await;
    assert_eq!(value, "done");
    assert!(coordinator.is_held("nightly"));
    assert!(store.lock_holder("nightly").is_some());

    // a second run inside the ttl window is skipped
    let second = coordinator
        .synchronize_with_lock(
            request("nightly")
                .with_release_on_finish(false)
                .with_acquire_timeout(Duration::from_millis(500)),
            || async { Ok::<_, BoxError>("done") },
            || async { "skipped" },
        )
        .await;
    assert_eq!(second, "skipped");

    tokio::time::sleep(Duration::from_millis(5100)).await;
    assert!(!coordinator.is_held("nightly"));
    assert_eq!(store.lock_holder("nightly"), None);
}

#[tokio::test]
async fn unavailable_store_goes_straight_to_fallback() {
    let store = Arc::new(InMemoryStore::new());
    store.set_online(false);
    let coordinator = LockCoordinator::new(store.clone());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let value = coordinator
        .synchronize_with_lock(
            request("job"),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(true)
            },
            || async { false },
        )
        .await;

    assert!(!value);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(store.call_count("lease_grant"), 1);
    assert_eq!(store.call_count("lock"), 0);
}

#[tokio::test]
async fn lease_is_revoked_when_lock_acquisition_fails() {
    let mut store = MockRemoteStore::new();
    store.expect_lease_grant().with(eq(5)).times(1).returning(|_| Ok(42));
    store
        .expect_lock()
        .withf(|name, lease_id| name == "job" && *lease_id == 42)
        .times(1)
        .returning(|_, _| Err(RemoteError::Unavailable("connection reset".into())));
    store.expect_lease_revoke().with(eq(42)).times(1).returning(|_| Ok(()));

    let coordinator = LockCoordinator::new(Arc::new(store));
    let value = coordinator
        .synchronize_with_lock(request("job"), || async { Ok::<_, BoxError>(1) }, || async { 0 })
        .await;

    assert_eq!(value, 0);
    assert!(coordinator.held_locks().is_empty());
}

#[tokio::test]
async fn ttl_is_rounded_up_to_whole_seconds() {
    let mut store = MockRemoteStore::new();
    store.expect_lease_grant().with(eq(2)).times(1).returning(|_| Ok(9));
    store.expect_lock().times(1).returning(|name, _| Ok(format!("{name}/9")));
    store.expect_lease_revoke().with(eq(9)).times(1).returning(|_| Ok(()));

    let coordinator = LockCoordinator::new(Arc::new(store));
    let value = coordinator
        .synchronize_with_lock(
            request("job").with_ttl(Duration::from_millis(1001)),
            || async { Ok::<_, BoxError>("ran") },
            || async { "skipped" },
        )
        .await;

    assert_eq!(value, "ran");
}
