//! Provisioning and retry-worker behaviour against the in-memory store.

use std::{sync::Arc, time::Duration};

use outlay_core::{
    FailureStatus, MemoryProvisioningStore, NewUser, Provisioner, ProvisioningOutcome,
    RetryPolicy, RetryWorker, TestClock, WorkerConfig,
};
use tokio_util::sync::CancellationToken;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(60),
        jitter_factor: 0.0,
    }
}

fn new_user(external_id: &str) -> NewUser {
    NewUser {
        external_id: external_id.to_string(),
        email: format!("{external_id}@example.com"),
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
    }
}

async fn wait_for_status(store: &MemoryProvisioningStore, status: FailureStatus) {
    for _ in 0..10_000 {
        if store.failures().iter().all(|failure| failure.status == status) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("retry queue never reached {status}: {:?}", store.failures());
}

#[tokio::test]
async fn background_worker_recovers_from_outage() {
    let store = Arc::new(MemoryProvisioningStore::new());
    let clock = TestClock::at_unix(1_700_000_000);
    let provisioner = Provisioner::new(store.clone(), Arc::new(clock.clone()), policy());
    store.fail_next_inserts(3);

    let outcome = provisioner.provision(new_user("user_outage")).await;
    assert!(matches!(outcome, ProvisioningOutcome::Deferred(_)));

    let token = CancellationToken::new();
    let worker = RetryWorker::new(
        store.clone(),
        Arc::new(clock.clone()),
        policy(),
        WorkerConfig { poll_interval: Duration::from_secs(1), ..WorkerConfig::default() },
        token.clone(),
    );
    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_status(&store, FailureStatus::Resolved).await;
    token.cancel();
    handle.await.unwrap();

    let failure = &store.failures()[0];
    assert_eq!(failure.attempts, 3);
    assert_eq!(store.users().len(), 1);
    assert_eq!(store.users()[0].external_id, "user_outage");
    assert_eq!(store.create_user_calls(), 4);
}

#[tokio::test]
async fn background_worker_abandons_persistent_failure() {
    let store = Arc::new(MemoryProvisioningStore::new());
    let clock = TestClock::at_unix(1_700_000_000);
    let provisioner = Provisioner::new(store.clone(), Arc::new(clock.clone()), policy());
    store.fail_next_inserts(u32::MAX);

    provisioner.provision(new_user("user_broken")).await;

    let token = CancellationToken::new();
    let worker = RetryWorker::new(
        store.clone(),
        Arc::new(clock.clone()),
        policy(),
        WorkerConfig { poll_interval: Duration::from_secs(1), ..WorkerConfig::default() },
        token.clone(),
    );
    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_status(&store, FailureStatus::Abandoned).await;
    token.cancel();
    handle.await.unwrap();

    assert_eq!(store.failures()[0].attempts, 5);
    assert_eq!(store.create_user_calls(), 5);
    assert!(store.users().is_empty());
    assert!(store.failures()[0].last_error.contains("connection refused"));
}

#[tokio::test]
async fn independent_users_are_tracked_separately() {
    let store = Arc::new(MemoryProvisioningStore::new());
    let clock = TestClock::new();
    let provisioner = Provisioner::new(store.clone(), Arc::new(clock), policy());

    store.fail_next_inserts(1);
    let first = provisioner.provision(new_user("user_a")).await;
    let second = provisioner.provision(new_user("user_b")).await;

    assert!(matches!(first, ProvisioningOutcome::Deferred(_)));
    assert!(matches!(second, ProvisioningOutcome::Created(_)));
    assert_eq!(store.failures().len(), 1);
    assert_eq!(store.failures()[0].external_id, "user_a");
}
