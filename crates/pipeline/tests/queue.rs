mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::*;
use posecraft_core::status::{ProjectStatus, VariantStatus};
use posecraft_db::Store;
use posecraft_pipeline::dispatcher::ProjectDispatcher;
use posecraft_pipeline::orchestrator::CANCELLED_MESSAGE;
use posecraft_pipeline::queue::RunQueue;
use tokio_util::sync::CancellationToken;

const SEEDS: [i64; 3] = [111, 222, 333];

fn slow_first_variant() -> Harness {
    let generator = FakeGenerator {
        slow_seeds: HashMap::from([(111, Duration::from_millis(200))]),
        ..Default::default()
    };
    Harness::new(generator, FakeDetector::default(), vec![FakeCorrection::new("A")])
}

/// Wait until the generator has been asked for `n` images.
async fn wait_for_requests(h: &Harness, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.generator.requests.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("generator was never called");
}

#[tokio::test]
async fn dispatched_project_runs_to_completion() {
    let h = scenario();
    let id = h.project(&SEEDS).await;
    let shutdown = CancellationToken::new();
    let (queue, handle) = RunQueue::start(h.orchestrator.clone(), 2, shutdown.clone());
    let dispatcher = ProjectDispatcher::new(h.store.clone(), queue.clone(), Duration::from_millis(10));

    assert_eq!(dispatcher.try_dispatch().await.unwrap(), 1);
    assert_eq!(dispatcher.try_dispatch().await.unwrap(), 0);

    h.wait_for(id, ProjectStatus::Completed).await;
    let variants = h.store.list_variants(id).await.unwrap();
    assert!(variants.iter().all(|v| v.status().unwrap() == VariantStatus::Completed));

    shutdown.cancel();
    handle.await.unwrap();
    assert!(queue.is_empty());
}

#[tokio::test]
async fn dispatcher_loop_picks_up_new_projects() {
    let h = scenario();
    let shutdown = CancellationToken::new();
    let (queue, pool) = RunQueue::start(h.orchestrator.clone(), 1, shutdown.clone());
    let dispatcher = ProjectDispatcher::new(h.store.clone(), queue, Duration::from_millis(10));
    let loop_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });

    let first = h.project(&[1]).await;
    let second = h.project(&[2]).await;
    h.wait_for(first, ProjectStatus::Completed).await;
    h.wait_for(second, ProjectStatus::Completed).await;

    shutdown.cancel();
    loop_handle.await.unwrap();
    pool.await.unwrap();
}

#[tokio::test]
async fn enqueue_rejects_duplicates() {
    let h = slow_first_variant();
    let id = h.project(&SEEDS).await;
    let shutdown = CancellationToken::new();
    let (queue, handle) = RunQueue::start(h.orchestrator.clone(), 2, shutdown.clone());

    assert!(queue.enqueue(id));
    assert!(!queue.enqueue(id));
    assert!(queue.is_active(id));
    assert_eq!(queue.free_slots(), 1);
    assert!(!queue.cancel(id + 100));

    shutdown.cancel();
    handle.await.unwrap();
    assert!(!queue.enqueue(id + 1));
}

#[tokio::test]
async fn cancel_finalizes_after_in_flight_variant() {
    let h = slow_first_variant();
    let id = h.project(&SEEDS).await;
    let (queue, handle) = RunQueue::start(h.orchestrator.clone(), 2, CancellationToken::new());

    assert!(queue.enqueue(id));
    wait_for_requests(&h, 1).await;
    assert!(queue.cancel(id));

    h.wait_for(id, ProjectStatus::Cancelled).await;
    let variants = h.store.list_variants(id).await.unwrap();
    assert_eq!(variants[0].status().unwrap(), VariantStatus::Completed);
    for v in &variants[1..] {
        assert_eq!(v.status().unwrap(), VariantStatus::Failed);
        assert_eq!(v.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    }
    assert_eq!(h.generator.seeds_called(), vec![111]);

    let project = h.store.find_project(id).await.unwrap();
    assert!((project.total_cost - 0.05).abs() < 1e-9);
    handle.abort();
}

#[tokio::test]
async fn shutdown_leaves_project_for_recovery() {
    let h = slow_first_variant();
    let id = h.project(&SEEDS).await;
    let shutdown = CancellationToken::new();
    let (queue, handle) = RunQueue::start(h.orchestrator.clone(), 2, shutdown.clone());

    assert!(queue.enqueue(id));
    wait_for_requests(&h, 1).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(h.project_status(id).await, ProjectStatus::Generating);
    let variants = h.store.list_variants(id).await.unwrap();
    assert_eq!(variants[0].status().unwrap(), VariantStatus::Completed);
    assert_eq!(variants[1].status().unwrap(), VariantStatus::Pending);

    // Once the lease has lapsed, restart recovery hands it back to the
    // dispatcher.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let reset = h.store.reset_interrupted(chrono::Utc::now()).await.unwrap();
    assert_eq!(reset.projects, 1);
    assert_eq!(h.project_status(id).await, ProjectStatus::Pending);
}

#[tokio::test]
async fn recovery_leaves_live_runs_alone() {
    let h = slow_first_variant();
    let id = h.project(&SEEDS).await;
    let shutdown = CancellationToken::new();
    let (queue, handle) = RunQueue::start(h.orchestrator.clone(), 2, shutdown.clone());

    assert!(queue.enqueue(id));
    wait_for_requests(&h, 1).await;

    // Another worker starting up while this run holds its lease.
    let stale_before = chrono::Utc::now() - chrono::Duration::seconds(60);
    let reset = h.store.reset_interrupted(stale_before).await.unwrap();
    assert_eq!(reset.projects, 0);
    assert_eq!(reset.variants, 0);
    assert_eq!(
        h.store.list_variants(id).await.unwrap()[0].status().unwrap(),
        VariantStatus::Generating
    );

    h.wait_for(id, ProjectStatus::Completed).await;
    assert_eq!(h.generator.seeds_called(), SEEDS.to_vec());
    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn dispatcher_recovers_lapsed_leases() {
    let h = scenario();
    let id = h.project(&SEEDS).await;
    let claimed = h.store.claim_next_pending_project().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);

    let (queue, _handle) = RunQueue::start(h.orchestrator.clone(), 1, CancellationToken::new());
    let dispatcher = ProjectDispatcher::new(h.store.clone(), queue, Duration::from_millis(10))
        .with_lease_timeout(Duration::from_millis(30));

    // Claimed moments ago, so the lease still holds.
    assert_eq!(dispatcher.recover_stale().await.unwrap().projects, 0);
    assert_eq!(h.project_status(id).await, ProjectStatus::Generating);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(dispatcher.recover_stale().await.unwrap().projects, 1);
    assert_eq!(h.project_status(id).await, ProjectStatus::Pending);
}

#[tokio::test]
async fn recovery_needs_a_lease_timeout() {
    let h = scenario();
    let id = h.project(&SEEDS).await;
    h.store.claim_next_pending_project().await.unwrap().unwrap();

    let (queue, _handle) = RunQueue::start(h.orchestrator.clone(), 1, CancellationToken::new());
    let dispatcher = ProjectDispatcher::new(h.store.clone(), queue, Duration::from_millis(10));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dispatcher.recover_stale().await.unwrap().projects, 0);
    assert_eq!(h.project_status(id).await, ProjectStatus::Generating);
}
