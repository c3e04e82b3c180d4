//! DST tests for the discovery agent
//!
//! TigerStyle: End-to-end behavior of publish, health degradation, rotation
//! and reconnection, driven by a simulated clock and an in-memory ensemble.

mod common;

use common::{config, Harness, SwitchProbe, HOST, PORT, SERVICE};
use herald_core::constants::LIFECYCLE_CONVERGENCE_TICKS_COUNT_MAX;
use herald_discovery::{AgentState, LifecycleState};
use herald_dst::{settle, DeterministicRng};
use herald_registry::{HealthStatus, StoreOp};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// Healthy publish
// =============================================================================

#[tokio::test]
async fn test_healthy_node_is_published() {
    let h = Harness::new(config(2, 2), 1).await;
    h.start_serving().await;

    let elapsed = h
        .eventually_listed(true, 2 * h.interval_ms())
        .await
        .expect("node never published");
    assert!(elapsed <= 2 * h.interval_ms());

    let nodes = h.listed().await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].host, HOST);
    assert_eq!(nodes[0].port, PORT);
    assert_eq!(nodes[0].environment, "testing");
    assert_eq!(nodes[0].health, HealthStatus::Healthy);
    assert_eq!(h.agent.state(), LifecycleState::PublishedIn);

    // Peers see it through the filtering client too
    let peers = h.agent.client().get_all_nodes().await.unwrap();
    assert_eq!(peers.len(), 1);

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_not_published_before_server_starts() {
    let h = Harness::new(config(2, 2), 2).await;
    h.agent.start().await.unwrap();
    settle().await;

    assert_eq!(h.eventually_listed(true, 4 * h.interval_ms()).await, None);
    assert_eq!(h.agent.state(), LifecycleState::WaitingForServer);

    h.agent.server_status().mark_started();
    assert!(h.eventually_listed(true, h.interval_ms()).await.is_some());

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_unhealthy_at_start_never_publishes() {
    let h = Harness::with_probe(config(2, 2), 3, SwitchProbe::new(false)).await;
    h.start_serving().await;

    assert_eq!(h.eventually_listed(true, 3 * h.interval_ms()).await, None);
    assert_eq!(h.agent.state(), LifecycleState::Unpublished);
    assert_eq!(h.store.call_count(StoreOp::Publish), 0);

    h.agent.stop().await.unwrap();
}

// =============================================================================
// Health degradation
// =============================================================================

#[tokio::test]
async fn test_health_degradation_unpublishes() {
    let calls = Arc::new(AtomicU32::new(0));
    let probe = {
        let calls = calls.clone();
        move || {
            if calls.fetch_add(1, Ordering::SeqCst) < 5 {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            }
        }
    };

    let h = Harness::with_probe(config(2, 2), 4, SwitchProbe::new(true)).await;
    // Healthy probe from the harness stays healthy; the scripted one decides
    h.agent.register_probe(Arc::new(probe));
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    // Run until the scripted probe has returned its first unhealthy sample
    while calls.load(Ordering::SeqCst) < 6 {
        assert!(h.is_listed().await, "unpublished while still healthy");
        h.advance(common::STEP_MS).await;
    }

    let elapsed = h
        .eventually_listed(false, 2 * h.interval_ms())
        .await
        .expect("unhealthy node still listed");
    assert!(elapsed <= 2 * h.interval_ms());
    assert_eq!(h.agent.state(), LifecycleState::PublishedOut);

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_recovered_health_republishes() {
    let h = Harness::new(config(2, 4), 5).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    h.probe.set(false);
    assert!(h.eventually_listed(false, 2 * h.interval_ms()).await.is_some());

    // The window must flush the unhealthy sample before health counts again
    h.probe.set(true);
    assert!(h.eventually_listed(true, 4 * h.interval_ms()).await.is_some());
    assert_eq!(h.agent.state(), LifecycleState::PublishedIn);

    h.agent.stop().await.unwrap();
}

// =============================================================================
// Rotation
// =============================================================================

#[tokio::test]
async fn test_oor_bir_cycle() {
    let h = Harness::new(config(2, 2), 6).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());
    let before = h.listed().await[0].key();

    let tasks = h.agent.admin_tasks();
    let oor = tasks.iter().find(|t| t.name() == "oor").unwrap();
    let bir = tasks.iter().find(|t| t.name() == "bir").unwrap();

    assert!(oor.execute().changed);
    let elapsed = h.eventually_listed(false, 2 * h.interval_ms()).await;
    assert!(elapsed.is_some(), "OOR did not take the node out");

    assert!(bir.execute().changed);
    let elapsed = h.eventually_listed(true, 2 * h.interval_ms()).await;
    assert!(elapsed.is_some(), "BIR did not bring the node back");
    assert_eq!(h.listed().await[0].key(), before);

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_oor_is_idempotent() {
    let h = Harness::new(config(2, 2), 7).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    let oor = h.agent.admin_tasks().remove(0);
    oor.execute();
    assert!(h.eventually_listed(false, 2 * h.interval_ms()).await.is_some());
    let state = h.agent.state();
    let unpublishes = h.store.call_count(StoreOp::Unpublish);
    let publishes = h.store.call_count(StoreOp::Publish);

    let again = oor.execute();
    assert!(!again.changed);
    assert!(!again.in_rotation);
    h.advance(2 * h.interval_ms()).await;

    assert_eq!(h.agent.state(), state);
    assert!(!h.is_listed().await);
    assert_eq!(h.store.call_count(StoreOp::Unpublish), unpublishes);
    assert_eq!(h.store.call_count(StoreOp::Publish), publishes);

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_initially_out_of_rotation() {
    let h = Harness::new(config(2, 2).with_initial_rotation_status(false), 8).await;
    h.start_serving().await;

    assert_eq!(h.eventually_listed(true, 2 * h.interval_ms()).await, None);
    h.agent.rotation().bir();
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    h.agent.stop().await.unwrap();
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test]
async fn test_reconnect_after_session_expiry_republishes() {
    let h = Harness::new(config(2, 2), 9).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    h.store.expire_session().await;
    assert!(!h.is_listed().await);

    h.store.reconnect();
    settle().await;
    // No clock movement: the reconnect event alone re-publishes
    assert!(h.is_listed().await);
    assert_eq!(h.agent.state(), LifecycleState::PublishedIn);

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_without_expiry_resyncs() {
    let h = Harness::new(config(2, 2), 10).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    let publishes = h.store.call_count(StoreOp::Publish);
    h.store.disconnect();
    h.store.reconnect();
    settle().await;

    assert_eq!(h.store.call_count(StoreOp::Publish), publishes + 1);
    assert!(h.is_listed().await);

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_oor_while_disconnected_converges_on_reconnect() {
    let h = Harness::new(config(2, 2), 11).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    h.store.disconnect();
    h.agent.rotation().oor();
    h.advance(2 * h.interval_ms()).await;
    // The session survives a plain disconnect, so the node is still there
    assert!(h.is_listed().await);

    h.store.reconnect();
    settle().await;
    assert!(!h.is_listed().await);

    h.agent.stop().await.unwrap();
}

// =============================================================================
// Convergence
// =============================================================================

#[tokio::test]
async fn test_convergence_under_constant_inputs() {
    let rng = DeterministicRng::from_env_or_random();
    let h = Harness::new(config(1, 1), rng.seed()).await;
    h.start_serving().await;

    for round in 0..40 {
        let in_rotation = rng.next_bool(0.5);
        let healthy = rng.next_bool(0.5);
        h.agent.rotation().set(in_rotation);
        h.probe.set(healthy);

        // One interval for the probe to sample the new health, then the ticks to converge
        let ticks = 1 + LIFECYCLE_CONVERGENCE_TICKS_COUNT_MAX as u64;
        h.advance(ticks * h.interval_ms()).await;

        let expect_published = in_rotation && healthy;
        assert_eq!(
            h.is_listed().await,
            expect_published,
            "round {} (seed {}): R={} H={}",
            round,
            rng.seed(),
            in_rotation,
            healthy
        );
        let state = h.agent.state();
        if expect_published {
            assert_eq!(state, LifecycleState::PublishedIn);
        } else {
            assert!(matches!(
                state,
                LifecycleState::PublishedOut | LifecycleState::Unpublished
            ));
        }
    }

    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_convergence_after_transient_store_faults() {
    let rng = DeterministicRng::from_env_or_random();
    let h = Harness::new(config(1, 1), rng.seed()).await;
    let faults = rng.next_range(1, 5) as usize;
    h.store.fail_next(
        StoreOp::Publish,
        herald_registry::StoreError::disconnected("flapping"),
        faults,
    );
    h.start_serving().await;

    let limit = (faults as u64 + LIFECYCLE_CONVERGENCE_TICKS_COUNT_MAX as u64) * h.interval_ms();
    assert!(
        h.eventually_listed(true, limit).await.is_some(),
        "seed {}: not published after {} faults",
        rng.seed(),
        faults
    );
    h.agent.stop().await.unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_stop_unpublishes_and_closes() {
    let h = Harness::new(config(2, 2), 12).await;
    h.start_serving().await;
    assert!(h.eventually_listed(true, 2 * h.interval_ms()).await.is_some());

    h.agent.stop().await.unwrap();
    assert!(!h.is_listed().await);
    assert_eq!(h.agent.state(), LifecycleState::Stopped);
    assert_eq!(h.agent.agent_state().await, AgentState::Stopped);

    // Idempotent
    h.agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_two_agents_share_a_service() {
    let h = Harness::new(config(2, 2), 13).await;
    let peer_store = Arc::new(h.ensemble.client("herald"));
    let peer = herald_discovery::DiscoveryAgent::builder(
        config(2, 2).with_published_host("OtherHost"),
        SERVICE,
        8080,
    )
    .store(peer_store)
    .io(herald_core::IoContext::new(
        Arc::new(h.clock.clone()),
        Arc::new(DeterministicRng::new(14)),
    ))
    .probe(Arc::new(|| HealthStatus::Healthy))
    .build()
    .unwrap();

    h.start_serving().await;
    peer.server_status().mark_started();
    peer.start().await.unwrap();
    h.advance(h.interval_ms()).await;

    let hosts: Vec<String> = h.listed().await.into_iter().map(|n| n.host).collect();
    assert_eq!(hosts, vec!["CustomHost".to_string(), "OtherHost".to_string()]);

    // Different hosts derive different node ids; neither collides
    let mine = h.agent.id_generator().unwrap().node();
    let theirs = peer.id_generator().unwrap().node();
    assert_ne!(mine, theirs);

    peer.stop().await.unwrap();
    h.agent.stop().await.unwrap();
    assert!(h.listed().await.is_empty());
}
