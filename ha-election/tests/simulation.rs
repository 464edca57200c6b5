//! Multi-member simulation tests for ha-election.
//!
//! Several workers share one in-memory coordination service and a manual
//! clock. Ticks are driven by hand so every interleaving is deterministic.

use async_trait::async_trait;
use ha_election::{
    decode_heartbeat, Clock, CoordinationClient, HaWorker, LeaderRecord, ManualClock,
    MemoryCoordinator, MemoryLogger, Op, Role, RoleEvent, RoleWork, SessionId, TickOutcome,
    WorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;

struct Idle;

#[async_trait]
impl RoleWork for Idle {
    async fn leader_work(&self) {}
    async fn worker_work(&self) {}
}

struct Member {
    worker: HaWorker,
    session: SessionId,
}

async fn join_pool(
    svc: &MemoryCoordinator,
    clock: &ManualClock,
    namespace: &str,
    threshold: u64,
) -> Member {
    let session = svc.connect();
    let id = session.id();
    let worker = HaWorker::builder(Arc::new(session), Arc::new(Idle))
        .config(
            WorkerConfig::new(namespace).with_max_freshness(Duration::from_secs(threshold)),
        )
        .logger(Arc::new(MemoryLogger::new()))
        .clock(Arc::new(clock.clone()))
        .start()
        .await
        .unwrap();
    Member { worker, session: id }
}

fn leader_record(svc: &MemoryCoordinator, namespace: &str) -> Option<LeaderRecord> {
    svc.node_value(&format!("{}/LEADER", namespace))
        .map(|raw| serde_json::from_slice(&raw).unwrap())
}

/// Replay the journal and return the largest number of leader nodes that
/// ever existed at once.
fn max_concurrent_leaders(svc: &MemoryCoordinator, namespace: &str) -> usize {
    let leader = format!("{}/LEADER", namespace);
    let mut live = 0usize;
    let mut max = 0usize;
    for entry in svc.journal().iter().filter(|e| e.path == leader) {
        match entry.op {
            Op::Create => live += 1,
            Op::Delete | Op::Reap => live = live.saturating_sub(1),
            Op::Set => assert_eq!(live, 1, "set on a missing leader node"),
        }
        max = max.max(live);
    }
    max
}

#[tokio::test]
async fn test_demo_scenario_failover_after_leader_crash() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);

    // A registers at t=0 and claims leadership on its first tick.
    let mut a = join_pool(&svc, &clock, "/demo", 100).await;
    assert_eq!(a.worker.member(), "WORK_0000000001");
    assert_eq!(
        a.worker.tick().await.unwrap(),
        TickOutcome::Continued(Role::Leader)
    );
    let record = leader_record(&svc, "/demo").unwrap();
    assert_eq!(record.member, "WORK_0000000001");
    assert_eq!(record.heartbeat, 0.0);

    // B registers at t=1 and stays a follower.
    clock.set(1.0);
    let mut b = join_pool(&svc, &clock, "/demo", 100).await;
    assert_eq!(b.worker.member(), "WORK_0000000002");
    assert_eq!(
        b.worker.tick().await.unwrap(),
        TickOutcome::Continued(Role::Follower)
    );
    assert!(!b.worker.is_leader());

    // Both keep ticking well inside the threshold.
    for t in [50.0, 100.0, 149.0] {
        clock.set(t);
        a.worker.tick().await.unwrap();
        b.worker.tick().await.unwrap();
        assert!(a.worker.is_leader());
        assert!(!b.worker.is_leader());
    }

    // A's process dies at t=150: its session goes and takes both nodes.
    clock.set(150.0);
    svc.expire_session(a.session);
    assert!(!svc.node_exists("/demo/WORK_0000000001"));
    assert!(!svc.node_exists("/demo/LEADER"));

    let mut events = b.worker.subscribe();
    assert_eq!(
        b.worker.tick().await.unwrap(),
        TickOutcome::Continued(Role::Leader)
    );
    assert_eq!(events.try_recv().unwrap(), RoleEvent::BecameLeader);
    let record = leader_record(&svc, "/demo").unwrap();
    assert_eq!(record.member, "WORK_0000000002");
    assert_eq!(record.heartbeat, 150.0);
    assert_eq!(max_concurrent_leaders(&svc, "/demo"), 1);
}

#[tokio::test]
async fn test_eventual_leadership_when_leader_node_missing() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);
    let mut a = join_pool(&svc, &clock, "/pool", 60).await;
    let mut b = join_pool(&svc, &clock, "/pool", 60).await;
    a.worker.tick().await.unwrap();
    b.worker.tick().await.unwrap();

    svc.force_delete("/pool/LEADER").unwrap();
    clock.advance(1.0);
    b.worker.tick().await.unwrap();

    assert!(svc.node_exists("/pool/LEADER"));
    assert!(b.worker.is_leader());

    // A finds out on its next tick that it no longer owns the node.
    a.worker.tick().await.unwrap();
    assert!(!a.worker.is_leader());
}

#[tokio::test]
async fn test_stale_leader_is_swept_and_replaced_in_one_tick() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);
    let mut a = join_pool(&svc, &clock, "/pool", 60).await;
    let mut b = join_pool(&svc, &clock, "/pool", 60).await;
    a.worker.tick().await.unwrap();
    b.worker.tick().await.unwrap();

    // A hangs (session alive, no ticks) while B keeps ticking.
    for t in [30.0, 59.0] {
        clock.set(t);
        b.worker.tick().await.unwrap();
        assert!(!b.worker.is_leader());
    }
    clock.set(60.0);
    let mut events = b.worker.subscribe();
    b.worker.tick().await.unwrap();

    assert!(b.worker.is_leader());
    assert!(!svc.node_exists("/pool/WORK_0000000001"));
    assert_eq!(leader_record(&svc, "/pool").unwrap().member, "WORK_0000000002");
    assert_eq!(
        events.try_recv().unwrap(),
        RoleEvent::PeerEvicted("WORK_0000000001".to_string())
    );
    assert_eq!(events.try_recv().unwrap(), RoleEvent::BecameLeader);

    // A wakes up, notices it was evicted, and stops.
    clock.set(61.0);
    assert_eq!(a.worker.tick().await.unwrap(), TickOutcome::Evicted);
    assert_eq!(max_concurrent_leaders(&svc, "/pool"), 1);
}

#[tokio::test]
async fn test_staleness_eviction_removes_silent_member() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);
    let mut a = join_pool(&svc, &clock, "/pool", 60).await;
    let _silent = join_pool(&svc, &clock, "/pool", 60).await;
    a.worker.tick().await.unwrap();

    clock.set(59.999);
    a.worker.tick().await.unwrap();
    assert!(svc.node_exists("/pool/WORK_0000000002"), "not stale yet");

    clock.set(60.0);
    a.worker.tick().await.unwrap();
    assert!(!svc.node_exists("/pool/WORK_0000000002"));

    let session = svc.connect();
    let children = session.children("/pool").await.unwrap();
    assert_eq!(children, vec!["LEADER", "WORK_0000000001"]);
}

#[tokio::test]
async fn test_externally_evicted_member_makes_no_further_writes() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);
    let mut a = join_pool(&svc, &clock, "/pool", 60).await;
    let mut b = join_pool(&svc, &clock, "/pool", 60).await;
    a.worker.tick().await.unwrap();
    b.worker.tick().await.unwrap();

    svc.force_delete("/pool/WORK_0000000002").unwrap();
    let mark = svc.journal().len();
    clock.advance(1.0);

    assert_eq!(b.worker.tick().await.unwrap(), TickOutcome::Evicted);
    assert!(
        svc.journal()[mark..].iter().all(|e| e.session != b.session),
        "evicted member wrote after eviction"
    );
    assert!(b.worker.tick().await.is_err());
}

#[tokio::test]
async fn test_heartbeat_never_decreases_under_renewal() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(1_700_000_000.0);
    let mut a = join_pool(&svc, &clock, "/pool", 60).await;

    let mut last = f64::MIN;
    for step in 0..20 {
        clock.advance(0.125 * f64::from(step));
        a.worker.tick().await.unwrap();
        let stored = decode_heartbeat(&svc.node_value("/pool/WORK_0000000001").unwrap());
        assert_eq!(stored, clock.now());
        assert!(stored >= last);
        last = stored;
    }
}

#[tokio::test]
async fn test_mutual_exclusion_with_churn() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);
    let mut members = Vec::new();
    for _ in 0..5 {
        members.push(join_pool(&svc, &clock, "/churn", 10).await);
    }

    // Deterministic pseudo-random schedule.
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed
    };

    for round in 0..200 {
        clock.advance(1.0);
        let idx = (next() % members.len() as u64) as usize;

        if round % 37 == 36 {
            // Crash whoever holds leadership and replace it with a newcomer.
            if let Some(pos) = members.iter().position(|m| m.worker.is_leader()) {
                let crashed = members.swap_remove(pos);
                svc.expire_session(crashed.session);
                members.push(join_pool(&svc, &clock, "/churn", 10).await);
            }
            continue;
        }

        let name = members[idx].worker.member().to_string();
        match members[idx].worker.tick().await.unwrap() {
            TickOutcome::Continued(Role::Leader) => {
                let record = leader_record(&svc, "/churn").unwrap();
                assert_eq!(record.member, name, "leader role without owning the node");
            }
            TickOutcome::Continued(Role::Follower) => {
                if let Some(record) = leader_record(&svc, "/churn") {
                    assert_ne!(record.member, name, "owner of the node reported follower");
                }
            }
            TickOutcome::Evicted => {
                let gone = members.swap_remove(idx);
                svc.expire_session(gone.session);
                members.push(join_pool(&svc, &clock, "/churn", 10).await);
            }
        }
    }

    assert_eq!(max_concurrent_leaders(&svc, "/churn"), 1);
}

#[tokio::test]
async fn test_graceful_shutdown_hands_over_leadership() {
    let svc = MemoryCoordinator::with_journal();
    let clock = ManualClock::new(0.0);
    let mut a = join_pool(&svc, &clock, "/pool", 60).await;
    let mut b = join_pool(&svc, &clock, "/pool", 60).await;
    a.worker.tick().await.unwrap();
    b.worker.tick().await.unwrap();
    assert!(a.worker.is_leader());

    a.worker.shutdown().await.unwrap();
    assert!(!svc.node_exists("/pool/LEADER"));
    assert!(!svc.is_live(a.session));

    clock.advance(1.0);
    b.worker.tick().await.unwrap();
    assert!(b.worker.is_leader());
}
