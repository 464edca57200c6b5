// ABOUTME: Runs a pool of HA workers against a shared in-process coordination service
// ABOUTME: Demonstrates registration, staleness sweeps, leader election and failover

use async_trait::async_trait;
use dotenv::dotenv;
use ha_election::{
    Exit, HaWorker, MemoryCoordinator, RoleEvent, RoleWork, SessionId, StatusHandle,
    WorkerConfig,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEADER_WORK: Duration = Duration::from_secs(3);
const WORKER_WORK: Duration = Duration::from_secs(1);

/// Demo-only knobs on top of [`WorkerConfig`].
struct DemoSettings {
    members: usize,
    kill_leader_after: Option<Duration>,
}

impl DemoSettings {
    fn from_env() -> Result<Self, String> {
        let members = match env::var("HA_DEMO_MEMBERS") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("HA_DEMO_MEMBERS must be a positive integer, got {:?}", raw))?,
            Err(_) => 3,
        };
        let kill_after_secs = match env::var("HA_DEMO_KILL_LEADER_AFTER_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                format!(
                    "HA_DEMO_KILL_LEADER_AFTER_SECS must be a non-negative integer, got {:?}",
                    raw
                )
            })?,
            Err(_) => 10,
        };
        Ok(Self {
            members,
            kill_leader_after: (kill_after_secs > 0).then(|| Duration::from_secs(kill_after_secs)),
        })
    }
}

struct DemoWork {
    label: String,
}

#[async_trait]
impl RoleWork for DemoWork {
    async fn leader_work(&self) {
        tracing::info!(worker = %self.label, "Leading");
        tokio::time::sleep(LEADER_WORK).await;
    }

    async fn worker_work(&self) {
        tracing::info!(worker = %self.label, "Working");
        tokio::time::sleep(WORKER_WORK).await;
    }
}

struct Member {
    session: SessionId,
    status: StatusHandle,
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Log role events until eviction, channel close or cancellation.
///
/// Returns the number of events logged.
async fn log_events(
    member: String,
    mut events: broadcast::Receiver<RoleEvent>,
    cancel: CancellationToken,
) -> usize {
    let mut logged = 0;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                logged += 1;
                match event {
                    RoleEvent::BecameLeader => tracing::info!(%member, "Became leader"),
                    RoleEvent::LostLeadership => tracing::info!(%member, "Lost leadership"),
                    RoleEvent::PeerEvicted(peer) => {
                        tracing::info!(%member, %peer, "Evicted stale peer")
                    }
                    RoleEvent::Evicted(_) => {
                        tracing::warn!(%member, "Evicted from the pool");
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(%member, skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    logged
}

fn spawn_event_logger(worker: &HaWorker, tasks: &mut JoinSet<()>, cancel: CancellationToken) {
    let events = worker.subscribe();
    let member = worker.member().to_string();
    tasks.spawn(async move {
        log_events(member, events, cancel).await;
    });
}

async fn start_member(
    service: &MemoryCoordinator,
    config: &WorkerConfig,
    index: usize,
    tasks: &mut JoinSet<()>,
    cancel: &CancellationToken,
) -> Result<Member, ha_election::Error> {
    let session = service.connect();
    let session_id = session.id();
    let worker = HaWorker::builder(
        Arc::new(session),
        Arc::new(DemoWork {
            label: format!("member-{}", index),
        }),
    )
    .config(config.clone())
    .start()
    .await?;

    let member = worker.member().to_string();
    let status = worker.status();
    spawn_event_logger(&worker, tasks, cancel.clone());

    let run_cancel = cancel.clone();
    tasks.spawn(async move {
        match worker.run(run_cancel).await {
            Ok(Exit::Cancelled) => tracing::info!(%member, "Worker stopped"),
            // A standalone worker process exits here.
            Ok(Exit::Evicted) => tracing::warn!(%member, "Worker terminated after eviction"),
            Err(e) => tracing::error!(%member, "Worker failed: {}", e),
        }
    });

    Ok(Member {
        session: session_id,
        status,
    })
}

/// Simulate a crash of whichever member currently leads.
fn kill_leader(service: &MemoryCoordinator, members: &[Member]) {
    match members
        .iter()
        .find(|m| m.status.load().role.is_leader() && service.is_live(m.session))
    {
        Some(leader) => {
            let status = leader.status.load();
            let reaped = service.expire_session(leader.session);
            tracing::warn!(
                member = %status.member,
                session = %leader.session,
                reaped,
                "Killed leader session"
            );
        }
        None => tracing::warn!("No live leader to kill"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, demo) = match (WorkerConfig::from_env(), DemoSettings::from_env()) {
        (Ok(config), Ok(demo)) => (config, demo),
        (Err(e), _) => {
            eprintln!("\nConfiguration Error:\n{}\n", e);
            std::process::exit(1);
        }
        (_, Err(e)) => {
            eprintln!("\nConfiguration Error:\n{}\n", e);
            std::process::exit(1);
        }
    };

    let is_production = env::var("HA_ENV").unwrap_or_default() == "production";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        namespace = %config.namespace,
        endpoints = ?config.endpoints,
        max_freshness_secs = config.max_freshness.as_secs(),
        tick_interval_ms = config.tick_interval.as_millis() as u64,
        members = demo.members,
        "Starting HA worker pool"
    );

    let service = MemoryCoordinator::new();
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let mut members = Vec::with_capacity(demo.members);
    for index in 0..demo.members {
        members.push(start_member(&service, &config, index, &mut tasks, &cancel).await?);
    }

    let kill_timer = async {
        match demo.kill_leader_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(kill_timer);

    let mut kill_pending = demo.kill_leader_after.is_some();

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut kill_timer, if kill_pending => {
                kill_pending = false;
                kill_leader(&service, &members);
            }
            joined = tasks.join_next() => {
                if joined.is_none() {
                    tracing::info!("All workers have stopped");
                    break;
                }
            }
        }
    }

    tracing::info!("Shutting down gracefully...");
    cancel.cancel();

    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("Workers did not stop within 10s");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}
