use arc_swap::ArcSwap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::CoordinationClient;
use crate::clock::{Clock, SystemClock};
use crate::config::WorkerConfig;
use crate::dispatcher::{RoleWork, WorkDispatcher};
use crate::leader::{LeaderCoordinator, Role, LEADER_NAME};
use crate::logger::{HaLogger, TracingLogger};
use crate::registry::MembershipRegistry;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Registering,
    Active,
    Terminated,
}

/// Role and membership changes observed by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleEvent {
    BecameLeader,
    LostLeadership,
    /// Another member was removed by our staleness sweep.
    PeerEvicted(String),
    /// We found our own member node gone.
    Evicted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continued(Role),
    Evicted,
}

/// Why [`HaWorker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Our member node was removed; the process should terminate.
    Evicted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    pub member: String,
    pub role: Role,
    pub state: WorkerState,
    pub ticks: u64,
    pub last_tick: Option<f64>,
}

/// Lock-free view of a worker's status, usable after the worker has been
/// moved into its run loop.
#[derive(Clone)]
pub struct StatusHandle(Arc<ArcSwap<WorkerStatus>>);

impl StatusHandle {
    pub fn load(&self) -> WorkerStatus {
        (**self.0.load()).clone()
    }
}

pub struct WorkerBuilder {
    client: Arc<dyn CoordinationClient>,
    work: Arc<dyn RoleWork>,
    config: WorkerConfig,
    logger: Arc<dyn HaLogger>,
    clock: Arc<dyn Clock>,
    status: Arc<ArcSwap<WorkerStatus>>,
}

impl WorkerBuilder {
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn HaLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Status of the worker this builder will start. Reads `Registering`
    /// until [`start`](Self::start) finishes, then follows the worker.
    pub fn status(&self) -> StatusHandle {
        StatusHandle(self.status.clone())
    }

    fn fail(status: &ArcSwap<WorkerStatus>, error: Error) -> Error {
        let mut failed = (**status.load()).clone();
        failed.state = WorkerState::Terminated;
        status.store(Arc::new(failed));
        error
    }

    /// Register with the pool and return an active worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the namespace
    /// cannot be created, or registration fails.
    pub async fn start(self) -> Result<HaWorker> {
        let Self {
            client,
            work,
            config,
            logger,
            clock,
            status,
        } = self;

        if let Err(e) = config.validate() {
            return Err(Self::fail(&status, e));
        }

        let registry = match MembershipRegistry::register(
            client.clone(),
            &config.namespace,
            &config.acl,
            logger.clone(),
            clock.now(),
        )
        .await
        {
            Ok(registry) => registry,
            Err(e) => return Err(Self::fail(&status, e)),
        };

        let instance = Uuid::new_v4();
        let leader = LeaderCoordinator::new(
            client.clone(),
            &config.namespace,
            config.acl.clone(),
            logger.clone(),
            registry.member(),
            instance,
        );
        let dispatcher = WorkDispatcher::new(work, logger.clone());
        let (event_tx, _) = broadcast::channel(16);

        tracing::debug!(
            member = registry.member(),
            %instance,
            namespace = %config.namespace,
            "Worker active"
        );

        let worker = HaWorker {
            client,
            config,
            registry,
            leader,
            dispatcher,
            logger,
            clock,
            state: WorkerState::Active,
            ticks: 0,
            last_tick: None,
            status,
            event_tx,
        };
        worker.publish_status();
        Ok(worker)
    }
}

/// A pool member: registers once, then ticks until evicted or cancelled.
///
/// Each tick lists the namespace, sweeps stale nodes, checks that we are
/// still a member, renews our heartbeat, maintains the leader node and
/// dispatches one unit of role-specific work.
pub struct HaWorker {
    client: Arc<dyn CoordinationClient>,
    config: WorkerConfig,
    registry: MembershipRegistry,
    leader: LeaderCoordinator,
    dispatcher: WorkDispatcher,
    logger: Arc<dyn HaLogger>,
    clock: Arc<dyn Clock>,
    state: WorkerState,
    ticks: u64,
    last_tick: Option<f64>,
    status: Arc<ArcSwap<WorkerStatus>>,
    event_tx: broadcast::Sender<RoleEvent>,
}

impl HaWorker {
    pub fn builder(client: Arc<dyn CoordinationClient>, work: Arc<dyn RoleWork>) -> WorkerBuilder {
        WorkerBuilder {
            client,
            work,
            config: WorkerConfig::default(),
            logger: Arc::new(TracingLogger),
            clock: Arc::new(SystemClock),
            status: Arc::new(ArcSwap::from_pointee(WorkerStatus {
                member: String::new(),
                role: Role::Follower,
                state: WorkerState::Registering,
                ticks: 0,
                last_tick: None,
            })),
        }
    }

    pub fn member(&self) -> &str {
        self.registry.member()
    }

    pub fn role(&self) -> Role {
        self.leader.role()
    }

    pub fn is_leader(&self) -> bool {
        self.leader.role().is_leader()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle(self.status.clone())
    }

    /// Subscribe to role and membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoleEvent> {
        self.event_tx.subscribe()
    }

    fn publish_status(&self) {
        self.status.store(Arc::new(WorkerStatus {
            member: self.registry.member().to_string(),
            role: self.leader.role(),
            state: self.state,
            ticks: self.ticks,
            last_tick: self.last_tick,
        }));
    }

    fn emit(&self, event: RoleEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Run one tick.
    ///
    /// Coordination errors propagate without retry; the next tick starts
    /// from a fresh listing.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if self.state != WorkerState::Active {
            return Err(Error::Terminated);
        }

        let children = self.registry.list().await?;
        let now = self.clock.now();
        let sweep = self
            .registry
            .sweep(children, now, self.config.max_freshness_secs())
            .await?;

        let member = self.registry.member().to_string();
        for name in &sweep.evicted {
            if *name != member && name != LEADER_NAME {
                self.emit(RoleEvent::PeerEvicted(name.clone()));
            }
        }

        if !sweep.contains(&member) {
            self.logger.warn(json!({
                "event": "evicted",
                "member": member,
                "msg": format!("{} not in worklist, exits", member),
            }));
            let was_leader = self.leader.abandon().is_leader();
            self.state = WorkerState::Terminated;
            self.last_tick = Some(now);
            self.publish_status();
            if was_leader {
                self.emit(RoleEvent::LostLeadership);
            }
            self.emit(RoleEvent::Evicted(member));
            return Ok(TickOutcome::Evicted);
        }

        self.registry.renew(now).await?;

        let before = self.leader.role();
        let role = self.leader.step(&sweep.live, now).await?;
        match (before, role) {
            (Role::Follower, Role::Leader) => self.emit(RoleEvent::BecameLeader),
            (Role::Leader, Role::Follower) => self.emit(RoleEvent::LostLeadership),
            _ => {}
        }

        self.ticks += 1;
        self.last_tick = Some(now);
        self.publish_status();

        self.dispatcher.dispatch(role).await;
        Ok(TickOutcome::Continued(role))
    }

    /// Tick every `tick_interval` until evicted or `cancel` fires.
    ///
    /// A tick that overruns the interval is followed immediately by the
    /// next one. On eviction the session is closed, which is what process
    /// exit would do; on cancellation the worker shuts down gracefully.
    ///
    /// # Errors
    ///
    /// Any coordination error from a tick ends the loop and closes the
    /// session.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<Exit> {
        loop {
            if cancel.is_cancelled() {
                self.shutdown().await?;
                return Ok(Exit::Cancelled);
            }

            let started = tokio::time::Instant::now();
            match self.tick().await {
                Ok(TickOutcome::Continued(_)) => {}
                Ok(TickOutcome::Evicted) => {
                    if let Err(e) = self.client.close().await {
                        tracing::warn!("Failed to close session after eviction: {}", e);
                    }
                    return Ok(Exit::Evicted);
                }
                Err(e) => {
                    self.logger.error(json!({
                        "event": "tick_failed",
                        "member": self.registry.member(),
                        "error": e.to_string(),
                    }));
                    self.state = WorkerState::Terminated;
                    self.publish_status();
                    if let Err(close_err) = self.client.close().await {
                        tracing::warn!("Failed to close session after tick failure: {}", close_err);
                    }
                    return Err(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(started + self.config.tick_interval) => {}
            }
        }
    }

    /// Leave the pool: release leadership if held, delete our member node and
    /// close the session.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == WorkerState::Terminated {
            return Ok(());
        }

        let was_leader = self.leader.role().is_leader();
        self.leader.release().await?;
        self.registry.deregister().await?;
        self.client.close().await?;

        self.state = WorkerState::Terminated;
        self.publish_status();
        if was_leader {
            self.emit(RoleEvent::LostLeadership);
        }
        tracing::debug!(member = self.registry.member(), "Shutdown complete");
        Ok(())
    }
}
