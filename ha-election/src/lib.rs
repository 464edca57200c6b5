//! Heartbeat membership and leader election over a hierarchical
//! coordination service.
//!
//! This crate provides:
//! - Member registration as ephemeral, sequentially named nodes under a
//!   pool namespace (`/<group>/WORK_0000000001`, ...)
//! - Timer-driven heartbeats with staleness sweeps any member may perform
//! - A single `LEADER` node claimed by create-if-absent and renewed by its
//!   owner, giving automatic failover when the leader disappears
//! - Role-specific work hooks invoked once per tick
//!
//! The coordination service is reached through the [`CoordinationClient`]
//! trait. [`MemoryCoordinator`] implements it in-process with real session
//! semantics and is what the tests and the demo binary run against.
//!
//! # Example
//!
//! ```rust,ignore
//! use ha_election::{HaWorker, MemoryCoordinator, RoleWork, WorkerConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Jobs;
//!
//! #[async_trait::async_trait]
//! impl RoleWork for Jobs {
//!     async fn leader_work(&self) { /* schedule work */ }
//!     async fn worker_work(&self) { /* do work */ }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MemoryCoordinator::new();
//!     let worker = HaWorker::builder(Arc::new(service.connect()), Arc::new(Jobs))
//!         .config(WorkerConfig::from_env()?)
//!         .start()
//!         .await?;
//!
//!     match worker.run(CancellationToken::new()).await? {
//!         ha_election::Exit::Evicted => std::process::exit(0),
//!         ha_election::Exit::Cancelled => Ok(()),
//!     }
//! }
//! ```
//!
//! # Failure Detection
//!
//! - **Graceful shutdown**: leader and member nodes are deleted immediately
//! - **Crash/kill -9**: the service reaps ephemeral nodes when the session
//!   times out; independently, peers sweep any node whose heartbeat is older
//!   than the freshness threshold (default 60s)
//! - **Evicted while alive**: the member notices on its next tick and stops

mod client;
mod clock;
mod config;
mod dispatcher;
mod error;
mod heartbeat;
mod leader;
mod logger;
mod memory;
mod registry;
mod scheduler;

pub use client::{join, perms, Acl, AclEntry, CoordinationClient, CreateMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::WorkerConfig;
pub use dispatcher::{RoleWork, WorkDispatcher};
pub use error::{Error, Result};
pub use heartbeat::{decode as decode_heartbeat, encode as encode_heartbeat};
pub use leader::{LeaderCoordinator, LeaderRecord, Role, LEADER_NAME};
pub use logger::{render, HaLogger, LogLevel, MemoryLogger, TracingLogger};
pub use memory::{JournalEntry, MemoryCoordinator, MemorySession, Op, SessionId};
pub use registry::{MembershipRegistry, Sweep, MEMBER_PREFIX};
pub use scheduler::{
    Exit, HaWorker, RoleEvent, StatusHandle, TickOutcome, WorkerBuilder, WorkerState,
    WorkerStatus,
};
