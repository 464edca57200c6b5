use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::client::{join, Acl, CoordinationClient, CreateMode};
use crate::logger::HaLogger;
use crate::Result;

/// Fixed name of the leader node under the namespace.
pub const LEADER_NAME: &str = "LEADER";

/// Value stored in the leader node.
///
/// A worker owns the node only when both `member` and `instance` match its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub member: String,
    pub instance: Uuid,
    pub heartbeat: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Follower,
    Leader,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follower => "follower",
            Self::Leader => "leader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Holder {
    Absent,
    Me,
    Other(String),
}

/// Keeps the leader node alive while we own it and claims it when it is gone.
pub struct LeaderCoordinator {
    client: Arc<dyn CoordinationClient>,
    path: String,
    acl: Acl,
    logger: Arc<dyn HaLogger>,
    member: String,
    instance: Uuid,
    role: Role,
}

impl LeaderCoordinator {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        namespace: &str,
        acl: Acl,
        logger: Arc<dyn HaLogger>,
        member: impl Into<String>,
        instance: Uuid,
    ) -> Self {
        Self {
            client,
            path: join(namespace, LEADER_NAME),
            acl,
            logger,
            member: member.into(),
            instance,
            role: Role::Follower,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    fn record(&self, now: f64) -> LeaderRecord {
        LeaderRecord {
            member: self.member.clone(),
            instance: self.instance,
            heartbeat: now,
        }
    }

    async fn holder(&self) -> Result<Holder> {
        let raw = match self.client.get(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.is_no_node() => return Ok(Holder::Absent),
            Err(e) => return Err(e),
        };
        Ok(match serde_json::from_slice::<LeaderRecord>(&raw) {
            Ok(r) if r.member == self.member && r.instance == self.instance => Holder::Me,
            Ok(r) => Holder::Other(r.member),
            // Written by something that does not speak our record format.
            Err(_) => Holder::Other(String::from_utf8_lossy(&raw).into_owned()),
        })
    }

    /// Try to create the leader node. Exactly one concurrent caller wins.
    async fn claim(&self, now: f64) -> Result<Role> {
        let value = serde_json::to_vec(&self.record(now))?;
        match self
            .client
            .create(&self.path, &value, &self.acl, CreateMode::Ephemeral)
            .await
        {
            Ok(_) => {
                self.logger.info(json!({
                    "event": "leader_claimed",
                    "member": self.member,
                    "heartbeat": now,
                }));
                Ok(Role::Leader)
            }
            Err(e) if e.is_node_exists() => {
                tracing::debug!(member = %self.member, "Lost leader claim race");
                Ok(Role::Follower)
            }
            Err(e) => Err(e),
        }
    }

    async fn renew(&self, now: f64) -> Result<Role> {
        let value = serde_json::to_vec(&self.record(now))?;
        match self.client.set(&self.path, &value).await {
            Ok(()) => {
                self.logger.debug(json!({
                    "event": "leader_refresh",
                    "member": self.member,
                    "heartbeat": now,
                }));
                Ok(Role::Leader)
            }
            Err(e) if e.is_no_node() => self.claim(now).await,
            Err(e) => Err(e),
        }
    }

    /// One leader-maintenance step against the post-sweep listing.
    ///
    /// The resulting role is derived from the leader node itself, never from
    /// the role held after the previous tick.
    pub async fn step(&mut self, live: &BTreeSet<String>, now: f64) -> Result<Role> {
        let holder = if live.contains(LEADER_NAME) {
            self.holder().await?
        } else {
            Holder::Absent
        };

        let next = match holder {
            Holder::Me => self.renew(now).await?,
            Holder::Absent => self.claim(now).await?,
            Holder::Other(owner) => {
                tracing::trace!(member = %self.member, %owner, "Following");
                Role::Follower
            }
        };

        if self.role.is_leader() && !next.is_leader() {
            self.logger.warn(json!({
                "event": "leadership_lost",
                "member": self.member,
            }));
        }
        self.role = next;
        Ok(next)
    }

    /// Delete the leader node if we own it.
    pub async fn release(&mut self) -> Result<()> {
        if self.holder().await? == Holder::Me {
            match self.client.delete(&self.path).await {
                Ok(()) => {}
                Err(e) if e.is_no_node() => {}
                Err(e) => return Err(e),
            }
            self.logger.info(json!({"event": "leader_released", "member": self.member}));
        }
        self.role = Role::Follower;
        Ok(())
    }

    /// Drop any claim to leadership locally, without touching the service.
    ///
    /// Returns the role held before.
    pub fn abandon(&mut self) -> Role {
        std::mem::replace(&mut self.role, Role::Follower)
    }
}
