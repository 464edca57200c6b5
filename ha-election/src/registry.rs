use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::client::{join, Acl, CoordinationClient, CreateMode};
use crate::heartbeat;
use crate::logger::HaLogger;
use crate::{Error, Result};

/// Prefix of every member node name; the service appends the sequence.
pub const MEMBER_PREFIX: &str = "WORK_";

/// Namespace children left after a staleness sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sweep {
    pub live: BTreeSet<String>,
    pub evicted: Vec<String>,
}

impl Sweep {
    pub fn contains(&self, name: &str) -> bool {
        self.live.contains(name)
    }
}

/// This process's registration under the pool namespace.
pub struct MembershipRegistry {
    client: Arc<dyn CoordinationClient>,
    namespace: String,
    logger: Arc<dyn HaLogger>,
    member: String,
}

impl Drop for MembershipRegistry {
    fn drop(&mut self) {
        tracing::debug!(
            member = %self.member,
            "MembershipRegistry dropped (member node lives until session end)"
        );
    }
}

impl MembershipRegistry {
    /// Create the namespace (and missing ancestors) as persistent nodes.
    ///
    /// Safe to call repeatedly and concurrently: losing a creation race to
    /// another member is not an error.
    pub async fn ensure_namespace(
        client: &dyn CoordinationClient,
        namespace: &str,
        acl: &Acl,
    ) -> Result<()> {
        if client.exists(namespace).await? {
            return Ok(());
        }

        let mut path = String::new();
        for segment in namespace.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            if client.exists(&path).await? {
                continue;
            }
            match client.create(&path, b"", acl, CreateMode::Persistent).await {
                Ok(_) => tracing::debug!(%path, "Created namespace node"),
                Err(e) if e.is_node_exists() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Ensure the namespace and create this process's ephemeral sequential
    /// member node carrying heartbeat `now`.
    ///
    /// # Errors
    ///
    /// `Error::Registration` if the service hands back an unusable name;
    /// this indicates a malfunctioning service and is not retried.
    pub async fn register(
        client: Arc<dyn CoordinationClient>,
        namespace: &str,
        acl: &Acl,
        logger: Arc<dyn HaLogger>,
        now: f64,
    ) -> Result<Self> {
        Self::ensure_namespace(client.as_ref(), namespace, acl).await?;

        let assigned = client
            .create(
                &join(namespace, MEMBER_PREFIX),
                &heartbeat::encode(now),
                acl,
                CreateMode::EphemeralSequential,
            )
            .await?;

        let member = assigned
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or("")
            .to_string();
        if member.is_empty() || member.contains('/') {
            logger.error(json!({
                "event": "register_failed",
                "namespace": namespace,
                "assigned": assigned,
            }));
            return Err(Error::Registration(format!(
                "service assigned unusable member path {:?}",
                assigned
            )));
        }

        logger.info(json!({"event": "registered", "member": member}));
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            logger,
            member,
        })
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path_of(&self, name: &str) -> String {
        join(&self.namespace, name)
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.client.children(&self.namespace).await
    }

    /// Delete every child whose heartbeat has expired.
    ///
    /// Nodes that vanish between listing and reading, or that another member
    /// deletes first, are simply dropped from the result.
    pub async fn sweep(
        &self,
        children: Vec<String>,
        now: f64,
        max_freshness_secs: f64,
    ) -> Result<Sweep> {
        let mut sweep = Sweep::default();

        for name in children {
            let path = self.path_of(&name);
            let beat = match self.client.get(&path).await {
                Ok(raw) => heartbeat::decode(&raw),
                Err(e) if e.is_no_node() => {
                    tracing::trace!(%path, "Node vanished before read");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !heartbeat::is_stale(now, beat, max_freshness_secs) {
                sweep.live.insert(name);
                continue;
            }

            self.logger.warn(json!({
                "event": "timeout",
                "node": name,
                "age_secs": now - beat,
                "by": self.member,
            }));
            match self.client.delete(&path).await {
                Ok(()) => {}
                Err(e) if e.is_no_node() => {
                    tracing::trace!(%path, "Stale node already removed");
                }
                Err(e) => return Err(e),
            }
            sweep.evicted.push(name);
        }

        Ok(sweep)
    }

    pub async fn renew(&self, now: f64) -> Result<()> {
        self.client
            .set(&self.path_of(&self.member), &heartbeat::encode(now))
            .await?;
        self.logger.debug(json!({
            "event": "refresh",
            "member": self.member,
            "heartbeat": now,
        }));
        Ok(())
    }

    /// Remove our member node ahead of session end.
    pub async fn deregister(&self) -> Result<()> {
        match self.client.delete(&self.path_of(&self.member)).await {
            Ok(()) => {}
            Err(e) if e.is_no_node() => {}
            Err(e) => return Err(e),
        }
        self.logger.info(json!({"event": "deregistered", "member": self.member}));
        Ok(())
    }
}
