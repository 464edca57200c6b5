use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::leader::Role;
use crate::logger::HaLogger;

/// Role-specific work supplied by the application.
///
/// Each call is awaited to completion before the next tick starts, so the
/// time a hook takes sets the cadence of the loop for that role. Both hooks
/// default to a trace line, so an application may override only one.
#[async_trait]
pub trait RoleWork: Send + Sync {
    async fn leader_work(&self) {
        tracing::trace!("Leading");
    }

    async fn worker_work(&self) {
        tracing::trace!("Working");
    }
}

pub struct WorkDispatcher {
    work: Arc<dyn RoleWork>,
    logger: Arc<dyn HaLogger>,
}

impl WorkDispatcher {
    pub fn new(work: Arc<dyn RoleWork>, logger: Arc<dyn HaLogger>) -> Self {
        Self { work, logger }
    }

    pub async fn dispatch(&self, role: Role) {
        self.logger.debug(json!({"event": "dispatch", "role": role.as_str()}));
        match role {
            Role::Leader => self.work.leader_work().await,
            Role::Follower => self.work.worker_work().await,
        }
    }
}
