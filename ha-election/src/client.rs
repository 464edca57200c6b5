//! Contract for the hierarchical coordination service.
//!
//! Paths are absolute and slash-separated (`/demo/WORK_0000000001`). The
//! contract mirrors what ZooKeeper-style services offer: persistent and
//! ephemeral nodes, optional sequential suffixes assigned by the service,
//! and single-operation atomicity. Implementations surface session loss as
//! [`Error::SessionExpired`](crate::Error::SessionExpired).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    /// Removed by the service when the creating session ends.
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// Permission bits, same layout as ZooKeeper's.
pub mod perms {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const CREATE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const ADMIN: u32 = 1 << 4;
    pub const ALL: u32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub perms: u32,
    pub scheme: String,
    pub id: String,
}

/// Access-control descriptor attached to created nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl(pub Vec<AclEntry>);

impl Acl {
    /// `world:anyone` with every permission.
    pub fn open_unsafe() -> Self {
        Self(vec![AclEntry {
            perms: perms::ALL,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }])
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.0
    }
}

impl Default for Acl {
    fn default() -> Self {
        Self::open_unsafe()
    }
}

/// A session handle to the coordination service.
///
/// Every call is a single atomic operation on the service. Callers own the
/// handle and end its lifetime with [`close`](Self::close); ephemeral nodes
/// created through it disappear when the session ends.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create a node and return the path actually assigned, which differs
    /// from `path` when `mode` is sequential.
    ///
    /// Fails with `NodeExists` if the node is already there and with
    /// `NoNode` if the parent is missing.
    async fn create(&self, path: &str, value: &[u8], acl: &Acl, mode: CreateMode)
        -> Result<String>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn set(&self, path: &str, value: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Names (not paths) of the direct children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn close(&self) -> Result<()>;
}

/// Join a child name onto a parent path.
pub fn join(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}
