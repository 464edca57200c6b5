//! In-process coordination service.
//!
//! Implements the [`CoordinationClient`] contract over a shared tree with
//! real session semantics: ephemeral nodes are reaped when their session is
//! closed or expired, sequential suffixes are assigned per parent, parents
//! must exist, and ephemeral nodes cannot have children. A service built
//! with [`MemoryCoordinator::with_journal`] also appends every mutation to
//! a journal so multi-member runs can be audited afterwards.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::{Acl, CoordinationClient, CreateMode};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Set,
    Delete,
    /// Ephemeral node removed because its session ended.
    Reap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub index: u64,
    pub session: SessionId,
    pub op: Op,
    pub path: String,
}

#[derive(Debug)]
struct Node {
    value: Vec<u8>,
    acl: Acl,
    owner: Option<SessionId>,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    live_sessions: HashSet<SessionId>,
    next_session: u64,
    next_root_seq: u64,
    journal: Option<Vec<JournalEntry>>,
}

impl Tree {
    fn record(&mut self, session: SessionId, op: Op, path: &str) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        let index = journal.len() as u64;
        journal.push(JournalEntry {
            index,
            session,
            op,
            path: path.to_string(),
        });
    }

    fn children_of(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{}/", parent)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, _)| {
                let rest = &path[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn reap(&mut self, session: SessionId) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.nodes.remove(path);
            self.record(session, Op::Reap, path);
        }
        owned.len()
    }
}

fn validate_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Shared service state. Clone freely; all clones see the same tree.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that records every mutation; see [`journal`](Self::journal).
    pub fn with_journal() -> Self {
        let service = Self::default();
        service.lock().journal = Some(Vec::new());
        service
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session against the service.
    pub fn connect(&self) -> MemorySession {
        let mut tree = self.lock();
        tree.next_session += 1;
        let id = SessionId(tree.next_session);
        tree.live_sessions.insert(id);
        tracing::debug!(session = %id, "Session opened");
        MemorySession {
            service: self.clone(),
            id,
        }
    }

    /// End a session abnormally, as the service would after a timeout.
    ///
    /// Returns the number of ephemeral nodes reaped.
    pub fn expire_session(&self, session: SessionId) -> usize {
        let mut tree = self.lock();
        if !tree.live_sessions.remove(&session) {
            return 0;
        }
        let reaped = tree.reap(session);
        tracing::debug!(%session, reaped, "Session expired");
        reaped
    }

    pub fn is_live(&self, session: SessionId) -> bool {
        self.lock().live_sessions.contains(&session)
    }

    /// Recorded mutations, oldest first. Empty unless built with
    /// [`with_journal`](Self::with_journal).
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone().unwrap_or_default()
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    pub fn node_value(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(path).map(|n| n.value.clone())
    }

    pub fn node_acl(&self, path: &str) -> Option<Acl> {
        self.lock().nodes.get(path).map(|n| n.acl.clone())
    }

    /// Session owning an ephemeral node.
    pub fn node_owner(&self, path: &str) -> Option<SessionId> {
        self.lock().nodes.get(path).and_then(|n| n.owner)
    }

    /// Overwrite a node's value from outside any session (test fixture).
    pub fn force_set(&self, path: &str, value: &[u8]) -> Result<()> {
        let mut tree = self.lock();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        node.value = value.to_vec();
        Ok(())
    }

    /// Remove a node from outside any session (test fixture).
    pub fn force_delete(&self, path: &str) -> Result<()> {
        let mut tree = self.lock();
        tree.nodes
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }
}

/// One session on a [`MemoryCoordinator`].
pub struct MemorySession {
    service: MemoryCoordinator,
    id: SessionId,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn service(&self) -> &MemoryCoordinator {
        &self.service
    }

    fn live_tree(&self) -> Result<MutexGuard<'_, Tree>> {
        let tree = self.service.lock();
        if tree.live_sessions.contains(&self.id) {
            Ok(tree)
        } else {
            Err(Error::SessionExpired)
        }
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        let tree = self.live_tree()?;
        Ok(path == "/" || tree.nodes.contains_key(path))
    }

    async fn create(
        &self,
        path: &str,
        value: &[u8],
        acl: &Acl,
        mode: CreateMode,
    ) -> Result<String> {
        validate_path(path)?;
        if path == "/" {
            return Err(Error::NodeExists(path.to_string()));
        }
        let mut tree = self.live_tree()?;
        let parent = parent_of(path).to_string();

        let counter = if parent == "/" {
            &mut tree.next_root_seq
        } else {
            let parent_node = tree
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| Error::NoNode(parent.clone()))?;
            if parent_node.owner.is_some() {
                return Err(Error::NoChildrenForEphemerals(parent));
            }
            &mut parent_node.next_seq
        };

        let assigned = if mode.is_sequential() {
            *counter += 1;
            format!("{}{:010}", path, *counter)
        } else {
            path.to_string()
        };
        if tree.nodes.contains_key(&assigned) {
            return Err(Error::NodeExists(assigned));
        }

        tree.nodes.insert(
            assigned.clone(),
            Node {
                value: value.to_vec(),
                acl: acl.clone(),
                owner: mode.is_ephemeral().then_some(self.id),
                next_seq: 0,
            },
        );
        tree.record(self.id, Op::Create, &assigned);
        Ok(assigned)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        validate_path(path)?;
        let tree = self.live_tree()?;
        tree.nodes
            .get(path)
            .map(|n| n.value.clone())
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn set(&self, path: &str, value: &[u8]) -> Result<()> {
        validate_path(path)?;
        let mut tree = self.live_tree()?;
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        node.value = value.to_vec();
        tree.record(self.id, Op::Set, path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut tree = self.live_tree()?;
        if !tree.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !tree.children_of(path).is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        tree.nodes.remove(path);
        tree.record(self.id, Op::Delete, path);
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path)?;
        let tree = self.live_tree()?;
        if path != "/" && !tree.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(tree.children_of(path))
    }

    async fn close(&self) -> Result<()> {
        let mut tree = self.service.lock();
        if tree.live_sessions.remove(&self.id) {
            let reaped = tree.reap(self.id);
            tracing::debug!(session = %self.id, reaped, "Session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl() -> Acl {
        Acl::open_unsafe()
    }

    #[tokio::test]
    async fn test_sequential_names_start_at_one_per_parent() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        s.create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();

        let a = s
            .create("/demo/WORK_", b"0", &acl(), CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let b = s
            .create("/demo/WORK_", b"1", &acl(), CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(a, "/demo/WORK_0000000001");
        assert_eq!(b, "/demo/WORK_0000000002");
    }

    #[tokio::test]
    async fn test_create_existing_fails_with_node_exists() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        s.create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();

        let err = s
            .create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_node_exists());
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();

        let err = s
            .create("/missing/child", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_no_node());
    }

    #[tokio::test]
    async fn test_ephemeral_cannot_have_children() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        s.create("/eph", b"", &acl(), CreateMode::Ephemeral)
            .await
            .unwrap();

        let err = s
            .create("/eph/child", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoChildrenForEphemerals(_)));
    }

    #[tokio::test]
    async fn test_close_reaps_only_own_ephemerals() {
        let svc = MemoryCoordinator::new();
        let s1 = svc.connect();
        let s2 = svc.connect();
        s1.create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();
        s1.create("/demo/LEADER", b"", &acl(), CreateMode::Ephemeral)
            .await
            .unwrap();
        s2.create("/demo/WORK_", b"", &acl(), CreateMode::EphemeralSequential)
            .await
            .unwrap();

        s1.close().await.unwrap();

        assert!(svc.node_exists("/demo"), "persistent nodes survive");
        assert!(!svc.node_exists("/demo/LEADER"));
        assert_eq!(s2.children("/demo").await.unwrap(), vec!["WORK_0000000001"]);
        assert!(matches!(
            s1.get("/demo").await.unwrap_err(),
            Error::SessionExpired
        ));
    }

    #[tokio::test]
    async fn test_expire_session_journals_reaps() {
        let svc = MemoryCoordinator::with_journal();
        let s = svc.connect();
        s.create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();
        s.create("/demo/LEADER", b"", &acl(), CreateMode::Ephemeral)
            .await
            .unwrap();

        assert_eq!(svc.expire_session(s.id()), 1);
        assert_eq!(svc.expire_session(s.id()), 0, "second expiry is a no-op");

        let last = svc.journal().pop().unwrap();
        assert_eq!(last.op, Op::Reap);
        assert_eq!(last.path, "/demo/LEADER");
        assert_eq!(last.session, s.id());
    }

    #[tokio::test]
    async fn test_default_service_keeps_no_journal() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        s.create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();
        for i in 0..1000u32 {
            s.set("/demo", i.to_string().as_bytes()).await.unwrap();
        }
        s.delete("/demo").await.unwrap();

        assert!(svc.journal().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_and_non_empty() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        s.create("/demo", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();
        s.create("/demo/x", b"", &acl(), CreateMode::Persistent)
            .await
            .unwrap();

        assert!(matches!(
            s.delete("/demo").await.unwrap_err(),
            Error::NotEmpty(_)
        ));
        s.delete("/demo/x").await.unwrap();
        assert!(s.delete("/demo/x").await.unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn test_children_lists_direct_children_only() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        for path in ["/a", "/a/b", "/a/b/c", "/a/d", "/ab"] {
            s.create(path, b"", &acl(), CreateMode::Persistent)
                .await
                .unwrap();
        }

        assert_eq!(s.children("/a").await.unwrap(), vec!["b", "d"]);
        assert_eq!(s.children("/").await.unwrap(), vec!["a", "ab"]);
    }

    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let svc = MemoryCoordinator::new();
        let s = svc.connect();
        for path in ["relative", "/trailing/", "/double//slash"] {
            assert!(matches!(
                s.exists(path).await.unwrap_err(),
                Error::InvalidPath(_)
            ));
        }
    }
}
