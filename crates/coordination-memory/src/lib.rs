//! In-memory (single process) coordination store for tests and local
//! development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use convoy_coordination::{
    CoordinationClient, CreateMode, SessionId, Stat, Watch, WatchEvent, WatchTrigger, basename,
    parent, validate, watch_pair,
};
use parking_lot::Mutex;
use tracing::debug;

/// A failure to inject into the next operation issued against the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The request never reaches the store.
    LoseRequest,

    /// The request is applied but its reply is lost, whether the
    /// operation succeeded or failed.
    LoseResponse,
}

#[derive(Debug)]
struct Node {
    data: Bytes,
    version: i32,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
}

impl Node {
    const fn new(data: Bytes, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            version: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            ephemeral_owner: self.ephemeral_owner,
            num_children: self.children.len(),
        }
    }
}

type Watches = HashMap<String, Vec<(SessionId, WatchTrigger)>>;

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    data_watches: Watches,
    child_watches: Watches,
    sessions: HashSet<SessionId>,
    next_session: SessionId,
    faults: VecDeque<Fault>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(Bytes::new(), None));

        Self {
            nodes,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            sessions: HashSet::new(),
            next_session: 1,
            faults: VecDeque::new(),
        }
    }
}

fn fire(watches: &mut Watches, path: &str, event: WatchEvent) {
    if let Some(triggers) = watches.remove(path) {
        for (_, trigger) in triggers {
            trigger.fire(event);
        }
    }
}

fn register(watches: &mut Watches, path: &str, session: SessionId) -> Watch {
    let (trigger, watch) = watch_pair(path);
    let triggers = watches.entry(path.to_string()).or_default();
    triggers.retain(|(_, trigger)| !trigger.is_abandoned());
    triggers.push((session, trigger));
    watch
}

fn checked(path: &str) -> Result<(), Error> {
    if validate(path) {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

fn check_version(path: &str, expected: Option<i32>, actual: i32) -> Result<(), Error> {
    match expected {
        Some(expected) if expected != actual => Err(Error::BadVersion {
            path: path.to_string(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

impl Tree {
    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: Bytes,
        mode: CreateMode,
    ) -> Result<(), Error> {
        checked(path)?;
        if self.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }

        let parent_path = parent(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        let parent_node = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(Error::NoChildrenForEphemerals(parent_path.to_string()));
        }
        parent_node.children.insert(basename(path).to_string());

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(session),
        };
        self.nodes.insert(path.to_string(), Node::new(data, owner));

        fire(&mut self.data_watches, path, WatchEvent::NodeCreated);
        fire(
            &mut self.child_watches,
            parent_path,
            WatchEvent::NodeChildrenChanged,
        );

        Ok(())
    }

    fn node(&self, path: &str) -> Result<&Node, Error> {
        checked(path)?;
        self.nodes
            .get(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    fn set(&mut self, path: &str, data: Bytes, expected: Option<i32>) -> Result<Stat, Error> {
        checked(path)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;

        check_version(path, expected, node.version)?;

        node.data = data;
        node.version += 1;
        let stat = node.stat();

        fire(&mut self.data_watches, path, WatchEvent::NodeDataChanged);

        Ok(stat)
    }

    fn delete(&mut self, path: &str, expected: Option<i32>) -> Result<(), Error> {
        let node = self.node(path)?;
        let parent_path = parent(path).ok_or_else(|| Error::InvalidPath(path.to_string()))?;

        check_version(path, expected, node.version)?;
        if !node.children.is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        if let Some(parent_node) = self.nodes.get_mut(parent_path) {
            parent_node.children.remove(basename(path));
        }

        fire(&mut self.data_watches, path, WatchEvent::NodeDeleted);
        fire(&mut self.child_watches, path, WatchEvent::NodeDeleted);
        fire(
            &mut self.child_watches,
            parent_path,
            WatchEvent::NodeChildrenChanged,
        );

        Ok(())
    }

    fn close_session(&mut self, session: SessionId) {
        if !self.sessions.remove(&session) {
            return;
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &owned {
            // Ephemeral nodes never have children, so this cannot fail.
            let _ = self.delete(path, None);
        }

        // Dropping the triggers resolves the session's own watches.
        for watches in [&mut self.data_watches, &mut self.child_watches] {
            for triggers in watches.values_mut() {
                triggers.retain(|(owner, _)| *owner != session);
            }
            watches.retain(|_, triggers| !triggers.is_empty());
        }

        debug!(
            "session {session} closed, removed {} ephemeral nodes",
            owned.len()
        );
    }
}

/// An in-process coordination store. Cloning shares the underlying tree.
#[derive(Clone, Debug, Default)]
pub struct MemoryCoordinationStore {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCoordinationStore {
    /// Creates an empty store holding only the root node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session.
    #[must_use]
    pub fn connect(&self) -> MemoryCoordinationClient {
        let mut tree = self.tree.lock();
        let session = tree.next_session;
        tree.next_session += 1;
        tree.sessions.insert(session);

        MemoryCoordinationClient {
            store: self.clone(),
            session,
        }
    }

    /// Ends a session as if its timeout had elapsed.
    pub fn expire_session(&self, session: SessionId) {
        self.tree.lock().close_session(session);
    }

    /// Queues a fault for the next operation issued by any session.
    pub fn inject_fault(&self, fault: Fault) {
        self.tree.lock().faults.push_back(fault);
    }

    /// All paths in the store, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.tree.lock().nodes.keys().cloned().collect()
    }

    fn apply<T>(
        &self,
        session: SessionId,
        operation: impl FnOnce(&mut Tree) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut tree = self.tree.lock();
        if !tree.sessions.contains(&session) {
            return Err(Error::SessionExpired(session));
        }

        match tree.faults.pop_front() {
            Some(Fault::LoseRequest) => Err(Error::ConnectionLoss),
            Some(Fault::LoseResponse) => {
                let _ = operation(&mut *tree);
                Err(Error::ConnectionLoss)
            }
            None => operation(&mut *tree),
        }
    }
}

/// A session with a [`MemoryCoordinationStore`]. Clones share the session.
#[derive(Clone, Debug)]
pub struct MemoryCoordinationClient {
    store: MemoryCoordinationStore,
    session: SessionId,
}

impl MemoryCoordinationClient {
    /// The store this session belongs to.
    #[must_use]
    pub const fn store(&self) -> &MemoryCoordinationStore {
        &self.store
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinationClient {
    type Error = Error;

    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<(), Self::Error> {
        let session = self.session;
        self.store
            .apply(session, |tree| tree.create(session, path, data, mode))
    }

    async fn get(&self, path: &str) -> Result<(Bytes, Stat), Self::Error> {
        self.store.apply(self.session, |tree| {
            let node = tree.node(path)?;
            Ok((node.data.clone(), node.stat()))
        })
    }

    async fn get_watched(&self, path: &str) -> Result<(Bytes, Stat, Watch), Self::Error> {
        let session = self.session;
        self.store.apply(session, |tree| {
            let (data, stat) = {
                let node = tree.node(path)?;
                (node.data.clone(), node.stat())
            };
            let watch = register(&mut tree.data_watches, path, session);
            Ok((data, stat, watch))
        })
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>, Self::Error> {
        self.store.apply(self.session, |tree| {
            checked(path)?;
            Ok(tree.nodes.get(path).map(Node::stat))
        })
    }

    async fn exists_watched(&self, path: &str) -> Result<(Option<Stat>, Watch), Self::Error> {
        let session = self.session;
        self.store.apply(session, |tree| {
            checked(path)?;
            let stat = tree.nodes.get(path).map(Node::stat);
            let watch = register(&mut tree.data_watches, path, session);
            Ok((stat, watch))
        })
    }

    async fn set(
        &self,
        path: &str,
        data: Bytes,
        expected_version: Option<i32>,
    ) -> Result<Stat, Self::Error> {
        self.store
            .apply(self.session, |tree| tree.set(path, data, expected_version))
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), Self::Error> {
        self.store
            .apply(self.session, |tree| tree.delete(path, expected_version))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error> {
        self.store.apply(self.session, |tree| {
            Ok(tree.node(path)?.children.iter().cloned().collect())
        })
    }

    async fn children_watched(&self, path: &str) -> Result<(Vec<String>, Watch), Self::Error> {
        let session = self.session;
        self.store.apply(session, |tree| {
            let children = tree.node(path)?.children.iter().cloned().collect();
            let watch = register(&mut tree.child_watches, path, session);
            Ok((children, watch))
        })
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.store.expire_session(self.session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let client = MemoryCoordinationStore::new().connect();

        client
            .create("/app", Bytes::from_static(b"root"), CreateMode::Persistent)
            .await
            .unwrap();

        let (data, stat) = client.get("/app").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"root"));
        assert_eq!(stat.version, 0);
        assert_eq!(stat.ephemeral_owner, None);
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let client = MemoryCoordinationStore::new().connect();

        let result = client
            .create("/app/web", Bytes::new(), CreateMode::Persistent)
            .await;

        assert_matches!(result, Err(Error::NoNode(_)));
    }

    #[tokio::test]
    async fn test_create_existing_node() {
        let client = MemoryCoordinationStore::new().connect();
        client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();

        let result = client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await;

        assert_matches!(result, Err(Error::NodeExists(_)));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let client = MemoryCoordinationStore::new().connect();
        client
            .create("/app", Bytes::from_static(b"a"), CreateMode::Persistent)
            .await
            .unwrap();

        let stat = client
            .set("/app", Bytes::from_static(b"b"), Some(0))
            .await
            .unwrap();
        assert_eq!(stat.version, 1);

        let stale = client.set("/app", Bytes::from_static(b"c"), Some(0)).await;
        assert_matches!(
            stale,
            Err(Error::BadVersion {
                expected: 0,
                actual: 1,
                ..
            })
        );

        let (data, _) = client.get("/app").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_delete_rejects_parent_with_children() {
        let client = MemoryCoordinationStore::new().connect();
        client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        client
            .create("/app/conf", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();

        assert_matches!(client.delete("/app", None).await, Err(Error::NotEmpty(_)));

        client.delete("/app/conf", None).await.unwrap();
        client.delete("/app", None).await.unwrap();
        assert_eq!(client.exists("/app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_children_are_sorted() {
        let client = MemoryCoordinationStore::new().connect();
        client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        for name in ["web", "data", "business"] {
            client
                .create(&format!("/app/{name}"), Bytes::new(), CreateMode::Persistent)
                .await
                .unwrap();
        }

        assert_eq!(
            client.children("/app").await.unwrap(),
            vec!["business", "data", "web"]
        );
        assert_eq!(client.exists("/app").await.unwrap().unwrap().num_children, 3);
    }

    #[tokio::test]
    async fn test_ephemeral_nodes_vanish_with_session() {
        let store = MemoryCoordinationStore::new();
        let owner = store.connect();
        let observer = store.connect();

        owner
            .create("/alive", Bytes::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        let (stat, watch) = observer.exists_watched("/alive").await.unwrap();
        assert_eq!(stat.unwrap().ephemeral_owner, Some(owner.session_id()));

        owner.close().await.unwrap();

        assert_eq!(watch.fired().await, WatchEvent::NodeDeleted);
        assert_eq!(observer.exists("/alive").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ephemeral_nodes_cannot_have_children() {
        let client = MemoryCoordinationStore::new().connect();
        client
            .create("/alive", Bytes::new(), CreateMode::Ephemeral)
            .await
            .unwrap();

        let result = client
            .create("/alive/child", Bytes::new(), CreateMode::Persistent)
            .await;

        assert_matches!(result, Err(Error::NoChildrenForEphemerals(_)));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let client = MemoryCoordinationStore::new().connect();
        client.close().await.unwrap();

        assert_matches!(client.exists("/").await, Err(Error::SessionExpired(_)));
    }

    #[tokio::test]
    async fn test_watches_are_one_shot() {
        let client = MemoryCoordinationStore::new().connect();
        client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();

        let (_, _, watch) = client.get_watched("/app").await.unwrap();
        client
            .set("/app", Bytes::from_static(b"1"), None)
            .await
            .unwrap();
        assert_eq!(watch.fired().await, WatchEvent::NodeDataChanged);

        // Data changes do not reach child watches.
        let (_, watch) = client.children_watched("/app").await.unwrap();
        client
            .set("/app", Bytes::from_static(b"2"), None)
            .await
            .unwrap();
        client
            .create("/app/web", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(watch.fired().await, WatchEvent::NodeChildrenChanged);
    }

    #[tokio::test]
    async fn test_exists_watch_sees_creation() {
        let client = MemoryCoordinationStore::new().connect();

        let (stat, watch) = client.exists_watched("/shutdown").await.unwrap();
        assert_eq!(stat, None);

        client
            .create("/shutdown", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();

        assert_eq!(watch.fired().await, WatchEvent::NodeCreated);
    }

    #[tokio::test]
    async fn test_session_close_resolves_own_watches() {
        let client = MemoryCoordinationStore::new().connect();

        let (_, watch) = client.exists_watched("/never").await.unwrap();
        client.close().await.unwrap();

        assert_eq!(watch.fired().await, WatchEvent::SessionClosed);
    }

    #[tokio::test]
    async fn test_lost_request_is_not_applied() {
        let store = MemoryCoordinationStore::new();
        let client = store.connect();

        store.inject_fault(Fault::LoseRequest);
        let result = client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await;

        assert_matches!(result, Err(Error::ConnectionLoss));
        assert_eq!(client.exists("/app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lost_response_is_applied() {
        let store = MemoryCoordinationStore::new();
        let client = store.connect();

        store.inject_fault(Fault::LoseResponse);
        let result = client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await;

        assert_matches!(result, Err(Error::ConnectionLoss));
        assert!(client.exists("/app").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lost_response_hides_failure() {
        let store = MemoryCoordinationStore::new();
        let client = store.connect();
        client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();

        store.inject_fault(Fault::LoseResponse);
        let result = client
            .create("/app", Bytes::new(), CreateMode::Persistent)
            .await;

        assert_matches!(result, Err(Error::ConnectionLoss));
        assert_matches!(
            client.create("/app", Bytes::new(), CreateMode::Persistent).await,
            Err(Error::NodeExists(_))
        );
    }

    #[tokio::test]
    async fn test_invalid_paths_are_rejected() {
        let client = MemoryCoordinationStore::new().connect();

        assert_matches!(client.get("app").await, Err(Error::InvalidPath(_)));
        assert_matches!(client.delete("/", None).await, Err(Error::InvalidPath(_)));
    }
}
