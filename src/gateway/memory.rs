//! An in-process ensemble.
//!
//! [`MemoryStore`] keeps a node tree with the same observable rules as a ZooKeeper ensemble:
//! versions bump on every write, sequential names come from the parent's child version,
//! ephemeral nodes vanish with their session, and watches are one-shot. Each
//! [`MemoryGateway`] handed out by [`MemoryStore::gateway`] behaves like one client connection,
//! and exposes hooks for simulating connection loss and session expiry.

use super::{SessionEvent, StoreGateway, Watcher};
use crate::{
    path, CreateMode, Error, KeeperState, Stat, WatchType, WatchedEvent, WatchedEventType,
};
use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ZooKeeper's code for malformed arguments.
const BAD_ARGUMENTS: i32 = -8;

/// Whether new sessions can be established against a [`MemoryStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    /// Connection attempts succeed immediately.
    Up,
    /// Connection attempts never complete.
    Unreachable,
    /// Connection attempts fail with [`Error::ConnectionLoss`].
    Refusing,
}

/// A shared in-memory node tree that any number of gateways can connect to.
#[derive(Clone)]
pub struct MemoryStore {
    ensemble: Arc<Mutex<Ensemble>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    /// Creates an ensemble that holds only the root node.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                stat: Stat::default(),
                children: BTreeSet::new(),
            },
        );
        MemoryStore {
            ensemble: Arc::new(Mutex::new(Ensemble {
                nodes,
                zxid: 0,
                next_session: 0,
                sessions: HashMap::new(),
                watchers: HashMap::new(),
                availability: Availability::Up,
            })),
        }
    }

    /// Hands out a new, not yet connected, client connection.
    pub fn gateway(&self) -> MemoryGateway {
        MemoryGateway {
            ensemble: self.ensemble.clone(),
            session: Mutex::new(None),
        }
    }

    /// Controls how future connection attempts behave.
    pub fn set_availability(&self, availability: Availability) {
        self.ensemble.lock().availability = availability;
    }

    /// Every path currently in the tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.ensemble.lock().nodes.keys().cloned().collect()
    }

    /// The raw payload and metadata of a node, bypassing sessions entirely.
    pub fn node(&self, path: &str) -> Option<(Vec<u8>, Stat)> {
        self.ensemble
            .lock()
            .nodes
            .get(path)
            .map(|n| (n.data.clone(), n.stat))
    }

    /// The number of one-shot watches currently armed on `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.ensemble
            .lock()
            .watchers
            .get(path)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ens = self.ensemble.lock();
        f.debug_struct("MemoryStore")
            .field("nodes", &ens.nodes.len())
            .field("sessions", &ens.sessions.len())
            .field("availability", &ens.availability)
            .finish()
    }
}

struct Node {
    data: Vec<u8>,
    stat: Stat,
    children: BTreeSet<String>,
}

struct Session {
    events: mpsc::UnboundedSender<SessionEvent>,
    connected: bool,
}

struct PendingWatch {
    session: i64,
    wtype: WatchType,
    tx: oneshot::Sender<WatchedEvent>,
}

struct Ensemble {
    nodes: BTreeMap<String, Node>,
    zxid: u64,
    next_session: i64,
    sessions: HashMap<i64, Session>,
    /// Armed one-shot watches (path -> watchers).
    watchers: HashMap<String, Vec<PendingWatch>>,
    availability: Availability,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn bad_arguments(path: &str) -> Error {
    Error::Unexpected {
        code: BAD_ARGUMENTS,
        path: path.to_string(),
    }
}

fn well_formed(path: &str) -> bool {
    path.starts_with('/') && !path.contains("//") && (path == "/" || !path.ends_with('/'))
}

fn check_version(path: &str, stat: &Stat, version: Option<i32>) -> Result<(), Error> {
    match version {
        Some(v) if v != stat.version => Err(Error::VersionConflict {
            path: path.to_string(),
            expected: Some(v),
        }),
        _ => Ok(()),
    }
}

impl Ensemble {
    fn arm(&mut self, path: &str, wtype: WatchType, session: i64) -> Watcher {
        let (tx, rx) = oneshot::channel();
        self.watchers
            .entry(path.to_string())
            .or_default()
            .push(PendingWatch { session, wtype, tx });
        rx
    }

    fn fire(&mut self, path: &str, event_type: WatchedEventType) {
        let mut remove = false;
        if let Some(watchers) = self.watchers.get_mut(path) {
            let mut i = 0;
            while i < watchers.len() {
                if watchers[i].wtype.triggered_by(event_type) {
                    // this watcher is no longer active
                    let w = watchers.swap_remove(i);
                    // NOTE: ignore the case where the receiver has been dropped
                    let _ = w.tx.send(WatchedEvent {
                        event_type,
                        keeper_state: KeeperState::SyncConnected,
                        path: path.to_string(),
                    });
                } else {
                    i += 1;
                }
            }
            remove = watchers.is_empty();
        }
        if remove {
            self.watchers.remove(path);
        }
    }

    fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
        session: i64,
    ) -> Result<String, Error> {
        let parent_path = match path::parent(path) {
            Some(p) => p.to_string(),
            None => {
                return Err(Error::NodeExists {
                    path: path.to_string(),
                })
            }
        };
        let (cversion, ephemeral_parent) = match self.nodes.get(&parent_path) {
            Some(parent) => (parent.stat.cversion, parent.stat.is_ephemeral()),
            None => {
                return Err(Error::NoNode {
                    path: path.to_string(),
                })
            }
        };
        if ephemeral_parent {
            return Err(Error::NoChildrenForEphemerals {
                path: path.to_string(),
            });
        }

        let name = if mode.is_sequential() {
            format!("{}{:010}", path, cversion)
        } else {
            path.to_string()
        };
        if !well_formed(&name) {
            return Err(bad_arguments(&name));
        }
        if self.nodes.contains_key(&name) {
            return Err(Error::NodeExists { path: name });
        }

        self.zxid += 1;
        let zxid = self.zxid;
        let now = now_millis();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(path::basename(&name).to_string());
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children += 1;
        }
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            ctime: now,
            mtime: now,
            version: 0,
            cversion: 0,
            aversion: 0,
            ephemeral_owner: if mode.is_ephemeral() { session } else { 0 },
            data_length: data.len() as i32,
            num_children: 0,
            pzxid: zxid,
        };
        self.nodes.insert(
            name.clone(),
            Node {
                data,
                stat,
                children: BTreeSet::new(),
            },
        );

        self.fire(&name, WatchedEventType::NodeCreated);
        self.fire(&parent_path, WatchedEventType::NodeChildrenChanged);
        Ok(name)
    }

    fn delete(&mut self, path: &str, version: Option<i32>) -> Result<(), Error> {
        if path == "/" {
            return Err(bad_arguments(path));
        }
        let node = self.nodes.get(path).ok_or_else(|| Error::NoNode {
            path: path.to_string(),
        })?;
        check_version(path, &node.stat, version)?;
        if !node.children.is_empty() {
            return Err(Error::NotEmpty {
                path: path.to_string(),
            });
        }
        self.remove(path);
        Ok(())
    }

    fn remove(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        self.zxid += 1;
        let zxid = self.zxid;
        let parent_path = path::parent(path).unwrap_or("/").to_string();
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(path::basename(path));
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children -= 1;
        }
        self.fire(path, WatchedEventType::NodeDeleted);
        self.fire(&parent_path, WatchedEventType::NodeChildrenChanged);
    }

    fn set_data(&mut self, path: &str, data: Vec<u8>, version: Option<i32>) -> Result<Stat, Error> {
        let zxid = self.zxid + 1;
        let node = self.nodes.get_mut(path).ok_or_else(|| Error::NoNode {
            path: path.to_string(),
        })?;
        check_version(path, &node.stat, version)?;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = now_millis();
        node.stat.data_length = data.len() as i32;
        node.data = data;
        let stat = node.stat;
        self.zxid = zxid;
        self.fire(path, WatchedEventType::NodeDataChanged);
        Ok(stat)
    }

    fn end_session(&mut self, session: i64) {
        self.sessions.remove(&session);
        for watchers in self.watchers.values_mut() {
            watchers.retain(|w| w.session != session);
        }
        self.watchers.retain(|_, w| !w.is_empty());

        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == session)
            .map(|(p, _)| p.clone())
            .collect();
        owned.sort();
        for path in owned.iter().rev() {
            self.remove(path);
        }
    }

    fn send(&self, session: i64, event: SessionEvent) {
        if let Some(s) = self.sessions.get(&session) {
            let _ = s.events.unbounded_send(event);
        }
    }
}

/// One client connection to a [`MemoryStore`].
pub struct MemoryGateway {
    ensemble: Arc<Mutex<Ensemble>>,
    session: Mutex<Option<i64>>,
}

impl fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("session", &self.session_id())
            .finish()
    }
}

impl MemoryGateway {
    /// The id of the session this connection currently holds, if any.
    pub fn session_id(&self) -> Option<i64> {
        *self.session.lock()
    }

    /// Simulates a transient connection loss. The session, its ephemeral nodes, and its
    /// watches survive, but calls fail with [`Error::ConnectionLoss`] until
    /// [`reconnect`](MemoryGateway::reconnect).
    pub fn disconnect(&self) {
        self.set_connected(false, KeeperState::Disconnected);
    }

    /// Ends a simulated connection loss.
    pub fn reconnect(&self) {
        self.set_connected(true, KeeperState::SyncConnected);
    }

    /// Simulates the ensemble expiring the session: its ephemeral nodes are removed, its
    /// watches are discarded, and calls fail with [`Error::SessionExpired`].
    pub fn expire(&self) {
        let mut ens = self.ensemble.lock();
        if let Some(id) = *self.session.lock() {
            ens.send(id, SessionEvent::State(KeeperState::Expired));
            ens.end_session(id);
        }
    }

    /// Pushes an arbitrary signal onto the current session's event stream.
    pub fn notify(&self, event: SessionEvent) {
        let ens = self.ensemble.lock();
        if let Some(id) = *self.session.lock() {
            ens.send(id, event);
        }
    }

    fn set_connected(&self, connected: bool, state: KeeperState) {
        let mut ens = self.ensemble.lock();
        if let Some(id) = *self.session.lock() {
            if let Some(s) = ens.sessions.get_mut(&id) {
                s.connected = connected;
                let _ = s.events.unbounded_send(SessionEvent::State(state));
            }
        }
    }

    fn live(&self, ens: &Ensemble) -> Result<i64, Error> {
        let id = self.session.lock().ok_or(Error::ConnectionLoss)?;
        match ens.sessions.get(&id) {
            None => Err(Error::SessionExpired),
            Some(s) if !s.connected => Err(Error::ConnectionLoss),
            Some(_) => Ok(id),
        }
    }
}

#[async_trait]
impl StoreGateway for MemoryGateway {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, Error> {
        let availability = self.ensemble.lock().availability;
        match availability {
            Availability::Unreachable => futures::future::pending().await,
            Availability::Refusing => Err(Error::ConnectionLoss),
            Availability::Up => {
                let mut ens = self.ensemble.lock();
                let mut current = self.session.lock();
                if let Some(old) = current.take() {
                    ens.end_session(old);
                }
                ens.next_session += 1;
                let id = ens.next_session;
                let (tx, rx) = mpsc::unbounded();
                ens.sessions.insert(
                    id,
                    Session {
                        events: tx,
                        connected: true,
                    },
                );
                *current = Some(id);
                Ok(rx)
            }
        }
    }

    async fn close(&self) -> Result<(), Error> {
        let mut ens = self.ensemble.lock();
        if let Some(id) = self.session.lock().take() {
            ens.end_session(id);
        }
        Ok(())
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String, Error> {
        let mut ens = self.ensemble.lock();
        let session = self.live(&ens)?;
        ens.create(path, data, mode, session)
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>, Error> {
        let ens = self.ensemble.lock();
        self.live(&ens)?;
        Ok(ens.nodes.get(path).map(|n| n.stat))
    }

    async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, Watcher), Error> {
        let mut ens = self.ensemble.lock();
        let session = self.live(&ens)?;
        let stat = ens.nodes.get(path).map(|n| n.stat);
        Ok((stat, ens.arm(path, WatchType::Exist, session)))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), Error> {
        let ens = self.ensemble.lock();
        self.live(&ens)?;
        ens.nodes
            .get(path)
            .map(|n| (n.data.clone(), n.stat))
            .ok_or_else(|| Error::NoNode {
                path: path.to_string(),
            })
    }

    async fn get_data_w(&self, path: &str) -> Result<(Vec<u8>, Stat, Watcher), Error> {
        let mut ens = self.ensemble.lock();
        let session = self.live(&ens)?;
        let (data, stat) = ens
            .nodes
            .get(path)
            .map(|n| (n.data.clone(), n.stat))
            .ok_or_else(|| Error::NoNode {
                path: path.to_string(),
            })?;
        Ok((data, stat, ens.arm(path, WatchType::Data, session)))
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        version: Option<i32>,
    ) -> Result<Stat, Error> {
        let mut ens = self.ensemble.lock();
        self.live(&ens)?;
        ens.set_data(path, data, version)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), Error> {
        let mut ens = self.ensemble.lock();
        self.live(&ens)?;
        ens.delete(path, version)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, Error> {
        let ens = self.ensemble.lock();
        self.live(&ens)?;
        ens.nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .ok_or_else(|| Error::NoNode {
                path: path.to_string(),
            })
    }

    async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Watcher), Error> {
        let mut ens = self.ensemble.lock();
        let session = self.live(&ens)?;
        let children: Vec<String> = ens
            .nodes
            .get(path)
            .map(|n| n.children.iter().cloned().collect())
            .ok_or_else(|| Error::NoNode {
                path: path.to_string(),
            })?;
        Ok((children, ens.arm(path, WatchType::Child, session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn connected(store: &MemoryStore) -> (MemoryGateway, mpsc::UnboundedReceiver<SessionEvent>) {
        let gw = store.gateway();
        let events = gw.connect().await.unwrap();
        (gw, events)
    }

    #[tokio::test]
    async fn sequential_suffix_follows_parent_cversion() {
        let store = MemoryStore::new();
        let (gw, _events) = connected(&store).await;
        gw.create("/e", b"{}".to_vec(), CreateMode::Persistent)
            .await
            .unwrap();
        let a = gw
            .create("/e/-", vec![], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let b = gw
            .create("/e/n-", vec![], CreateMode::PersistentSequential)
            .await
            .unwrap();
        assert_eq!(a, "/e/-0000000000");
        assert_eq!(b, "/e/n-0000000001");

        gw.delete(&a, None).await.unwrap();
        let c = gw
            .create("/e/-", vec![], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        // deletes bump the child version too
        assert_eq!(c, "/e/-0000000003");
    }

    #[tokio::test]
    async fn create_requires_parent() {
        let store = MemoryStore::new();
        let (gw, _events) = connected(&store).await;
        assert_eq!(
            gw.create("/a/b", vec![], CreateMode::Persistent).await,
            Err(Error::NoNode {
                path: "/a/b".into()
            })
        );
        gw.create("/a", vec![], CreateMode::Ephemeral).await.unwrap();
        assert_eq!(
            gw.create("/a/b", vec![], CreateMode::Persistent).await,
            Err(Error::NoChildrenForEphemerals {
                path: "/a/b".into()
            })
        );
        assert_eq!(
            gw.create("/a", vec![], CreateMode::Persistent).await,
            Err(Error::NodeExists { path: "/a".into() })
        );
    }

    #[tokio::test]
    async fn versions_guard_writes() {
        let store = MemoryStore::new();
        let (gw, _events) = connected(&store).await;
        gw.create("/v", vec![1], CreateMode::Persistent)
            .await
            .unwrap();
        let stat = gw.set_data("/v", vec![2], Some(0)).await.unwrap();
        assert_eq!(stat.version, 1);
        assert!(stat.mzxid > stat.czxid);
        assert_eq!(
            gw.set_data("/v", vec![3], Some(0)).await,
            Err(Error::VersionConflict {
                path: "/v".into(),
                expected: Some(0)
            })
        );
        assert_eq!(
            gw.delete("/v", Some(7)).await,
            Err(Error::VersionConflict {
                path: "/v".into(),
                expected: Some(7)
            })
        );
        gw.delete("/v", Some(1)).await.unwrap();
        assert_eq!(gw.exists("/v").await, Ok(None));
    }

    #[tokio::test]
    async fn delete_refuses_parents() {
        let store = MemoryStore::new();
        let (gw, _events) = connected(&store).await;
        gw.create("/p", vec![], CreateMode::Persistent).await.unwrap();
        gw.create("/p/c", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(
            gw.delete("/p", None).await,
            Err(Error::NotEmpty { path: "/p".into() })
        );
    }

    #[tokio::test]
    async fn watches_fire_once() {
        let store = MemoryStore::new();
        let (gw, _events) = connected(&store).await;
        gw.create("/w", vec![], CreateMode::Persistent).await.unwrap();

        let (_, _, data) = gw.get_data_w("/w").await.unwrap();
        let (_, children) = gw.get_children_w("/w").await.unwrap();
        let (_, created) = gw.exists_w("/w/c").await.unwrap();
        assert_eq!(store.watch_count("/w"), 2);

        gw.set_data("/w", vec![1], None).await.unwrap();
        let e = data.await.unwrap();
        assert_eq!(e.event_type, WatchedEventType::NodeDataChanged);
        assert_eq!(e.path, "/w");
        // the child watch is not consumed by a data change
        assert_eq!(store.watch_count("/w"), 1);

        gw.create("/w/c", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(
            created.await.unwrap().event_type,
            WatchedEventType::NodeCreated
        );
        assert_eq!(
            children.await.unwrap().event_type,
            WatchedEventType::NodeChildrenChanged
        );
        assert_eq!(store.watch_count("/w"), 0);
    }

    #[tokio::test]
    async fn expiry_removes_ephemerals_and_watches() {
        let store = MemoryStore::new();
        let (gw, mut events) = connected(&store).await;
        let (other, _other_events) = connected(&store).await;
        gw.create("/eph", vec![], CreateMode::Ephemeral).await.unwrap();
        let (_, _, own) = gw.get_data_w("/eph").await.unwrap();
        let (_, _, foreign) = other.get_data_w("/eph").await.unwrap();

        gw.expire();
        assert_eq!(
            events.next().await,
            Some(SessionEvent::State(KeeperState::Expired))
        );
        assert_eq!(events.next().await, None);
        assert!(own.await.is_err());
        assert_eq!(
            foreign.await.unwrap().event_type,
            WatchedEventType::NodeDeleted
        );
        assert_eq!(gw.exists("/eph").await, Err(Error::SessionExpired));
        assert_eq!(other.exists("/eph").await, Ok(None));
    }

    #[tokio::test]
    async fn disconnect_is_transient() {
        let store = MemoryStore::new();
        let (gw, mut events) = connected(&store).await;
        gw.create("/eph", vec![], CreateMode::Ephemeral).await.unwrap();
        gw.disconnect();
        assert_eq!(
            events.next().await,
            Some(SessionEvent::State(KeeperState::Disconnected))
        );
        assert_eq!(gw.exists("/eph").await, Err(Error::ConnectionLoss));
        gw.reconnect();
        assert_eq!(
            events.next().await,
            Some(SessionEvent::State(KeeperState::SyncConnected))
        );
        assert!(gw.exists("/eph").await.unwrap().unwrap().is_ephemeral());
    }

    #[tokio::test]
    async fn refusing_store() {
        let store = MemoryStore::new();
        store.set_availability(Availability::Refusing);
        assert_eq!(
            store.gateway().connect().await.err(),
            Some(Error::ConnectionLoss)
        );
    }
}
