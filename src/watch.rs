//! Durable watches.
//!
//! The store only offers one-shot watches. A subscription wraps them in a small state machine
//! that re-arms after every notification, survives reconnects, and reports what it saw to a
//! single consumer stream:
//!
//! ```text
//!   Arming --ok--> Armed --fired--> Arming
//!     |  \                            ^
//!     |   `--no node--> Armed(exists) |
//!     |                               |
//!     `--connection lost--> Lapsed --resync
//! ```
//!
//! Any state moves to `Stopped` when the consumer stops the watch or the client shuts down.

use crate::gateway::Watcher;
use crate::session::{Client, Inner};
use crate::{path, Error, KeeperState, Stat, WatchedEvent, WatchedEventType};
use futures::channel::{mpsc, oneshot};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use pin_project::pin_project;
use slog::{debug, o, trace, warn};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// What a watch subscription observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchMode {
    /// The node's payload.
    Data,
    /// The node's list of children.
    Children,
}

/// Options for [`Client::watch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchOptions {
    /// What to observe.
    pub mode: WatchMode,
    /// Deliver the current state once before any change is observed.
    pub initial_data: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            mode: WatchMode::Data,
            initial_data: false,
        }
    }
}

impl WatchOptions {
    /// Observe the node's payload.
    pub fn data() -> Self {
        WatchOptions::default()
    }

    /// Observe the node's children.
    pub fn children() -> Self {
        WatchOptions {
            mode: WatchMode::Children,
            initial_data: false,
        }
    }

    /// Also deliver the current state as soon as the watch is armed.
    pub fn with_initial_data(mut self) -> Self {
        self.initial_data = true;
        self
    }
}

/// Something a watch subscription observed.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// The node's current payload, decoded as JSON.
    Data {
        /// The decoded payload.
        value: serde_json::Value,
        /// The node's metadata at the time it was read.
        stat: Stat,
    },
    /// The node's current children, sorted.
    Children(Vec<String>),
    /// The node came (back) into existence.
    Created,
    /// The node was deleted. The subscription keeps waiting for it to be created again.
    Deleted,
    /// The node's payload was written. The new payload follows as [`WatchEvent::Data`].
    Changed,
    /// The session moved into a state that affects the subscription.
    Session(KeeperState),
    /// The subscription could not read or decode the node.
    Error(Error),
}

/// A live watch subscription.
///
/// `WatchHandle` is a [`Stream`] of [`WatchEvent`]s. The stream ends once the subscription is
/// stopped, either through [`WatchHandle::stop`], by closing the client, or by the session
/// expiring without automatic reconnection.
#[pin_project]
#[derive(Debug)]
pub struct WatchHandle {
    path: String,
    mode: WatchMode,
    stopper: WatchStopper,
    #[pin]
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl WatchHandle {
    /// The normalized path being watched.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// What the subscription observes.
    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Stops the subscription. Stopping twice does nothing.
    ///
    /// Events already queued for this handle are still yielded; no new ones are produced.
    pub fn stop(&self) {
        self.stopper.stop()
    }

    /// Whether [`stop`](WatchHandle::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopper.is_stopped()
    }

    /// A detached handle that can stop this subscription from elsewhere.
    pub fn stopper(&self) -> WatchStopper {
        self.stopper.clone()
    }
}

impl Stream for WatchHandle {
    type Item = WatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().events.poll_next(cx)
    }
}

/// Stops a watch subscription without owning its event stream.
#[derive(Clone, Debug)]
pub struct WatchStopper {
    stopped: Arc<AtomicBool>,
    control: mpsc::UnboundedSender<Control>,
}

impl WatchStopper {
    /// Stops the subscription. Stopping twice does nothing.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.control.unbounded_send(Control::Stop(None));
        }
    }

    /// Whether the subscription has been stopped through any handle.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum Control {
    /// Re-arm and deliver the current state, acknowledging once armed.
    Resync(oneshot::Sender<()>),
    /// Stop, telling the consumer about the session state if there is one.
    Stop(Option<KeeperState>),
}

struct Registration {
    control: mpsc::UnboundedSender<Control>,
}

/// The subscriptions owned by one client.
#[derive(Default)]
pub(crate) struct Registry {
    next: AtomicU64,
    subscriptions: Mutex<HashMap<u64, Registration>>,
}

impl Registry {
    fn insert(&self, control: mpsc::UnboundedSender<Control>) -> u64 {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(id, Registration { control });
        id
    }

    fn remove(&self, id: u64) {
        self.subscriptions.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Asks every subscription to re-arm against the current session, and waits until each
    /// one has done so (or gone away).
    pub(crate) async fn resync(&self) {
        let acks: Vec<_> = self
            .subscriptions
            .lock()
            .values()
            .filter_map(|r| {
                let (tx, rx) = oneshot::channel();
                r.control.unbounded_send(Control::Resync(tx)).ok().map(|_| rx)
            })
            .collect();
        // a subscription that stops instead of acknowledging drops its sender
        futures::future::join_all(acks).await;
    }

    /// Stops every subscription.
    pub(crate) fn stop_all(&self, reason: Option<KeeperState>) {
        for (_, r) in self.subscriptions.lock().drain() {
            let _ = r.control.unbounded_send(Control::Stop(reason));
        }
    }
}

enum Phase {
    /// Register a fresh one-shot watch. `fired` is what consumed the previous one.
    Arming {
        fired: Option<WatchedEventType>,
        deliver: bool,
    },
    /// A one-shot watch is outstanding.
    Armed(Watcher),
    /// Nothing is outstanding; the session has to come back first.
    Lapsed,
    Stopped(Option<KeeperState>),
}

enum Wake {
    Fired(Result<WatchedEvent, oneshot::Canceled>),
    Control(Option<Control>),
}

struct Subscription {
    id: u64,
    path: String,
    mode: WatchMode,
    inner: Arc<Inner>,
    sink: mpsc::UnboundedSender<WatchEvent>,
    control: mpsc::UnboundedReceiver<Control>,
    stopped: Arc<AtomicBool>,
    logger: slog::Logger,
    /// Whether the node existed when the watch was last armed.
    present: bool,
    /// Resync requests to acknowledge once the next arm attempt completes.
    acks: Vec<oneshot::Sender<()>>,
}

impl Subscription {
    async fn run(mut self, mut phase: Phase) {
        loop {
            phase = match phase {
                Phase::Arming { fired, deliver } => self.arm(fired, deliver).await,
                Phase::Armed(watcher) => self.wait(Some(watcher)).await,
                Phase::Lapsed => self.wait(None).await,
                Phase::Stopped(reason) => {
                    if let Some(state) = reason {
                        self.emit(WatchEvent::Session(state));
                    }
                    break;
                }
            };
        }
        self.inner.watches.remove(self.id);
        trace!(self.logger, "watch: stopped");
    }

    fn emit(&self, event: WatchEvent) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        self.sink.unbounded_send(event).is_ok()
    }

    async fn arm(&mut self, fired: Option<WatchedEventType>, deliver: bool) -> Phase {
        trace!(self.logger, "watch: setting watch"; "deliver" => deliver);
        let gateway = &self.inner.gateway;
        let armed = match self.mode {
            WatchMode::Data => gateway
                .get_data_w(&self.path)
                .await
                .map(|(data, stat, w)| (decode(&self.path, data, stat), w)),
            WatchMode::Children => gateway.get_children_w(&self.path).await.map(|(mut c, w)| {
                c.sort();
                (WatchEvent::Children(c), w)
            }),
        };

        let next = match armed {
            Ok((current, watcher)) => {
                let was_present = std::mem::replace(&mut self.present, true);
                let mut delivered = true;
                if !was_present {
                    delivered &= self.emit(WatchEvent::Created);
                }
                if fired == Some(WatchedEventType::NodeDataChanged) {
                    delivered &= self.emit(WatchEvent::Changed);
                }
                if deliver {
                    delivered &= self.emit(current);
                }
                if delivered {
                    Phase::Armed(watcher)
                } else {
                    Phase::Stopped(None)
                }
            }
            Err(Error::NoNode { .. }) => {
                let was_present = std::mem::replace(&mut self.present, false);
                let next = match self.inner.gateway.exists_w(&self.path).await {
                    Ok((None, watcher)) => Phase::Armed(watcher),
                    Ok((Some(_), _)) => {
                        trace!(self.logger, "watch: node came back while arming");
                        Phase::Arming {
                            fired: None,
                            deliver: true,
                        }
                    }
                    Err(e) => self.lapse(e),
                };
                if was_present {
                    debug!(self.logger, "watch: node deleted; waiting for it to return");
                    if !self.emit(WatchEvent::Deleted) {
                        return self.settle(Phase::Stopped(None));
                    }
                }
                next
            }
            Err(e) => self.lapse(e),
        };
        self.settle(next)
    }

    fn settle(&mut self, next: Phase) -> Phase {
        if let Phase::Arming { .. } = next {
            // acknowledge after the follow-up attempt instead
            return next;
        }
        for ack in self.acks.drain(..) {
            let _ = ack.send(());
        }
        next
    }

    /// Delivers the current state while keeping the outstanding store watch.
    async fn refresh(&mut self, watcher: Watcher) -> Phase {
        if self.present {
            let gateway = &self.inner.gateway;
            let current = match self.mode {
                WatchMode::Data => gateway
                    .get_data(&self.path)
                    .await
                    .map(|(data, stat)| decode(&self.path, data, stat)),
                WatchMode::Children => gateway.get_children(&self.path).await.map(|mut c| {
                    c.sort();
                    WatchEvent::Children(c)
                }),
            };
            match current {
                Ok(current) => {
                    if !self.emit(current) {
                        return self.settle(Phase::Stopped(None));
                    }
                }
                // the outstanding watch reports whatever happened instead
                Err(e) => debug!(self.logger, "watch: unable to refresh: {}", e),
            }
        }
        self.settle(Phase::Armed(watcher))
    }

    fn lapse(&self, e: Error) -> Phase {
        match e {
            Error::ConnectionLoss | Error::SessionExpired => {
                debug!(self.logger, "watch: lapsed until the session is back"; "reason" => %e);
                Phase::Lapsed
            }
            Error::OperationTimeout => Phase::Arming {
                fired: None,
                deliver: true,
            },
            Error::Closed => Phase::Stopped(None),
            e => {
                warn!(self.logger, "watch: unable to arm: {}", e);
                if self.emit(WatchEvent::Error(e)) {
                    Phase::Lapsed
                } else {
                    Phase::Stopped(None)
                }
            }
        }
    }

    async fn wait(&mut self, mut watcher: Option<Watcher>) -> Phase {
        let wake = match watcher.as_mut() {
            Some(armed) => tokio::select! {
                fired = armed => Wake::Fired(fired),
                control = self.control.next() => Wake::Control(control),
            },
            None => Wake::Control(self.control.next().await),
        };

        match wake {
            Wake::Fired(Ok(event)) => self.on_fired(event),
            Wake::Fired(Err(_)) => {
                debug!(self.logger, "watch: store discarded the watch");
                Phase::Lapsed
            }
            Wake::Control(Some(Control::Resync(ack))) => {
                self.acks.push(ack);
                // a watch that outlived a transient disconnect is still registered
                match watcher.map(|mut w| (w.try_recv(), w)) {
                    Some((Ok(None), live)) => self.refresh(live).await,
                    Some((Ok(Some(event)), _)) => self.on_fired(event),
                    _ => Phase::Arming {
                        fired: None,
                        deliver: true,
                    },
                }
            }
            Wake::Control(Some(Control::Stop(reason))) => Phase::Stopped(reason),
            Wake::Control(None) => Phase::Stopped(None),
        }
    }

    fn on_fired(&self, event: WatchedEvent) -> Phase {
        trace!(self.logger, "watch: notification"; "event" => ?event.event_type);
        if self.stopped.load(Ordering::SeqCst) {
            return Phase::Stopped(None);
        }
        match event.event_type {
            WatchedEventType::None => {
                if !self.emit(WatchEvent::Session(event.keeper_state)) {
                    return Phase::Stopped(None);
                }
                match event.keeper_state {
                    KeeperState::SyncConnected | KeeperState::ConnectedReadOnly => {
                        Phase::Arming {
                            fired: None,
                            deliver: true,
                        }
                    }
                    _ => Phase::Lapsed,
                }
            }
            fired => Phase::Arming {
                fired: Some(fired),
                deliver: true,
            },
        }
    }
}

fn decode(path: &str, data: Vec<u8>, stat: Stat) -> WatchEvent {
    match serde_json::from_slice(&data) {
        Ok(value) => WatchEvent::Data { value, stat },
        Err(e) => WatchEvent::Error(Error::deserialization(path, e)),
    }
}

impl Client {
    /// Subscribes to changes of the node at `path`.
    ///
    /// Fails with [`Error::NoNode`] if the node does not exist at the time of the call. Once
    /// subscribed, the watch keeps following the path through deletions, re-creations, and
    /// reconnections until it is stopped.
    pub async fn watch(&self, path: &str, options: WatchOptions) -> Result<WatchHandle, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let path = path::normalize(path);
        let logger = self.logger().new(o!("path" => path.clone()));
        trace!(logger, "watch: entered"; "mode" => ?options.mode);

        let (control_tx, control_rx) = mpsc::unbounded();
        // registered before arming, so a reconnect in between still reaches the subscription
        let id = self.inner.watches.insert(control_tx.clone());
        let gateway = &self.inner.gateway;
        let armed = match options.mode {
            WatchMode::Data => gateway
                .get_data_w(&path)
                .await
                .map(|(data, stat, w)| (decode(&path, data, stat), w)),
            WatchMode::Children => gateway.get_children_w(&path).await.map(|(mut c, w)| {
                c.sort();
                (WatchEvent::Children(c), w)
            }),
        };
        let (current, watcher) = match armed {
            Ok(armed) => armed,
            Err(e) => {
                self.inner.watches.remove(id);
                if let Error::NoNode { .. } = e {
                    trace!(logger, "watch: node does not exist");
                    return Err(Error::NoNode { path });
                }
                return Err(e);
            }
        };

        let (sink, events) = mpsc::unbounded();
        if options.initial_data {
            let _ = sink.unbounded_send(current);
        }
        let stopped = Arc::new(AtomicBool::new(false));
        let subscription = Subscription {
            id,
            path: path.clone(),
            mode: options.mode,
            inner: self.inner.clone(),
            sink,
            control: control_rx,
            stopped: stopped.clone(),
            logger,
            present: true,
            acks: Vec::new(),
        };
        tokio::spawn(subscription.run(Phase::Armed(watcher)));

        Ok(WatchHandle {
            path,
            mode: options.mode,
            stopper: WatchStopper {
                stopped,
                control: control_tx,
            },
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::{Availability, MemoryStore};
    use crate::session::tests::{builder, connected, next_event};
    use crate::{ClientEvent, CreateMode, PutOptions};
    use serde_json::json;
    use std::time::Duration;

    async fn next(handle: &mut WatchHandle) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(5), handle.next())
            .await
            .expect("timed out waiting for watch event")
            .expect("watch ended")
    }

    async fn next_data(handle: &mut WatchHandle) -> serde_json::Value {
        loop {
            match next(handle).await {
                WatchEvent::Data { value, .. } => return value,
                WatchEvent::Changed | WatchEvent::Created => {}
                e => panic!("unexpected watch event {:?}", e),
            }
        }
    }

    async fn quiet(handle: &mut WatchHandle) -> bool {
        tokio::time::timeout(Duration::from_millis(50), handle.next())
            .await
            .is_err()
    }

    #[tokio::test]
    async fn data_watch_delivers_each_write() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client
            .put("/a", &json!({"hello": "world"}), PutOptions::default())
            .await
            .unwrap();

        let mut w = client
            .watch("/a", WatchOptions::data().with_initial_data())
            .await
            .unwrap();
        assert_eq!(w.path(), "/a");
        match next(&mut w).await {
            WatchEvent::Data { value, stat } => {
                assert_eq!(value, json!({"hello": "world"}));
                assert_eq!(stat.version, 0);
            }
            e => panic!("unexpected watch event {:?}", e),
        }

        client
            .update("/a", &json!({"hello": "again"}), None)
            .await
            .unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        assert_eq!(next_data(&mut w).await, json!({"hello": "again"}));

        client.update("/a", &json!(3), None).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        assert_eq!(next_data(&mut w).await, json!(3));
        assert!(quiet(&mut w).await);
    }

    #[tokio::test]
    async fn write_right_after_subscribing_is_delivered() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client.put("/a", &1, PutOptions::default()).await.unwrap();

        let mut w = client.watch("/a", WatchOptions::data()).await.unwrap();
        assert_eq!(store.watch_count("/a"), 1);
        client.update("/a", &2, None).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        match next(&mut w).await {
            WatchEvent::Data { value, stat } => {
                assert_eq!(value, json!(2));
                assert_eq!(stat.version, 1);
            }
            e => panic!("unexpected watch event {:?}", e),
        }
        assert!(quiet(&mut w).await);
    }

    #[tokio::test]
    async fn child_watch_without_initial_data_reports_only_changes() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client.mkdirp("/kids/a").await.unwrap();

        let mut w = client
            .watch("/kids", WatchOptions::children())
            .await
            .unwrap();
        assert!(quiet(&mut w).await);

        client.mkdirp("/kids/b").await.unwrap();
        assert_eq!(
            next(&mut w).await,
            WatchEvent::Children(vec!["a".into(), "b".into()])
        );
        assert!(quiet(&mut w).await);
    }

    #[tokio::test]
    async fn transient_reconnect_keeps_a_single_store_watch() {
        let store = MemoryStore::new();
        let (client, gw, mut events) = connected(&store, builder()).await;
        client.put("/t", &1, PutOptions::default()).await.unwrap();
        let mut w = client.watch("/t", WatchOptions::data()).await.unwrap();

        gw.disconnect();
        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnect);
        gw.reconnect();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connect);

        // the current state is re-read, but the surviving store watch is kept
        assert_eq!(next_data(&mut w).await, json!(1));
        assert_eq!(store.watch_count("/t"), 1);

        client.update("/t", &2, None).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        assert_eq!(next_data(&mut w).await, json!(2));
        assert!(quiet(&mut w).await);
    }

    #[tokio::test]
    async fn watching_a_missing_node_fails() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        assert_eq!(
            client.watch("/nope/", WatchOptions::data()).await.err(),
            Some(Error::NoNode {
                path: "/nope".into()
            })
        );
    }

    #[tokio::test]
    async fn child_watch_lists_sorted_children() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client.mkdirp("/dir/b").await.unwrap();
        client.mkdirp("/dir/a").await.unwrap();

        let mut w = client
            .watch("/dir", WatchOptions::children().with_initial_data())
            .await
            .unwrap();
        assert_eq!(
            next(&mut w).await,
            WatchEvent::Children(vec!["a".into(), "b".into()])
        );

        client.mkdirp("/dir/0").await.unwrap();
        assert_eq!(
            next(&mut w).await,
            WatchEvent::Children(vec!["0".into(), "a".into(), "b".into()])
        );
        // payload writes do not concern a child watch
        client.update("/dir", &1, None).await.unwrap();
        assert!(quiet(&mut w).await);
    }

    #[tokio::test]
    async fn follows_deletion_and_recreation() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client.put("/n", &1, PutOptions::default()).await.unwrap();
        let mut w = client.watch("/n", WatchOptions::data()).await.unwrap();

        client.unlink("/n", None).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Deleted);
        assert_eq!(store.watch_count("/n"), 1);

        client.put("/n", &2, PutOptions::default()).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Created);
        assert_eq!(next_data(&mut w).await, json!(2));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client.put("/s", &1, PutOptions::default()).await.unwrap();
        let mut w = client.watch("/s", WatchOptions::data()).await.unwrap();

        w.stop();
        w.stop();
        assert!(w.is_stopped());
        client.update("/s", &2, None).await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(5), w.next())
            .await
            .unwrap();
        assert_eq!(ended, None);
    }

    #[tokio::test]
    async fn undecodable_payload_is_reported() {
        let store = MemoryStore::new();
        let (client, gw, _events) = connected(&store, builder()).await;
        client.put("/raw", &1, PutOptions::default()).await.unwrap();
        let mut w = client.watch("/raw", WatchOptions::data()).await.unwrap();

        crate::StoreGateway::set_data(&*gw, "/raw", b"not json".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        match next(&mut w).await {
            WatchEvent::Error(Error::Deserialization { path, .. }) => assert_eq!(path, "/raw"),
            e => panic!("unexpected watch event {:?}", e),
        }

        // the subscription is still alive
        client.update("/raw", &"ok", None).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        assert_eq!(next_data(&mut w).await, json!("ok"));
    }

    #[tokio::test]
    async fn survives_session_expiry() {
        let store = MemoryStore::new();
        let (client, gw, mut events) = connected(&store, builder()).await;
        let (other, _other_gw, _other_events) = connected(&store, builder()).await;
        client.put("/cfg", &1, PutOptions::default()).await.unwrap();
        let mut w = client.watch("/cfg", WatchOptions::data()).await.unwrap();

        store.set_availability(Availability::Refusing);
        gw.expire();
        assert_eq!(next_event(&mut events).await, ClientEvent::SessionExpired);

        // written while no watch is armed
        other.update("/cfg", &2, None).await.unwrap();
        store.set_availability(Availability::Up);
        loop {
            if next_event(&mut events).await == ClientEvent::Connect {
                break;
            }
        }

        // the resync happened before the connect signal, so the new state is already queued
        assert_eq!(next_data(&mut w).await, json!(2));
        other.update("/cfg", &3, None).await.unwrap();
        assert_eq!(next(&mut w).await, WatchEvent::Changed);
        assert_eq!(next_data(&mut w).await, json!(3));
    }

    #[tokio::test]
    async fn expiry_without_reconnect_ends_watches() {
        let store = MemoryStore::new();
        let mut b = builder();
        b.set_auto_reconnect(false);
        let (client, gw, _events) = connected(&store, b).await;
        client.put("/x", &1, PutOptions::default()).await.unwrap();
        let mut w = client.watch("/x", WatchOptions::data()).await.unwrap();

        gw.expire();
        assert_eq!(
            next(&mut w).await,
            WatchEvent::Session(KeeperState::Expired)
        );
        let ended = tokio::time::timeout(Duration::from_secs(5), w.next())
            .await
            .unwrap();
        assert_eq!(ended, None);
    }

    #[tokio::test]
    async fn close_stops_watches() {
        let store = MemoryStore::new();
        let (client, _gw, _events) = connected(&store, builder()).await;
        client
            .create("/eph", &"x", CreateMode::Ephemeral)
            .await
            .unwrap();
        let mut w = client.watch("/eph", WatchOptions::data()).await.unwrap();
        client.close().await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(5), w.next())
            .await
            .unwrap();
        assert_eq!(ended, None);
        assert_eq!(
            client.watch("/eph", WatchOptions::data()).await.err(),
            Some(Error::Closed)
        );
    }
}
