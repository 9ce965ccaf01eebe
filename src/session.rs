use crate::gateway::{SessionEvent, StoreGateway};
use crate::watch::Registry;
use crate::{ConnectionState, CreateMode, Error, KeeperState};
use futures::{channel::mpsc, StreamExt};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use slog::{debug, info, o, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A session-level signal observable through [`Client::events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The client (re)connected, and outstanding registrations have been replayed.
    Connect,
    /// The connection was transiently lost. The gateway is expected to retry on its own.
    Disconnect,
    /// The client was closed by its owner.
    Close,
    /// The ensemble expired the session. Ephemeral nodes and store-level watches are gone.
    SessionExpired,
    /// The gateway reported an error that did not end the session.
    Error(Error),
    /// An ephemeral node could not be recreated after a reconnection.
    EphemeralRecreateFailed {
        /// The path of the ephemeral node.
        path: String,
        /// Why recreation failed.
        error: Error,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) auto_reconnect: bool,
    pub(crate) reconnect_delay: Duration,
    pub(crate) poll_interval: Option<Duration>,
    pub(crate) rmr_concurrency: usize,
}

/// Builder that allows customizing options for a [`Client`].
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    config: Config,
    logger: slog::Logger,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        let drain = slog::Discard;
        let root = slog::Logger::root(drain, o!());

        ClientBuilder {
            config: Config {
                connect_timeout: Some(Duration::from_secs(2)),
                auto_reconnect: true,
                reconnect_delay: Duration::from_secs(1),
                poll_interval: None,
                rmr_concurrency: 16,
            },
            logger: root,
        }
    }
}

impl ClientBuilder {
    /// Set how long to wait for the first connected signal. `None` waits forever.
    ///
    /// Defaults to two seconds.
    pub fn set_connect_timeout(&mut self, t: Option<Duration>) {
        self.config.connect_timeout = t;
    }

    /// Set whether a new session is established automatically after the ensemble expires the
    /// current one. Ephemeral nodes and watches are replayed onto the new session.
    ///
    /// Defaults to `true`.
    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.config.auto_reconnect = auto_reconnect;
    }

    /// Set the pause between failed attempts to establish a replacement session.
    pub fn set_reconnect_delay(&mut self, delay: Duration) {
        self.config.reconnect_delay = delay;
    }

    /// Periodically check the connection state, and emit [`ClientEvent::Error`] with
    /// [`Error::ConnectionLoss`] while the client is neither connected nor connecting.
    pub fn set_poll_interval(&mut self, interval: Option<Duration>) {
        self.config.poll_interval = interval;
    }

    /// Set how many listing calls [`Client::rmr`] keeps in flight at once.
    pub fn set_rmr_concurrency(&mut self, n: usize) {
        self.config.rmr_concurrency = n.max(1);
    }

    /// Set the logger that should be used internally in the client.
    ///
    /// By default, all logging is disabled. See also [the `slog`
    /// documentation](https://docs.rs/slog).
    pub fn set_logger(&mut self, l: slog::Logger) {
        self.logger = l;
    }

    /// Creates a client on top of `gateway` without connecting it.
    pub fn build<G: StoreGateway>(self, gateway: G) -> Client {
        let logger = self.logger.new(o!("component" => "zkplus"));
        let inner = Arc::new(Inner {
            gateway: Arc::new(gateway),
            config: self.config,
            watches: Registry::default(),
            ephemerals: Mutex::new(HashMap::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            listeners: Mutex::new(Vec::new()),
            established: Mutex::new(false),
            closed: OnceCell::new(),
            logger,
        });
        Client {
            owner: Arc::new(Owner {
                inner: inner.clone(),
            }),
            inner,
        }
    }

    /// Creates a client on top of `gateway` and connects it.
    ///
    /// The returned stream carries every [`ClientEvent`] from the connection onward.
    pub async fn connect<G: StoreGateway>(
        self,
        gateway: G,
    ) -> Result<(Client, mpsc::UnboundedReceiver<ClientEvent>), Error> {
        let client = self.build(gateway);
        let events = client.events();
        client.connect().await?;
        Ok((client, events))
    }
}

/// A connection to a coordination store that keeps ephemeral nodes and watches alive across
/// reconnections.
///
/// `Client` is cheap to clone; all clones share one session. Once the last clone is dropped,
/// the session is closed as if [`Client::close`] had been called.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
    owner: Arc<Owner>,
}

/// Shared by every `Client` clone, but never by the background tasks.
struct Owner {
    inner: Arc<Inner>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        if self.inner.closed.get().is_some() {
            return;
        }
        debug!(self.inner.logger, "all client handles dropped; closing session");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = self.inner.clone();
                runtime.spawn(async move {
                    if let Err(e) = inner.close().await {
                        warn!(inner.logger, "unable to close dropped session: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!(self.inner.logger, "no runtime left to close the session on");
                self.inner.watches.stop_all(None);
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("watches", &self.inner.watches.len())
            .field("ephemerals", &self.inner.ephemerals.lock().len())
            .finish()
    }
}

pub(crate) struct Inner {
    pub(crate) gateway: Arc<dyn StoreGateway>,
    pub(crate) config: Config,
    pub(crate) logger: slog::Logger,
    /// Active subscriptions.
    pub(crate) watches: Registry,
    /// Ephemeral nodes created by this client (final path -> payload).
    pub(crate) ephemerals: Mutex<HashMap<String, Vec<u8>>>,
    state: Mutex<ConnectionState>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>,
    /// Whether a session has been established and is being supervised.
    established: Mutex<bool>,
    closed: OnceCell<()>,
}

impl Client {
    /// Connects to the store.
    ///
    /// Fails with [`Error::ConnectTimeout`] if no connected signal arrives within the configured
    /// timeout, and with the gateway's error if it reports one before connecting. Calling this
    /// on a connected client is a no-op.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut pending = {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(Error::Closed),
                ConnectionState::Expired if !self.inner.config.auto_reconnect => {
                    return Err(Error::SessionExpired)
                }
                _ => {}
            }
            if *state == ConnectionState::Connecting || *self.inner.established.lock() {
                // someone else is already bringing the session up; wait for them
                Some(self.events())
            } else {
                *state = ConnectionState::Connecting;
                None
            }
        };

        if let Some(ref mut events) = pending {
            trace!(self.inner.logger, "connect: waiting for in-flight attempt");
            while let Some(e) = events.next().await {
                match e {
                    ClientEvent::Connect => return Ok(()),
                    ClientEvent::Error(e) => return Err(e),
                    ClientEvent::Close => return Err(Error::Closed),
                    ClientEvent::SessionExpired if !self.inner.config.auto_reconnect => {
                        return Err(Error::SessionExpired)
                    }
                    _ => {}
                }
            }
            return Err(Error::Closed);
        }

        match self.inner.establish().await {
            Ok(events) => {
                *self.inner.established.lock() = true;
                self.inner.on_connected().await;
                tokio::spawn(supervise(self.inner.clone(), events));
                if let Some(period) = self.inner.config.poll_interval {
                    tokio::spawn(poll_state(self.inner.clone(), period));
                }
                Ok(())
            }
            Err(e) => {
                warn!(self.inner.logger, "unable to connect: {}", e);
                *self.inner.state.lock() = ConnectionState::Disconnected;
                self.inner.emit(ClientEvent::Error(e.clone()));
                Err(e)
            }
        }
    }

    /// Closes the session.
    ///
    /// Every watch subscription is stopped, ephemeral nodes are released, and
    /// [`ClientEvent::Close`] is emitted. Closing an already closed client does nothing.
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Registers a new listener for session-level signals.
    ///
    /// Only signals emitted after this call are delivered.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.listeners.lock().push(tx);
        rx
    }

    pub(crate) fn logger(&self) -> &slog::Logger {
        &self.inner.logger
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.get().is_some()
    }
}

impl Inner {
    async fn close(&self) -> Result<(), Error> {
        if self.closed.set(()).is_err() {
            return Ok(());
        }
        trace!(self.logger, "closing");
        self.watches.stop_all(None);
        let result = self.gateway.close().await;
        *self.state.lock() = ConnectionState::Closed;
        self.ephemerals.lock().clear();
        debug!(self.logger, "session closed");
        self.emit(ClientEvent::Close);
        result
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        self.listeners
            .lock()
            .retain(|l| l.unbounded_send(event.clone()).is_ok());
    }

    async fn establish(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, Error> {
        *self.state.lock() = ConnectionState::Connecting;
        trace!(self.logger, "connecting");
        let connect = self.gateway.connect();
        match self.config.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(r) => r,
                Err(_) => Err(Error::ConnectTimeout(timeout)),
            },
            None => connect.await,
        }
    }

    /// Replays registrations onto a freshly connected session: watches first, then ephemeral
    /// nodes.
    async fn on_connected(&self) {
        *self.state.lock() = ConnectionState::Connected;
        debug!(self.logger, "connected; replaying registrations";
               "watches" => self.watches.len(),
               "ephemerals" => self.ephemerals.lock().len());

        self.watches.resync().await;
        self.recreate_ephemerals().await;
        self.emit(ClientEvent::Connect);
    }

    async fn recreate_ephemerals(&self) {
        let registrations: Vec<(String, Vec<u8>)> = self
            .ephemerals
            .lock()
            .iter()
            .map(|(path, data)| (path.clone(), data.clone()))
            .collect();

        for (path, data) in registrations {
            // the recorded path is already the final, suffixed one
            match self.gateway.create(&path, data, CreateMode::Ephemeral).await {
                Ok(_) => debug!(self.logger, "recreated ephemeral node"; "path" => &path),
                Err(Error::NodeExists { .. }) => {
                    trace!(self.logger, "ephemeral node survived"; "path" => &path)
                }
                Err(error) => {
                    warn!(self.logger, "unable to recreate ephemeral node: {}", error;
                          "path" => &path);
                    self.emit(ClientEvent::EphemeralRecreateFailed { path, error });
                }
            }
        }
    }
}

async fn supervise(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    loop {
        while let Some(event) = events.next().await {
            match event {
                SessionEvent::State(KeeperState::SyncConnected)
                | SessionEvent::State(KeeperState::ConnectedReadOnly) => {
                    info!(inner.logger, "connection re-established");
                    inner.on_connected().await;
                }
                SessionEvent::State(KeeperState::Disconnected) => {
                    info!(inner.logger, "connection lost; waiting for gateway to reconnect");
                    *inner.state.lock() = ConnectionState::Disconnected;
                    inner.emit(ClientEvent::Disconnect);
                }
                SessionEvent::State(KeeperState::Expired) => break,
                SessionEvent::State(state) => {
                    debug!(inner.logger, "ignoring connection state {:?}", state);
                }
                SessionEvent::Error(Error::OperationTimeout) => {
                    debug!(inner.logger, "gateway reported an operation timeout");
                }
                SessionEvent::Error(e) => {
                    warn!(inner.logger, "gateway error: {}", e);
                    inner.emit(ClientEvent::Error(e));
                }
            }
        }

        if inner.closed.get().is_some() {
            trace!(inner.logger, "session stream ended after close");
            return;
        }

        // the session is gone: either the ensemble expired it, or the gateway gave up on it
        warn!(inner.logger, "session expired");
        *inner.state.lock() = ConnectionState::Expired;
        inner.emit(ClientEvent::SessionExpired);

        if !inner.config.auto_reconnect {
            inner.watches.stop_all(Some(KeeperState::Expired));
            return;
        }

        info!(inner.logger, "establishing a new session");
        events = loop {
            if inner.closed.get().is_some() {
                return;
            }
            match inner.establish().await {
                Ok(events) => break events,
                Err(e) => {
                    warn!(inner.logger, "unable to establish a new session: {}", e);
                    *inner.state.lock() = ConnectionState::Expired;
                    inner.emit(ClientEvent::Error(e));
                    tokio::time::sleep(inner.config.reconnect_delay).await;
                }
            }
        };
        inner.on_connected().await;
    }
}

async fn poll_state(inner: Arc<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if inner.closed.get().is_some() {
            return;
        }
        let state = *inner.state.lock();
        if !matches!(
            state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            trace!(inner.logger, "poll: not connected"; "state" => ?state);
            inner.emit(ClientEvent::Error(Error::ConnectionLoss));
        }
    }
}
