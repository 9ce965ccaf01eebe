//! Leader election over sequential ephemeral nodes.
//!
//! Each participant creates one ephemeral sequential node beneath a shared parent. The
//! participant holding the lowest sequence number leads. Every other participant watches only
//! its immediate predecessor, so a departure wakes exactly one successor.

use crate::session::{Client, ClientEvent};
use crate::watch::{WatchEvent, WatchOptions, WatchStopper};
use crate::{path, CreateMode, Error};
use futures::channel::mpsc;
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use slog::{debug, info, o, trace, warn};
use std::sync::{Arc, Weak};

/// A participant's standing in an election.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Leadership {
    /// This participant leads.
    Leader {
        /// The other participants' node names, in succession order.
        followers: Vec<String>,
    },
    /// Another participant leads.
    Follower {
        /// The node name of the participant immediately ahead of this one.
        predecessor: String,
    },
}

impl Leadership {
    /// Whether this participant leads.
    pub fn is_leader(&self) -> bool {
        matches!(self, Leadership::Leader { .. })
    }
}

/// Signals emitted by an [`Election`] participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionEvent {
    /// This participant became the leader.
    Leader,
    /// This participant follows the given node name.
    NewLeader(String),
    /// The participant withdrew.
    Close,
    /// Leadership could not be determined.
    Error(Error),
}

/// The current leader and everyone else taking part.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaderInfo<T> {
    /// The leader's node name.
    pub node: String,
    /// The leader's payload.
    pub value: T,
    /// Every participant's node name, in succession order.
    pub members: Vec<String>,
}

/// One participant in a leader election.
///
/// `Election` is cheap to clone; all clones refer to the same participant.
#[derive(Clone)]
pub struct Election {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for Election {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Election")
            .field("parent", &self.inner.parent)
            .field("path", &state.path)
            .field("leadership", &state.leadership)
            .finish()
    }
}

struct Shared {
    client: Client,
    parent: String,
    prefix: String,
    data: Vec<u8>,
    logger: slog::Logger,
    state: Mutex<Participant>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ElectionEvent>>>,
}

#[derive(Default)]
struct Participant {
    stopped: bool,
    /// Our own node, once voted.
    path: Option<String>,
    /// The most recently determined standing.
    leadership: Option<Leadership>,
    /// The watch on our predecessor, if any.
    watcher: Option<WatchStopper>,
}

impl Election {
    /// Prepares a participant that will register beneath `parent` with `value` as its payload.
    pub fn new<T: Serialize + ?Sized>(
        client: &Client,
        parent: &str,
        value: &T,
    ) -> Result<Self, Error> {
        Election::with_prefix(client, parent, "", value)
    }

    /// Like [`new`](Election::new), naming the participant's node `{prefix}-{sequence}`.
    pub fn with_prefix<T: Serialize + ?Sized>(
        client: &Client,
        parent: &str,
        prefix: &str,
        value: &T,
    ) -> Result<Self, Error> {
        let parent = path::normalize(parent);
        let data = serde_json::to_vec(value).map_err(Error::serialization)?;
        let logger = client.logger().new(o!("parent" => parent.clone()));
        Ok(Election {
            inner: Arc::new(Shared {
                client: client.clone(),
                parent,
                prefix: prefix.to_string(),
                data,
                logger,
                state: Mutex::new(Participant::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Registers a listener for this participant's signals.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ElectionEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.listeners.lock().push(tx);
        rx
    }

    /// The full path of this participant's node, once voted.
    pub fn path(&self) -> Option<String> {
        self.inner.state.lock().path.clone()
    }

    /// The name of this participant's node, once voted.
    pub fn znode(&self) -> Option<String> {
        self.path().map(|p| path::basename(&p).to_string())
    }

    /// Joins the election.
    ///
    /// Creates the parent if needed, registers this participant, and determines its standing.
    /// A leader emits [`ElectionEvent::Leader`]; a follower emits
    /// [`ElectionEvent::NewLeader`] naming its predecessor and starts watching it.
    pub async fn vote(&self) -> Result<Leadership, Error> {
        {
            let state = self.inner.state.lock();
            if state.stopped {
                return Err(Error::Closed);
            }
            if let Some(path) = &state.path {
                return Err(Error::NodeExists { path: path.clone() });
            }
        }
        trace!(self.inner.logger, "election.vote: entered");
        let session = self.inner.client.events();

        self.inner.client.mkdirp(&self.inner.parent).await?;
        let name = format!("{}-", self.inner.prefix);
        let created = self
            .inner
            .client
            .create_raw(
                &path::join(&self.inner.parent, &name),
                self.inner.data.clone(),
                CreateMode::EphemeralSequential,
            )
            .await?;
        debug!(self.inner.logger, "election.vote: registered"; "znode" => path::basename(&created));
        self.inner.state.lock().path = Some(created);
        tokio::spawn(follow_session(Arc::downgrade(&self.inner), session));

        let leadership = self.is_leader(true, false).await?;
        match &leadership {
            Leadership::Leader { .. } => self.emit(ElectionEvent::Leader),
            Leadership::Follower { predecessor } => {
                self.emit(ElectionEvent::NewLeader(predecessor.clone()))
            }
        }
        Ok(leadership)
    }

    /// Determines this participant's standing.
    ///
    /// With `use_cache`, the most recently determined standing is returned without consulting
    /// the store. With `should_watch`, a follower also starts watching its predecessor; if the
    /// predecessor is already gone, the standing is determined again.
    pub async fn is_leader(&self, should_watch: bool, use_cache: bool) -> Result<Leadership, Error> {
        let own = {
            let state = self.inner.state.lock();
            if state.stopped {
                return Err(Error::Closed);
            }
            if use_cache {
                if let Some(cached) = &state.leadership {
                    return Ok(cached.clone());
                }
            }
            match &state.path {
                Some(own) => own.clone(),
                None => {
                    return Err(Error::NoNode {
                        path: self.inner.parent.clone(),
                    })
                }
            }
        };

        loop {
            let members = self.members().await?;
            let znode = path::basename(&own);
            let index = members
                .iter()
                .position(|m| m == znode)
                .ok_or_else(|| Error::NoNode { path: own.clone() })?;
            let leadership = if index == 0 {
                Leadership::Leader {
                    followers: members[1..].to_vec(),
                }
            } else {
                Leadership::Follower {
                    predecessor: members[index - 1].clone(),
                }
            };
            trace!(self.inner.logger, "election: standing determined";
                   "znode" => znode, "leader" => leadership.is_leader());
            self.inner.state.lock().leadership = Some(leadership.clone());

            if let Leadership::Follower { predecessor } = &leadership {
                if should_watch {
                    match self.watch_predecessor(predecessor).await {
                        Err(Error::NoNode { .. }) => {
                            debug!(self.inner.logger, "election: predecessor vanished; re-checking";
                                   "predecessor" => predecessor);
                            continue;
                        }
                        Err(e) => return Err(e),
                        Ok(()) => {}
                    }
                }
            }
            return Ok(leadership);
        }
    }

    /// Watches the current predecessor, if this participant follows one.
    pub async fn watch(&self) -> Result<(), Error> {
        let cached = self.inner.state.lock().leadership.clone();
        match cached {
            Some(Leadership::Leader { .. }) => Ok(()),
            Some(Leadership::Follower { predecessor }) => {
                match self.watch_predecessor(&predecessor).await {
                    Err(Error::NoNode { .. }) => self.is_leader(true, false).await.map(|_| ()),
                    r => r,
                }
            }
            None => self.is_leader(true, false).await.map(|_| ()),
        }
    }

    /// Reads the current leader's payload.
    pub async fn leader<T: DeserializeOwned>(&self) -> Result<LeaderInfo<T>, Error> {
        let members = self.members().await?;
        let node = members.first().cloned().ok_or_else(|| Error::NoNode {
            path: self.inner.parent.clone(),
        })?;
        let value = self
            .inner
            .client
            .get(&path::join(&self.inner.parent, &node))
            .await?;
        Ok(LeaderInfo {
            node,
            value,
            members,
        })
    }

    /// Withdraws from the election, deleting this participant's node.
    ///
    /// Emits [`ElectionEvent::Close`]. Stopping twice does nothing.
    pub async fn stop(&self) -> Result<(), Error> {
        let (own, watcher) = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
            state.leadership = None;
            (state.path.take(), state.watcher.take())
        };
        if let Some(watcher) = watcher {
            watcher.stop();
        }

        if let Some(own) = own {
            trace!(self.inner.logger, "election.stop: removing"; "path" => &own);
            if let Err(e) = self.inner.client.rmr(&own).await {
                warn!(self.inner.logger, "election.stop: unable to remove node: {}", e);
                self.emit(ElectionEvent::Error(e.clone()));
                return Err(e);
            }
        }
        info!(self.inner.logger, "election: withdrew");
        self.emit(ElectionEvent::Close);
        Ok(())
    }

    /// Every participant's node name in succession order.
    async fn members(&self) -> Result<Vec<String>, Error> {
        let mut members = self.inner.client.readdir(&self.inner.parent).await?;
        members.sort_by(|a, b| path::compare_sequence(a, b));
        Ok(members)
    }

    async fn watch_predecessor(&self, predecessor: &str) -> Result<(), Error> {
        let target = path::join(&self.inner.parent, predecessor);
        let mut handle = self
            .inner
            .client
            .watch(&target, WatchOptions::data())
            .await?;

        let previous = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                handle.stop();
                return Err(Error::Closed);
            }
            state.watcher.replace(handle.stopper())
        };
        if let Some(previous) = previous {
            previous.stop();
        }
        trace!(self.inner.logger, "election: watching predecessor"; "predecessor" => predecessor);

        let shared = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = handle.next().await {
                let election = match shared.upgrade() {
                    Some(inner) => Election { inner },
                    None => {
                        handle.stop();
                        break;
                    }
                };
                match event {
                    WatchEvent::Deleted => {
                        handle.stop();
                        election.recheck().await;
                        break;
                    }
                    WatchEvent::Error(e) => {
                        handle.stop();
                        election.emit(ElectionEvent::Error(e));
                        break;
                    }
                    _ => {}
                }
            }
        });
        Ok(())
    }

    // Boxed, since the predecessor watch task it may spawn calls back into it.
    fn recheck(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.inner.state.lock().stopped {
                return;
            }
            debug!(self.inner.logger, "election: re-checking standing");
            match self.is_leader(true, false).await {
                Ok(Leadership::Leader { .. }) => {
                    info!(self.inner.logger, "election: became leader");
                    self.emit(ElectionEvent::Leader)
                }
                Ok(Leadership::Follower { predecessor }) => {
                    self.emit(ElectionEvent::NewLeader(predecessor))
                }
                Err(Error::Closed) => {}
                Err(e) => self.emit(ElectionEvent::Error(e)),
            }
        }
        .boxed()
    }

    fn emit(&self, event: ElectionEvent) {
        self.inner
            .listeners
            .lock()
            .retain(|l| l.unbounded_send(event.clone()).is_ok());
    }
}

/// Tells the participant about session expiry, and re-checks its standing once a replacement
/// session has recreated its node.
async fn follow_session(shared: Weak<Shared>, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    let mut expired = false;
    while let Some(event) = events.next().await {
        let election = match shared.upgrade() {
            Some(inner) => Election { inner },
            None => return,
        };
        if election.inner.state.lock().stopped {
            return;
        }
        match event {
            ClientEvent::SessionExpired => {
                warn!(election.inner.logger, "election: session expired");
                expired = true;
                election.emit(ElectionEvent::Error(Error::SessionExpired));
            }
            ClientEvent::Connect if expired => {
                expired = false;
                election.recheck().await;
            }
            ClientEvent::Close => return,
            _ => {}
        }
    }
}
