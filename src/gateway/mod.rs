//! The boundary between this crate and the coordination store.
//!
//! A [`StoreGateway`] provides the raw store primitives: one connection at a time, plain
//! create/read/write/delete/list calls, one-shot watch registration, and a stream of
//! connection-state transitions. Everything durable (re-armed watches, recreated ephemeral
//! nodes, recursive helpers, elections) is built on top of it by [`Client`](crate::Client).

use crate::{CreateMode, Error, KeeperState, Stat, WatchedEvent};
use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use std::sync::Arc;

pub mod memory;

/// A one-shot store watch. It resolves once with the event that consumed it.
///
/// If the store discards the watch without firing it (for example because the session that
/// registered it ended), the receiver resolves to `Err(Canceled)`.
pub type Watcher = oneshot::Receiver<WatchedEvent>;

/// A connection-level signal emitted by a gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection moved into the given state.
    State(KeeperState),
    /// The transport hit an error that did not, by itself, end the session.
    Error(Error),
}

/// The raw operations a coordination store must provide.
///
/// Versions are `None` when the caller does not want an optimistic-concurrency check.
#[async_trait]
pub trait StoreGateway: Send + Sync + 'static {
    /// Establishes a new session.
    ///
    /// Resolves once the session is connected, with a stream of the session's subsequent
    /// connection-state transitions. The stream ends when the session is closed or expires.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, Error>;

    /// Closes the current session, removing its ephemeral nodes and watches.
    async fn close(&self) -> Result<(), Error>;

    /// Creates a node and returns its final path.
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String, Error>;

    /// Returns the node's metadata, or `None` if no node exists at `path`.
    async fn exists(&self, path: &str) -> Result<Option<Stat>, Error>;

    /// Like [`exists`](StoreGateway::exists), also arming a watch. The watch is armed even if
    /// the node does not exist, in which case it fires when the node is created.
    async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, Watcher), Error>;

    /// Returns the node's payload and metadata.
    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), Error>;

    /// Like [`get_data`](StoreGateway::get_data), also arming a data watch.
    async fn get_data_w(&self, path: &str) -> Result<(Vec<u8>, Stat, Watcher), Error>;

    /// Replaces the node's payload.
    async fn set_data(&self, path: &str, data: Vec<u8>, version: Option<i32>)
        -> Result<Stat, Error>;

    /// Deletes a leaf node.
    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), Error>;

    /// Lists the names of the node's immediate children, in no particular order.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, Error>;

    /// Like [`get_children`](StoreGateway::get_children), also arming a child watch.
    async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Watcher), Error>;
}

// Lets callers keep a handle on a gateway after handing it to a client.
#[async_trait]
impl<G: StoreGateway> StoreGateway for Arc<G> {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, Error> {
        (**self).connect().await
    }

    async fn close(&self) -> Result<(), Error> {
        (**self).close().await
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String, Error> {
        (**self).create(path, data, mode).await
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>, Error> {
        (**self).exists(path).await
    }

    async fn exists_w(&self, path: &str) -> Result<(Option<Stat>, Watcher), Error> {
        (**self).exists_w(path).await
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), Error> {
        (**self).get_data(path).await
    }

    async fn get_data_w(&self, path: &str) -> Result<(Vec<u8>, Stat, Watcher), Error> {
        (**self).get_data_w(path).await
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        version: Option<i32>,
    ) -> Result<Stat, Error> {
        (**self).set_data(path, data, version).await
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), Error> {
        (**self).delete(path, version).await
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, Error> {
        (**self).get_children(path).await
    }

    async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Watcher), Error> {
        (**self).get_children_w(path).await
    }
}
