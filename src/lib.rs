//! This crate provides a client for coordinating distributed processes through a
//! [ZooKeeper](https://zookeeper.apache.org/)-like store, with the pieces that applications keep
//! rebuilding on top of raw store calls:
//!
//!  - a [`Client`] that keeps its ephemeral nodes and watches alive across reconnects and
//!    session expiry,
//!  - path helpers that speak JSON payloads ([`Client::put`], [`Client::mkdirp`],
//!    [`Client::rmr`], ...),
//!  - durable watches ([`Client::watch`]) that re-arm themselves after every one-shot store
//!    notification, and
//!  - a leader [`Election`] in which every participant watches only its predecessor.
//!
//! The store itself is reached through a [`StoreGateway`]. The crate ships an in-process
//! implementation, [`MemoryStore`](gateway::memory::MemoryStore), that follows the same rules
//! as a ZooKeeper ensemble and can simulate connection loss and session expiry.
//!
//! # A somewhat silly example
//!
//! ```
//! use futures::StreamExt;
//! use tokio_zkplus::gateway::memory::MemoryStore;
//! use tokio_zkplus::*;
//!
//! # tokio::runtime::Builder::new_current_thread()
//! #     .enable_all()
//! #     .build()
//! #     .unwrap()
//! #     .block_on(async {
//! let store = MemoryStore::new();
//! let (zk, _events) = ClientBuilder::default()
//!     .connect(store.gateway())
//!     .await
//!     .unwrap();
//!
//! // nodes are created along the way
//! zk.mkdirp("/example/config").await.unwrap();
//! zk.put("/example/config", &serde_json::json!({"replicas": 3}), PutOptions::default())
//!     .await
//!     .unwrap();
//!
//! // follow the node from here on
//! let mut config = zk
//!     .watch("/example/config", WatchOptions::data().with_initial_data())
//!     .await
//!     .unwrap();
//! match config.next().await {
//!     Some(WatchEvent::Data { value, .. }) => assert_eq!(value["replicas"], 3),
//!     e => panic!("unexpected watch event {:?}", e),
//! }
//!
//! zk.update("/example/config", &serde_json::json!({"replicas": 5}), None)
//!     .await
//!     .unwrap();
//! assert_eq!(config.next().await, Some(WatchEvent::Changed));
//! match config.next().await {
//!     Some(WatchEvent::Data { value, stat }) => {
//!         assert_eq!(value["replicas"], 5);
//!         // created by mkdirp, then written twice
//!         assert_eq!(stat.version, 2);
//!     }
//!     e => panic!("unexpected watch event {:?}", e),
//! }
//! config.stop();
//!
//! // the only voter leads
//! let election = Election::new(&zk, "/example/leader", &"me").unwrap();
//! assert!(election.vote().await.unwrap().is_leader());
//! election.stop().await.unwrap();
//!
//! zk.rmr("/example").await.unwrap();
//! zk.close().await.unwrap();
//! # });
//! ```
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

mod election;
mod error;
pub mod gateway;
mod ops;
pub mod path;
pub mod proto;
mod session;
mod types;
mod watch;

pub use crate::election::{Election, ElectionEvent, LeaderInfo, Leadership};
pub use crate::error::Error;
pub use crate::gateway::{SessionEvent, StoreGateway, Watcher};
pub use crate::ops::PutOptions;
pub use crate::session::{Client, ClientBuilder, ClientEvent};
pub use crate::types::{
    ConnectionState, CreateMode, KeeperState, Stat, WatchType, WatchedEvent, WatchedEventType,
};
pub use crate::watch::{WatchEvent, WatchHandle, WatchMode, WatchOptions, WatchStopper};
