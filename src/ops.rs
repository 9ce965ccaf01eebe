use crate::session::Client;
use crate::{path, CreateMode, Error, Stat};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use slog::{debug, error, trace};
use std::collections::VecDeque;

/// Options for [`Client::put`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// The version an existing node must have. Defaults to the version read just before the
    /// write, so a concurrent writer in between surfaces as [`Error::VersionConflict`].
    pub version: Option<i32>,
    /// How to create the node if it does not exist yet.
    pub mode: CreateMode,
}

impl Client {
    /// Returns the metadata of the node at `path`.
    pub async fn stat(&self, path: &str) -> Result<Stat, Error> {
        let path = path::normalize(path);
        trace!(self.logger(), "stat: entered"; "path" => &path);
        match self.inner.gateway.exists(&path).await? {
            Some(stat) => Ok(stat),
            None => Err(Error::NoNode { path }),
        }
    }

    /// Creates a node holding `value` encoded as JSON, and returns its final path.
    ///
    /// For sequential modes the final path carries the store-assigned suffix. Ephemeral nodes
    /// are remembered so that they can be recreated if the session has to be replaced.
    pub async fn create<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        mode: CreateMode,
    ) -> Result<String, Error> {
        let data = serde_json::to_vec(value).map_err(Error::serialization)?;
        self.create_raw(&normalize_keeping_suffix(path), data, mode)
            .await
    }

    pub(crate) async fn create_raw(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, Error> {
        trace!(self.logger(), "create: entered"; "path" => path, "mode" => ?mode);
        let registration = if mode.is_ephemeral() {
            Some(data.clone())
        } else {
            None
        };
        let created = self.inner.gateway.create(path, data, mode).await?;
        if let Some(data) = registration {
            self.inner.ephemerals.lock().insert(created.clone(), data);
        }
        trace!(self.logger(), "create: done"; "path" => &created);
        Ok(created)
    }

    /// Reads the node at `path` and decodes its payload as JSON.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.get_with_stat(path).await.map(|(value, _)| value)
    }

    /// Like [`get`](Client::get), also returning the node's metadata.
    pub async fn get_with_stat<T: DeserializeOwned>(&self, path: &str) -> Result<(T, Stat), Error> {
        let path = path::normalize(path);
        trace!(self.logger(), "get: entered"; "path" => &path);
        let (data, stat) = self.inner.gateway.get_data(&path).await?;
        let value =
            serde_json::from_slice(&data).map_err(|e| Error::deserialization(&path, e))?;
        Ok((value, stat))
    }

    /// Writes `value` to `path`, creating the node if it does not exist.
    ///
    /// An existing node is only overwritten if its version matches `options.version`, or the
    /// version observed just before the write if none is given.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        options: PutOptions,
    ) -> Result<(), Error> {
        let path = path::normalize(path);
        let data = serde_json::to_vec(value).map_err(Error::serialization)?;
        trace!(self.logger(), "put: entered"; "path" => &path);

        match self.inner.gateway.exists(&path).await? {
            None => {
                trace!(self.logger(), "put: node does not exist; creating"; "path" => &path);
                self.create_raw(&path, data, options.mode).await?;
            }
            Some(stat) => {
                let version = options.version.unwrap_or(stat.version);
                trace!(self.logger(), "put: updating"; "path" => &path, "version" => version);
                self.inner
                    .gateway
                    .set_data(&path, data, Some(version))
                    .await?;
            }
        }
        Ok(())
    }

    /// Overwrites the payload of an existing node.
    ///
    /// Fails with [`Error::NoNode`] if the node does not exist. Without an explicit `version`
    /// the node's current version is used.
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        version: Option<i32>,
    ) -> Result<Stat, Error> {
        let path = path::normalize(path);
        let data = serde_json::to_vec(value).map_err(Error::serialization)?;
        let version = match version {
            Some(v) => v,
            None => self.stat(&path).await?.version,
        };
        trace!(self.logger(), "update: entered"; "path" => &path, "version" => version);
        self.inner
            .gateway
            .set_data(&path, data, Some(version))
            .await
    }

    /// Creates `path` and every missing ancestor. Each created node holds an empty JSON object.
    ///
    /// Nodes that already exist (or appear concurrently) are left alone.
    pub async fn mkdirp(&self, path: &str) -> Result<(), Error> {
        trace!(self.logger(), "mkdirp: entered"; "path" => path);
        for dir in path::ancestors(path) {
            if self.inner.gateway.exists(&dir).await?.is_some() {
                continue;
            }
            trace!(self.logger(), "mkdirp: creating"; "path" => &dir);
            match self.create_raw(&dir, b"{}".to_vec(), CreateMode::Persistent).await {
                Ok(_) | Err(Error::NodeExists { .. }) => {}
                Err(e) => {
                    error!(self.logger(), "mkdirp: unable to create node: {}", e; "path" => &dir);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Lists the names of the node's children, in the order the store returns them.
    pub async fn readdir(&self, path: &str) -> Result<Vec<String>, Error> {
        let path = path::normalize(path);
        trace!(self.logger(), "readdir: entered"; "path" => &path);
        self.inner.gateway.get_children(&path).await
    }

    /// Deletes a leaf node.
    ///
    /// Without an explicit `version` the node's current version is used.
    pub async fn unlink(&self, path: &str, version: Option<i32>) -> Result<(), Error> {
        let path = path::normalize(path);
        let version = match version {
            Some(v) => v,
            None => self.stat(&path).await?.version,
        };
        trace!(self.logger(), "unlink: entered"; "path" => &path, "version" => version);
        self.inner.gateway.delete(&path, Some(version)).await?;
        self.inner.ephemerals.lock().remove(&path);
        Ok(())
    }

    /// Deletes `path` and everything beneath it.
    ///
    /// The tree is listed first, with a bounded number of listing calls in flight, and then
    /// deleted deepest-first, one node at a time. The first failure aborts the removal; nodes
    /// deleted before it stay deleted.
    pub async fn rmr(&self, path: &str) -> Result<(), Error> {
        let root = path::normalize(path);
        let logger = self.logger();
        trace!(logger, "rmr: entered"; "path" => &root);

        let limit = self.inner.config.rmr_concurrency.max(1);
        let mut nodes = Vec::new();
        let mut pending = VecDeque::new();
        pending.push_back(root.clone());
        let mut listing = FuturesUnordered::new();
        loop {
            while listing.len() < limit {
                let next = match pending.pop_front() {
                    Some(next) => next,
                    None => break,
                };
                let gateway = self.inner.gateway.clone();
                listing.push(async move {
                    let children = gateway.get_children(&next).await;
                    (next, children)
                });
            }

            match listing.next().await {
                Some((node, Ok(children))) => {
                    for child in children {
                        pending.push_back(path::join(&node, &child));
                    }
                    nodes.push(node);
                }
                Some((node, Err(e))) => {
                    debug!(logger, "rmr: unable to list children: {}", e; "path" => &node);
                    return Err(e);
                }
                None => break,
            }
        }

        // the root node itself can never be deleted
        nodes.retain(|n| n != "/");
        // children sort after their parents
        nodes.sort_by(|a, b| b.cmp(a));
        trace!(logger, "rmr: deleting"; "path" => &root, "count" => nodes.len());
        for node in nodes {
            self.unlink(&node, None).await?;
        }
        Ok(())
    }
}

/// Normalizes `path`, but keeps a trailing `/` so that sequential names can be created directly
/// beneath a parent.
fn normalize_keeping_suffix(path: &str) -> String {
    let normalized = path::normalize(path);
    if path.ends_with('/') && normalized != "/" {
        format!("{}/", normalized)
    } else {
        normalized
    }
}
