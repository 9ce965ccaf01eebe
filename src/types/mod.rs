mod watch;
pub use self::watch::*;

/// Metadata the store keeps for every node.
///
/// Transaction ids (`*zxid`) order all changes across the ensemble. Some transports deliver them
/// as two 32-bit halves; those are combined into one `u64` before a `Stat` is built. `version`
/// is what conditional writes and deletes are checked against.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Stat {
    /// Transaction that created the node.
    pub czxid: u64,
    /// Transaction that last wrote the node's payload.
    pub mzxid: u64,
    /// Creation time, in milliseconds since the epoch.
    pub ctime: i64,
    /// Time of the last payload write, in milliseconds since the epoch.
    pub mtime: i64,
    /// Payload version; bumped on every write.
    pub version: i32,
    /// Child list version; bumped whenever a child is added or removed.
    pub cversion: i32,
    /// ACL version.
    pub aversion: i32,
    /// Owning session for ephemeral nodes, `0` otherwise.
    pub ephemeral_owner: i64,
    /// Payload size in bytes.
    pub data_length: i32,
    /// Number of direct children.
    pub num_children: i32,
    /// Transaction that last changed the child list.
    pub pzxid: u64,
}

impl Stat {
    /// Whether the znode is bound to the lifetime of a session.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// How a node is created, and how long it lives.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CreateMode {
    /// Lives until deleted.
    #[default]
    Persistent = 0,
    /// Removed when the creating session ends.
    Ephemeral = 1,
    /// Persistent, with a 10-digit zero-padded sequence number appended to the name. The number
    /// comes from the parent's child version.
    PersistentSequential = 2,
    /// Ephemeral and sequential.
    EphemeralSequential = 3,
}

impl CreateMode {
    /// Whether nodes created with this mode are tied to the creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Whether the store appends a sequence suffix to the requested name.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// The state of a client's session, as observed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; either never connected or transiently disconnected.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected to a member of the ensemble.
    Connected,
    /// The session has been expired by the ensemble.
    Expired,
    /// The client was closed by its owner.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mode_flags() {
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(!CreateMode::Persistent.is_sequential());
        assert!(CreateMode::Ephemeral.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert_eq!(CreateMode::default(), CreateMode::Persistent);
    }
}
