/// A one-shot watch notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedEvent {
    /// What happened to the node.
    pub event_type: WatchedEventType,
    /// Session state when the notification was produced.
    pub keeper_state: KeeperState,
    /// The node concerned. Empty for session-only notifications.
    pub path: String,
}

/// Session state reported alongside watch notifications and session signals.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeeperState {
    /// Not connected to any ensemble member.
    Disconnected = 0,
    /// Connected, with a live session.
    SyncConnected = 3,
    /// Authentication was rejected; a new session is needed.
    AuthFailed = 4,
    /// Connected to a read-only member.
    ConnectedReadOnly = 5,
    /// The ensemble expired the session, along with its ephemeral nodes and watches.
    Expired = -112,
}

impl KeeperState {
    /// Decodes a wire-level state code.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => KeeperState::Disconnected,
            3 => KeeperState::SyncConnected,
            4 => KeeperState::AuthFailed,
            5 => KeeperState::ConnectedReadOnly,
            -112 => KeeperState::Expired,
            _ => return None,
        })
    }
}

/// The change that triggered a watch.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchedEventType {
    /// No node changed; only the session state did.
    None = -1,
    /// The node was created.
    NodeCreated = 1,
    /// The node was deleted.
    NodeDeleted = 2,
    /// The node's payload was written, whether or not its bytes changed.
    NodeDataChanged = 3,
    /// A child was added or removed. Writes to a child's payload do not count.
    NodeChildrenChanged = 4,
}

impl WatchedEventType {
    /// Decodes a wire-level event code.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => WatchedEventType::None,
            1 => WatchedEventType::NodeCreated,
            2 => WatchedEventType::NodeDeleted,
            3 => WatchedEventType::NodeDataChanged,
            4 => WatchedEventType::NodeChildrenChanged,
            _ => return None,
        })
    }
}

/// Describes what a one-shot watch is looking for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WatchType {
    /// Watching for changes to children.
    Child,
    /// Watching for changes to data.
    Data,
    /// Watching for the creation of a node at the given path.
    Exist,
}

impl WatchType {
    /// Whether an event of the given type consumes a watch of this type.
    pub fn triggered_by(self, event: WatchedEventType) -> bool {
        match (self, event) {
            (WatchType::Child, WatchedEventType::NodeDeleted)
            | (WatchType::Child, WatchedEventType::NodeChildrenChanged) => true,
            (WatchType::Child, _) => false,
            (WatchType::Data, WatchedEventType::NodeDeleted)
            | (WatchType::Data, WatchedEventType::NodeDataChanged) => true,
            (WatchType::Data, _) => false,
            (WatchType::Exist, WatchedEventType::NodeChildrenChanged) => false,
            (WatchType::Exist, _) => true,
        }
    }
}
