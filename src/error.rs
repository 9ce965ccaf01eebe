use failure::Fail;
use std::time::Duration;

/// Errors that may be returned by client, watch, and election operations.
///
/// Store-level failures are reported to the immediate caller. `NoNode` and `NodeExists` are
/// frequently expected outcomes and are absorbed internally where an operation treats them as
/// control flow (for example in `mkdirp`).
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum Error {
    /// The connection to the ensemble was lost, or could not be established.
    #[fail(display = "connection to the ensemble was lost")]
    ConnectionLoss,

    /// No connected signal arrived before the connect deadline.
    #[fail(display = "connect timeout ({:?})", _0)]
    ConnectTimeout(Duration),

    /// The session has been expired by the ensemble.
    ///
    /// Ephemeral nodes and store-level watches that belonged to the session are gone.
    #[fail(display = "session expired")]
    SessionExpired,

    /// No node exists with the given `path`.
    #[fail(display = "node {} does not exist", path)]
    NoNode {
        /// The path that was targeted.
        path: String,
    },

    /// A node with the given `path` already exists.
    #[fail(display = "node {} already exists", path)]
    NodeExists {
        /// The path that was targeted.
        path: String,
    },

    /// The target node has children, and therefore cannot be deleted.
    #[fail(display = "node {} has children, and cannot be deleted", path)]
    NotEmpty {
        /// The path that was targeted.
        path: String,
    },

    /// The parent of the target is ephemeral, and cannot have children.
    #[fail(display = "parent of {} is ephemeral, and cannot have children", path)]
    NoChildrenForEphemerals {
        /// The path that was targeted.
        path: String,
    },

    /// The target node has a different version than was expected.
    #[fail(
        display = "node {} has different version than expected ({:?})",
        path, expected
    )]
    VersionConflict {
        /// The path that was targeted.
        path: String,
        /// The expected node version.
        expected: Option<i32>,
    },

    /// The stored payload could not be parsed.
    #[fail(display = "payload of {} is not well-formed: {}", path, reason)]
    Deserialization {
        /// The node whose payload failed to parse.
        path: String,
        /// What the parser reported.
        reason: String,
    },

    /// The payload handed to a write could not be serialized.
    #[fail(display = "payload could not be serialized: {}", _0)]
    Serialization(String),

    /// A single call exceeded the gateway's own timeout.
    #[fail(display = "operation timed out")]
    OperationTimeout,

    /// The client or election participant has already been closed.
    #[fail(display = "already closed")]
    Closed,

    /// The store reported an error this client does not handle.
    #[fail(display = "store call on {} failed with code {}", path, code)]
    Unexpected {
        /// The raw error code reported by the store.
        code: i32,
        /// The path that was targeted.
        path: String,
    },
}

impl Error {
    /// Whether repeating the failed call may reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self,
            Error::ConnectionLoss | Error::OperationTimeout | Error::VersionConflict { .. }
        )
    }

    pub(crate) fn deserialization(path: &str, e: serde_json::Error) -> Self {
        Error::Deserialization {
            path: path.to_string(),
            reason: e.to_string(),
        }
    }

    pub(crate) fn serialization(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::ConnectionLoss.is_retryable());
        assert!(Error::OperationTimeout.is_retryable());
        assert!(Error::VersionConflict {
            path: "/a".into(),
            expected: Some(3),
        }
        .is_retryable());
        assert!(!Error::SessionExpired.is_retryable());
        assert!(!Error::NoNode { path: "/a".into() }.is_retryable());
        assert!(!Error::Deserialization {
            path: "/a".into(),
            reason: "eof".into(),
        }
        .is_retryable());
    }

    #[test]
    fn display_names_path() {
        let e = Error::NoNode {
            path: "/foo/bar".into(),
        };
        assert_eq!(e.to_string(), "node /foo/bar does not exist");
        let e = Error::VersionConflict {
            path: "/foo".into(),
            expected: Some(2),
        };
        assert_eq!(
            e.to_string(),
            "node /foo has different version than expected (Some(2))"
        );
    }
}
