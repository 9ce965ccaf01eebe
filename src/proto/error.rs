use crate::Error;

// Numeric error codes used by ZooKeeper servers.
pub(crate) const CONNECTION_LOSS: i32 = -4;
pub(crate) const OPERATION_TIMEOUT: i32 = -7;
pub(crate) const NO_NODE: i32 = -101;
pub(crate) const BAD_VERSION: i32 = -103;
pub(crate) const NO_CHILDREN_FOR_EPHEMERALS: i32 = -108;
pub(crate) const NODE_EXISTS: i32 = -110;
pub(crate) const NOT_EMPTY: i32 = -111;
pub(crate) const SESSION_EXPIRED: i32 = -112;
pub(crate) const SESSION_MOVED: i32 = -118;

/// Maps a ZooKeeper error code reported for a call against `path` onto an [`Error`].
///
/// `expected` is the version the failed call asked for, if any, and is only recorded for
/// version conflicts. Codes with no dedicated kind surface as [`Error::Unexpected`].
pub fn error_from_code(code: i32, path: &str, expected: Option<i32>) -> Error {
    let path = path.to_string();
    match code {
        CONNECTION_LOSS | SESSION_MOVED => Error::ConnectionLoss,
        OPERATION_TIMEOUT => Error::OperationTimeout,
        SESSION_EXPIRED => Error::SessionExpired,
        NO_NODE => Error::NoNode { path },
        NODE_EXISTS => Error::NodeExists { path },
        NOT_EMPTY => Error::NotEmpty { path },
        NO_CHILDREN_FOR_EPHEMERALS => Error::NoChildrenForEphemerals { path },
        BAD_VERSION => Error::VersionConflict { path, expected },
        code => Error::Unexpected { code, path },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        assert_eq!(error_from_code(-4, "/a", None), Error::ConnectionLoss);
        assert_eq!(error_from_code(-118, "/a", None), Error::ConnectionLoss);
        assert_eq!(error_from_code(-7, "/a", None), Error::OperationTimeout);
        assert_eq!(error_from_code(-112, "/a", None), Error::SessionExpired);
        assert_eq!(
            error_from_code(-101, "/a", None),
            Error::NoNode { path: "/a".into() }
        );
        assert_eq!(
            error_from_code(-103, "/a", Some(4)),
            Error::VersionConflict {
                path: "/a".into(),
                expected: Some(4)
            }
        );
    }

    #[test]
    fn unknown_codes_are_kept() {
        assert_eq!(
            error_from_code(-102, "/secret", None),
            Error::Unexpected {
                code: -102,
                path: "/secret".into()
            }
        );
    }
}
