//! Decoding helpers for gateways that speak the ZooKeeper wire format.
//!
//! The client itself never touches the wire. These helpers exist so that a [`StoreGateway`]
//! implementation can turn raw server replies into the crate's [`Stat`], [`WatchedEvent`], and
//! [`Error`] types at the boundary.
//!
//! [`StoreGateway`]: crate::StoreGateway
//! [`Error`]: crate::Error

use crate::{KeeperState, Stat, WatchedEvent, WatchedEventType};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

mod error;
pub use self::error::error_from_code;

/// Combines a transaction id delivered as two 32-bit halves into its 64-bit value.
pub fn zxid_from_halves(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Types that can be decoded from a big-endian ZooKeeper reply.
pub trait ReadFrom: Sized {
    /// Reads one value from the front of `read`.
    fn read_from<R: Read>(read: &mut R) -> io::Result<Self>;
}

fn read_zxid<R: Read>(read: &mut R) -> io::Result<u64> {
    let high = read.read_u32::<BigEndian>()?;
    let low = read.read_u32::<BigEndian>()?;
    Ok(zxid_from_halves(high, low))
}

impl ReadFrom for Stat {
    fn read_from<R: Read>(read: &mut R) -> io::Result<Stat> {
        Ok(Stat {
            czxid: read_zxid(read)?,
            mzxid: read_zxid(read)?,
            ctime: read.read_i64::<BigEndian>()?,
            mtime: read.read_i64::<BigEndian>()?,
            version: read.read_i32::<BigEndian>()?,
            cversion: read.read_i32::<BigEndian>()?,
            aversion: read.read_i32::<BigEndian>()?,
            ephemeral_owner: read.read_i64::<BigEndian>()?,
            data_length: read.read_i32::<BigEndian>()?,
            num_children: read.read_i32::<BigEndian>()?,
            pzxid: read_zxid(read)?,
        })
    }
}

impl ReadFrom for WatchedEvent {
    fn read_from<R: Read>(read: &mut R) -> io::Result<WatchedEvent> {
        let wtype = read.read_i32::<BigEndian>()?;
        let state = read.read_i32::<BigEndian>()?;
        let path = read_string(read)?;
        let invalid = |what, code| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown {} {}", what, code),
            )
        };
        Ok(WatchedEvent {
            event_type: WatchedEventType::from_code(wtype)
                .ok_or_else(|| invalid("event type", wtype))?,
            keeper_state: KeeperState::from_code(state)
                .ok_or_else(|| invalid("keeper state", state))?,
            path,
        })
    }
}

fn read_string<R: Read>(read: &mut R) -> io::Result<String> {
    let len = read.read_i32::<BigEndian>()?;
    let len = if len < 0 { 0 } else { len as usize };
    // grows with the bytes actually present, not with the claimed length
    let mut buf = Vec::new();
    read.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("string of {} bytes truncated after {}", len, buf.len()),
        ));
    }
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn halves_combine() {
        assert_eq!(zxid_from_halves(0, 7), 7);
        assert_eq!(zxid_from_halves(1, 0), 1 << 32);
        assert_eq!(zxid_from_halves(0xffff_ffff, 0xffff_ffff), u64::MAX);
    }

    #[test]
    fn decodes_stat() {
        let mut buf = Vec::new();
        // czxid, mzxid
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(2).unwrap();
        buf.write_u64::<BigEndian>(9).unwrap();
        // ctime, mtime
        buf.write_i64::<BigEndian>(1_000).unwrap();
        buf.write_i64::<BigEndian>(2_000).unwrap();
        // version, cversion, aversion
        buf.write_i32::<BigEndian>(3).unwrap();
        buf.write_i32::<BigEndian>(4).unwrap();
        buf.write_i32::<BigEndian>(0).unwrap();
        // ephemeral owner
        buf.write_i64::<BigEndian>(0x42).unwrap();
        // data length, children
        buf.write_i32::<BigEndian>(2).unwrap();
        buf.write_i32::<BigEndian>(1).unwrap();
        // pzxid
        buf.write_u64::<BigEndian>(u64::MAX).unwrap();
        assert_eq!(buf.len(), 68);

        let stat = Stat::read_from(&mut &buf[..]).unwrap();
        assert_eq!(stat.czxid, (1 << 32) | 2);
        assert_eq!(stat.mzxid, 9);
        assert_eq!(stat.ctime, 1_000);
        assert_eq!(stat.mtime, 2_000);
        assert_eq!(stat.version, 3);
        assert_eq!(stat.cversion, 4);
        assert_eq!(stat.ephemeral_owner, 0x42);
        assert!(stat.is_ephemeral());
        assert_eq!(stat.data_length, 2);
        assert_eq!(stat.num_children, 1);
        assert_eq!(stat.pzxid, u64::MAX);
    }

    #[test]
    fn decodes_watched_event() {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(2).unwrap();
        buf.write_i32::<BigEndian>(3).unwrap();
        buf.write_i32::<BigEndian>(2).unwrap();
        buf.extend_from_slice(b"/a");
        let e = WatchedEvent::read_from(&mut &buf[..]).unwrap();
        assert_eq!(e.event_type, WatchedEventType::NodeDeleted);
        assert_eq!(e.keeper_state, KeeperState::SyncConnected);
        assert_eq!(e.path, "/a");
    }

    #[test]
    fn rejects_unknown_event_type() {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(99).unwrap();
        buf.write_i32::<BigEndian>(3).unwrap();
        buf.write_i32::<BigEndian>(0).unwrap();
        let e = WatchedEvent::read_from(&mut &buf[..]).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_string_length_fails() {
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(2).unwrap();
        buf.write_i32::<BigEndian>(3).unwrap();
        buf.write_i32::<BigEndian>(i32::MAX).unwrap();
        buf.extend_from_slice(b"/a");
        let e = WatchedEvent::read_from(&mut &buf[..]).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_stat_fails() {
        let buf = [0u8; 10];
        assert!(Stat::read_from(&mut &buf[..]).is_err());
    }
}
