//! Big-endian wire codec.
//!
//! Layout (all multi-byte integers network order):
//!
//! ```text
//! type(1) chflag(1) sender(4) ttl(1) path_len(2) path(4 × n)
//! gps_flag(1) [x(8) y(8) z(8)]
//! -- election only --
//! flags(1) class(2) direct(4) pdsf(4) last_pi(4) score(8) hash(4)
//! history_len(2) history(4 × n)
//! ```
//!
//! Decoding is strict: unknown discriminants, lengths over the fixed bounds,
//! and truncated buffers are errors, never silent truncation.

use thiserror::Error;

use crate::packet::{DiscoveryPacket, ElectionData, ElectionPacket, GpsLocation, Packet};
use crate::{MAX_PATH_LEN, PDSF_MAX_HOPS};

/// Errors raised while decoding a wire buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the record did.
    #[error("truncated packet: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// The message-type byte is not a known discriminant.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A length field exceeds its fixed wire bound.
    #[error("{field} length {len} exceeds bound {bound}")]
    LengthOutOfBounds {
        field: &'static str,
        len: usize,
        bound: usize,
    },
}

const FLAG_RENOUNCEMENT: u8 = 0x1;

struct Writer<'a> {
    buf: &'a mut Vec<u8>,
}

impl Writer<'_> {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() - self.pos < n {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n - (self.buf.len() - self.pos),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16, WireError> {
        let s = self.take(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }
    fn u32(&mut self) -> Result<u32, WireError> {
        let s = self.take(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }
    fn f64(&mut self) -> Result<f64, WireError> {
        let s = self.take(8)?;
        Ok(f64::from_be_bytes([
            s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
        ]))
    }
}

/// Serialized size of a packet in bytes.
pub fn encoded_len(packet: &Packet) -> usize {
    let base = packet.base();
    // type + chflag + sender + ttl + path_len
    let mut len = 1 + 1 + 4 + 1 + 2 + base.path.len() * 4;
    len += 1; // gps flag
    if base.position.is_some() {
        len += 3 * 8;
    }
    if let Some(e) = packet.election() {
        len += 1 + 2 + 4 + 4 + 4 + 8 + 4;
        len += 2 + e.pdsf_history.len() * 4;
    }
    len
}

/// Encode a packet to bytes.
///
/// The fixed wire bounds hold on the way out too: a hand-assembled packet
/// whose path or history exceeds them is refused.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, WireError> {
    let base = packet.base();
    if base.path.len() > MAX_PATH_LEN {
        return Err(WireError::LengthOutOfBounds {
            field: "path",
            len: base.path.len(),
            bound: MAX_PATH_LEN,
        });
    }
    if let Some(e) = packet.election() {
        if e.pdsf_history.len() > PDSF_MAX_HOPS {
            return Err(WireError::LengthOutOfBounds {
                field: "pdsf_history",
                len: e.pdsf_history.len(),
                bound: PDSF_MAX_HOPS,
            });
        }
    }

    let mut buf = Vec::with_capacity(encoded_len(packet));
    let mut w = Writer { buf: &mut buf };

    w.u8(packet.message_type() as u8);
    w.u8(base.clusterhead_flag as u8);
    w.u32(base.sender_id);
    w.u8(base.ttl);
    w.u16(base.path.len() as u16);
    for id in &base.path {
        w.u32(*id);
    }
    match base.position {
        Some(gps) => {
            w.u8(1);
            w.f64(gps.x);
            w.f64(gps.y);
            w.f64(gps.z);
        }
        None => w.u8(0),
    }

    if let Some(e) = packet.election() {
        w.u8(if e.is_renouncement { FLAG_RENOUNCEMENT } else { 0 });
        w.u16(e.class_id);
        w.u32(e.direct_connections);
        w.u32(e.pdsf);
        w.u32(e.last_pi);
        w.f64(e.score);
        w.u32(e.hash);
        w.u16(e.pdsf_history.len() as u16);
        for c in &e.pdsf_history {
            w.u32(*c);
        }
    }

    Ok(buf)
}

/// Decode a packet from bytes, returning the packet and bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize), WireError> {
    let mut r = Reader { buf, pos: 0 };

    let msg_type = r.u8()?;
    let clusterhead_flag = r.u8()? == 1;
    let sender_id = r.u32()?;
    let ttl = r.u8()?;

    let path_len = r.u16()? as usize;
    if path_len > MAX_PATH_LEN {
        return Err(WireError::LengthOutOfBounds {
            field: "path",
            len: path_len,
            bound: MAX_PATH_LEN,
        });
    }
    let mut path = Vec::with_capacity(path_len);
    for _ in 0..path_len {
        path.push(r.u32()?);
    }

    let position = if r.u8()? == 1 {
        Some(GpsLocation::new(r.f64()?, r.f64()?, r.f64()?))
    } else {
        None
    };

    let base = DiscoveryPacket {
        sender_id,
        ttl,
        clusterhead_flag,
        path,
        position,
    };

    let packet = match msg_type {
        0 => Packet::Discovery(base),
        1 => {
            let flags = r.u8()?;
            let class_id = r.u16()?;
            let direct_connections = r.u32()?;
            let pdsf = r.u32()?;
            let last_pi = r.u32()?;
            let score = r.f64()?;
            let hash = r.u32()?;
            let history_len = r.u16()? as usize;
            if history_len > PDSF_MAX_HOPS {
                return Err(WireError::LengthOutOfBounds {
                    field: "pdsf_history",
                    len: history_len,
                    bound: PDSF_MAX_HOPS,
                });
            }
            let mut pdsf_history = Vec::with_capacity(history_len);
            for _ in 0..history_len {
                pdsf_history.push(r.u32()?);
            }
            Packet::Election(ElectionPacket {
                base,
                election: ElectionData {
                    class_id,
                    direct_connections,
                    pdsf,
                    last_pi,
                    score,
                    hash,
                    pdsf_history,
                    is_renouncement: flags & FLAG_RENOUNCEMENT != 0,
                },
            })
        }
        other => return Err(WireError::UnknownMessageType(other)),
    };

    Ok((packet, r.pos))
}
