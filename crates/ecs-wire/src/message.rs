//! Message-level framing shared by every wire message (§6):
//! `uint8 type` followed by `uint32 tick`, then a type-specific body.

use crate::{ByteReader, ByteWriter, WireError, WireResult};

/// The length in bytes of a client→server Handshake body (`uint8 version`).
pub const HANDSHAKE_CLIENT_LEN: usize = 1;
/// The length in bytes of a server→client Handshake body
/// (`uint8 domain_id, uint32 tick`).
pub const HANDSHAKE_SERVER_LEN: usize = 5;

/// The `type` byte every message starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Handshake = 1,
    Clocksync = 2,
    Transaction = 3,
    Command = 4,
    Snapshot = 5,
}

impl MessageType {
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> WireResult<Self> {
        match tag {
            1 => Ok(Self::Handshake),
            2 => Ok(Self::Clocksync),
            3 => Ok(Self::Transaction),
            4 => Ok(Self::Command),
            5 => Ok(Self::Snapshot),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// The common `{type, tick}` prefix every message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub tick: u32,
}

impl MessageHeader {
    pub fn encode(self, w: &mut dyn ByteWriter) {
        w.write_u8(self.message_type.to_u8());
        w.write_u32(self.tick);
    }

    pub fn decode(r: &mut dyn ByteReader) -> WireResult<Self> {
        let message_type = MessageType::from_u8(r.read_u8()?)?;
        let tick = r.read_u32()?;
        Ok(Self { message_type, tick })
    }
}

/// The per-op tag byte inside a Transaction body (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    Spawn = 1,
    Despawn = 2,
    Set = 3,
    Remove = 4,
    Add = 5,
}

impl OpTag {
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> WireResult<Self> {
        match tag {
            1 => Ok(Self::Spawn),
            2 => Ok(Self::Despawn),
            3 => Ok(Self::Set),
            4 => Ok(Self::Remove),
            5 => Ok(Self::Add),
            other => Err(WireError::UnknownOpTag(other)),
        }
    }
}

/// `Handshake (client→server)`: `uint8 version` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeClient {
    pub version: u8,
}

impl HandshakeClient {
    pub fn encode(self, w: &mut dyn ByteWriter) {
        w.write_u8(self.version);
    }

    pub fn decode(r: &mut dyn ByteReader) -> WireResult<Self> {
        Ok(Self { version: r.read_u8()? })
    }
}

/// `Handshake (server→client)`: `uint8 domain_id, uint32 tick` (§6).
///
/// Domain ids are encoded as a plain `u8` here, matching the wire grammar
/// literally; a peer assigning domain ids above 255 is outside this
/// message's range (see `ReplicationOp`/`Transaction` in `ecs-replication`,
/// which instead varint-encode `domain_id` to cover the full 11-bit range --
/// an intentional deviation documented in that crate's `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeServer {
    pub domain_id: u8,
    pub tick: u32,
}

impl HandshakeServer {
    pub fn encode(self, w: &mut dyn ByteWriter) {
        w.write_u8(self.domain_id);
        w.write_u32(self.tick);
    }

    pub fn decode(r: &mut dyn ByteReader) -> WireResult<Self> {
        Ok(Self {
            domain_id: r.read_u8()?,
            tick: r.read_u32()?,
        })
    }
}

/// NTP-like three-sample clock exchange: `float64 t0, t1, t2` (§6). The host
/// computes offset/RTT from the three timestamps; this crate only frames
/// them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clocksync {
    pub t0: f64,
    pub t1: f64,
    pub t2: f64,
}

impl Clocksync {
    pub fn encode(self, w: &mut dyn ByteWriter) {
        w.write_f64(self.t0);
        w.write_f64(self.t1);
        w.write_f64(self.t2);
    }

    pub fn decode(r: &mut dyn ByteReader) -> WireResult<Self> {
        Ok(Self {
            t0: r.read_f64()?,
            t1: r.read_f64()?,
            t2: r.read_f64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SliceReader, VecWriter};

    #[test]
    fn header_roundtrip() {
        let header = MessageHeader {
            message_type: MessageType::Transaction,
            tick: 4242,
        };
        let mut w = VecWriter::new();
        header.encode(&mut w);
        let mut r = SliceReader::new(w.as_slice());
        assert_eq!(MessageHeader::decode(&mut r).unwrap(), header);
    }

    #[test]
    fn unknown_message_type_errors() {
        assert!(matches!(
            MessageType::from_u8(200),
            Err(WireError::UnknownMessageType(200))
        ));
    }

    #[test]
    fn unknown_op_tag_errors() {
        assert!(matches!(OpTag::from_u8(9), Err(WireError::UnknownOpTag(9))));
    }

    #[test]
    fn handshake_roundtrip() {
        let client = HandshakeClient { version: 7 };
        let mut w = VecWriter::new();
        client.encode(&mut w);
        let mut r = SliceReader::new(w.as_slice());
        assert_eq!(HandshakeClient::decode(&mut r).unwrap(), client);

        let server = HandshakeServer { domain_id: 3, tick: 100 };
        let mut w = VecWriter::new();
        server.encode(&mut w);
        let mut r = SliceReader::new(w.as_slice());
        assert_eq!(HandshakeServer::decode(&mut r).unwrap(), server);
    }

    #[test]
    fn clocksync_roundtrip() {
        let sample = Clocksync { t0: 1.0, t1: 2.5, t2: 3.25 };
        let mut w = VecWriter::new();
        sample.encode(&mut w);
        let mut r = SliceReader::new(w.as_slice());
        assert_eq!(Clocksync::decode(&mut r).unwrap(), sample);
    }
}
