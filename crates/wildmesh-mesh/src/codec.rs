//! Binary framing for mesh messages.
//!
//! Layout (big-endian):
//!
//! ```text
//! version:u8 | type:u8 | source:u32 | dest:u32 | message_id:u32 |
//! hop_count:u8 | max_hops:u8 | timestamp:u64 | payload_len:u16 | checksum:u32
//! ```
//!
//! followed by `payload_len` bytes of JSON. The checksum is the first four
//! bytes of BLAKE3 over the header (minus the checksum) and the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use wildmesh_core::WildError;

use crate::protocol::{MeshMessage, MessageType, PROTOCOL_VERSION, Payload};

/// Header size including the checksum.
pub const HEADER_LEN: usize = 30;

const CHECKSUM_OFFSET: usize = HEADER_LEN - 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

impl From<CodecError> for WildError {
    fn from(e: CodecError) -> Self {
        WildError::Codec(e.to_string())
    }
}

/// Encoder/decoder bound to a maximum frame size.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_frame_bytes: usize,
}

impl Codec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn encode(&self, msg: &MeshMessage) -> Result<Bytes, CodecError> {
        let body = match &msg.payload {
            Payload::Heartbeat(p) => to_json(p)?,
            Payload::Discovery(p) => to_json(p)?,
            Payload::RoleAssignment(p) => to_json(p)?,
            Payload::TaskAssignment(p) => to_json(p)?,
            Payload::TaskResult(p) => to_json(p)?,
            Payload::ConfigUpdate(p) => to_json(p)?,
            Payload::Status(p) => to_json(p)?,
            Payload::Ack(p) => to_json(p)?,
            Payload::Error(p) => to_json(p)?,
        };

        let len = HEADER_LEN + body.len();
        if len > self.max_frame_bytes || body.len() > u16::MAX as usize {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u8(msg.version);
        buf.put_u8(msg.msg_type().code());
        buf.put_u32(msg.source);
        buf.put_u32(msg.dest);
        buf.put_u32(msg.message_id);
        buf.put_u8(msg.hop_count);
        buf.put_u8(msg.max_hops);
        buf.put_u64(msg.timestamp);
        buf.put_u16(body.len() as u16);
        let sum = checksum(&buf[..CHECKSUM_OFFSET], &body);
        buf.put_u32(sum);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decode one frame. Never panics on hostile input.
    pub fn decode(&self, frame: &[u8]) -> Result<MeshMessage, CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::Malformed(format!(
                "truncated header: {} bytes",
                frame.len()
            )));
        }

        let mut header = &frame[..HEADER_LEN];
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let code = header.get_u8();
        let msg_type = MessageType::from_code(code)
            .ok_or_else(|| CodecError::Malformed(format!("unknown message type 0x{code:02x}")))?;
        let source = header.get_u32();
        let dest = header.get_u32();
        let message_id = header.get_u32();
        let hop_count = header.get_u8();
        let max_hops = header.get_u8();
        let timestamp = header.get_u64();
        let payload_len = header.get_u16() as usize;
        let expected = header.get_u32();

        let body = &frame[HEADER_LEN..];
        if body.len() != payload_len {
            return Err(CodecError::Malformed(format!(
                "payload length {} does not match header {}",
                body.len(),
                payload_len
            )));
        }
        if checksum(&frame[..CHECKSUM_OFFSET], body) != expected {
            return Err(CodecError::Malformed("checksum mismatch".into()));
        }
        if hop_count > max_hops {
            return Err(CodecError::Malformed(format!(
                "hop count {hop_count} beyond max {max_hops}"
            )));
        }

        let payload = match msg_type {
            MessageType::Heartbeat => Payload::Heartbeat(from_json(body, msg_type)?),
            MessageType::Discovery => Payload::Discovery(from_json(body, msg_type)?),
            MessageType::RoleAssignment => Payload::RoleAssignment(from_json(body, msg_type)?),
            MessageType::TaskAssignment => Payload::TaskAssignment(from_json(body, msg_type)?),
            MessageType::TaskResult => Payload::TaskResult(from_json(body, msg_type)?),
            MessageType::ConfigUpdate => Payload::ConfigUpdate(from_json(body, msg_type)?),
            MessageType::Status => Payload::Status(from_json(body, msg_type)?),
            MessageType::Ack => Payload::Ack(from_json(body, msg_type)?),
            MessageType::Error => Payload::Error(from_json(body, msg_type)?),
        };

        Ok(MeshMessage {
            version,
            source,
            dest,
            message_id,
            hop_count,
            max_hops,
            timestamp,
            payload,
        })
    }
}

fn checksum(header: &[u8], body: &[u8]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(header);
    hasher.update(body);
    let hash = hasher.finalize();
    let b = hash.as_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Malformed(format!("unencodable payload: {e}")))
}

fn from_json<T: DeserializeOwned>(body: &[u8], msg_type: MessageType) -> Result<T, CodecError> {
    serde_json::from_slice(body)
        .map_err(|e| CodecError::Malformed(format!("bad {} payload: {e}", msg_type.as_str())))
}
