//! Fixed-layout wire record. Every coordinator/participant exchange is one
//! 778-byte frame.
//!
//! Frame layout (little-endian):
//!   [u8:  message type]
//!   [i32: instance id, -1 when the coordinator is the sender]
//!   [u32: sync point ordinal]
//!   [u8:  validation passed]
//!   [256 bytes: fingerprint, NUL-padded, at most 255 non-NUL]
//!   [512 bytes: mismatch details, NUL-padded]
//!
//! Both peers read and write exactly [`FRAME_LEN`] bytes per message. The
//! codec decodes only once a full frame is buffered, so partial reads and
//! short writes never reach the protocol layer.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Fingerprint field width, including at least one NUL terminator.
pub const MAX_FINGERPRINT_LEN: usize = 256;
/// Mismatch-details field width, including at least one NUL terminator.
pub const MAX_DETAILS_LEN: usize = 512;
/// Total frame size on the wire.
pub const FRAME_LEN: usize = 1 + 4 + 4 + 1 + MAX_FINGERPRINT_LEN + MAX_DETAILS_LEN;

/// Sender id used by the coordinator in broadcast results.
pub const COORDINATOR_ID: i32 = -1;

/// Wire message types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Client → coordinator: claim an instance id.
    Register = 1,
    /// Client → coordinator: fingerprint submission for one sync point.
    SyncPoint = 2,
    /// Coordinator → client: verdict for one sync point.
    ValidationResult = 3,
    /// Client → coordinator: best-effort goodbye.
    Shutdown = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Register),
            2 => Ok(Self::SyncPoint),
            3 => Ok(Self::ValidationResult),
            4 => Ok(Self::Shutdown),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// One wire record. A single type carries all four message kinds; fields not
/// meaningful for a kind are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub instance_id: i32,
    pub sync_point: u32,
    pub validation_passed: bool,
    pub fingerprint: String,
    pub mismatch_details: String,
}

impl Message {
    pub fn register(instance_id: i32) -> Self {
        Self {
            msg_type: MessageType::Register,
            instance_id,
            sync_point: 0,
            validation_passed: false,
            fingerprint: String::new(),
            mismatch_details: String::new(),
        }
    }

    pub fn sync_point(instance_id: i32, sync_point: u32, fingerprint: &str) -> Self {
        Self {
            msg_type: MessageType::SyncPoint,
            instance_id,
            sync_point,
            validation_passed: false,
            fingerprint: fingerprint.to_owned(),
            mismatch_details: String::new(),
        }
    }

    pub fn result(sync_point: u32, passed: bool, details: &str) -> Self {
        Self {
            msg_type: MessageType::ValidationResult,
            instance_id: COORDINATOR_ID,
            sync_point,
            validation_passed: passed,
            fingerprint: String::new(),
            mismatch_details: details.to_owned(),
        }
    }

    pub fn shutdown(instance_id: i32) -> Self {
        Self {
            msg_type: MessageType::Shutdown,
            instance_id,
            sync_point: 0,
            validation_passed: false,
            fingerprint: String::new(),
            mismatch_details: String::new(),
        }
    }
}

/// Codec framing the stream into fixed-size [`Message`] records.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if src.len() < FRAME_LEN {
            src.reserve(FRAME_LEN - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(FRAME_LEN);
        let msg_type = MessageType::try_from(frame.get_u8())?;
        let instance_id = frame.get_i32_le();
        let sync_point = frame.get_u32_le();
        let validation_passed = frame.get_u8() != 0;
        let fingerprint = take_padded(&mut frame, MAX_FINGERPRINT_LEN);
        let mismatch_details = take_padded(&mut frame, MAX_DETAILS_LEN);
        Ok(Some(Message {
            msg_type,
            instance_id,
            sync_point,
            validation_passed,
            fingerprint,
            mismatch_details,
        }))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        dst.reserve(FRAME_LEN);
        dst.put_u8(item.msg_type as u8);
        dst.put_i32_le(item.instance_id);
        dst.put_u32_le(item.sync_point);
        dst.put_u8(item.validation_passed as u8);
        put_padded(dst, &item.fingerprint, MAX_FINGERPRINT_LEN);
        put_padded(dst, &item.mismatch_details, MAX_DETAILS_LEN);
        Ok(())
    }
}

/// Write `s` NUL-padded into a `width`-byte field, truncating oversize input
/// while always keeping a terminator byte.
fn put_padded(dst: &mut BytesMut, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(width - 1);
    dst.put_slice(&bytes[..len]);
    dst.put_bytes(0, width - len);
}

fn take_padded(src: &mut BytesMut, width: usize) -> String {
    let field = src.split_to(width);
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&field[..end]).into_owned()
}
