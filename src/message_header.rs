use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::message::{Message, MessageId};
use crate::util::buf_ext::BufExt;


pub const MAGIC: u32 = 0x50E8_E1E8;

/// 8 + 8 + 1 + 15 + 4 + 4 bytes, little endian
pub const HEADER_SIZE: usize = 40;


/// The fixed-size header that precedes every payload on the wire. A frame is one header
///  followed immediately by `payload_len` raw payload bytes, without any further length
///  prefix or padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub ts_start: u64,
    pub ts_end: u64,
    pub priority: i8,
    pub id: MessageId,
    pub payload_len: u32,
}

impl MessageHeader {
    /// Fails if the payload is larger than `max_payload_len`, or too large for the header's
    ///  32 bit length field at all.
    pub fn for_message(msg: &Message, max_payload_len: u32) -> Result<MessageHeader, FrameError> {
        let len = msg.payload().len();
        let payload_len = u32::try_from(len)
            .ok()
            .filter(|&l| l <= max_payload_len)
            .ok_or(FrameError::Oversized { len: len as u64, max: max_payload_len })?;

        Ok(MessageHeader {
            ts_start: msg.ts_start(),
            ts_end: msg.ts_end(),
            priority: msg.priority(),
            id: msg.id(),
            payload_len,
        })
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.ts_start);
        buf.put_u64_le(self.ts_end);
        buf.put_i8(self.priority);
        buf.put_slice(self.id.as_raw());
        buf.put_u32_le(self.payload_len);
        buf.put_u32_le(MAGIC);
    }

    /// Reads and validates a header. The magic number is checked before anything else is
    ///  trusted, and a payload length above `max_payload_len` is rejected so a corrupt header
    ///  can not trigger a huge allocation.
    pub fn deser(buf: &mut impl Buf, max_payload_len: u32) -> Result<MessageHeader, FrameError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(FrameError::Truncated { needed: HEADER_SIZE, available: buf.remaining() });
        }

        let ts_start = buf.try_get_u64_le()?;
        let ts_end = buf.try_get_u64_le()?;
        let priority = buf.try_get_i8()?;
        let id: [u8; MessageId::LEN] = buf.try_copy_to_array()?;
        let payload_len = buf.try_get_u32_le()?;
        let magic = buf.try_get_u32_le()?;

        if magic != MAGIC {
            return Err(FrameError::BadMagic { found: magic });
        }
        if payload_len > max_payload_len {
            return Err(FrameError::Oversized { len: payload_len as u64, max: max_payload_len });
        }

        Ok(MessageHeader {
            ts_start,
            ts_end,
            priority,
            id: MessageId::from_bytes(&id),
            payload_len,
        })
    }

    pub fn into_message(self, payload: Bytes) -> Message {
        Message::from_parts(self.ts_start, self.ts_end, self.priority, self.id, payload)
    }
}


/// Serializes a complete frame (header and payload) into a single buffer.
pub fn encode_frame(msg: &Message) -> Result<BytesMut, FrameError> {
    let header = MessageHeader::for_message(msg, u32::MAX)?;
    let mut buf = BytesMut::with_capacity(msg.size());
    header.ser(&mut buf);
    buf.put_slice(msg.payload());
    Ok(buf)
}

/// Parses a complete frame from `buf`, returning the message and the number of bytes consumed.
pub fn decode_frame(buf: &[u8], max_payload_len: u32) -> Result<(Message, usize), FrameError> {
    let mut parse_buf = buf;
    let header = MessageHeader::deser(&mut parse_buf, max_payload_len)?;

    let payload_len = header.payload_len as usize;
    if parse_buf.len() < payload_len {
        return Err(FrameError::Truncated { needed: payload_len, available: parse_buf.len() });
    }
    let payload = Bytes::copy_from_slice(&parse_buf[..payload_len]);
    Ok((header.into_message(payload), HEADER_SIZE + payload_len))
}
