use std::fmt::{Debug, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::Level;

use crate::message_header::HEADER_SIZE;


/// A [MessageId] is a short identifier of at most 15 bytes that travels in every frame header.
///  It is intended to be a human-readable topic name; application code uses it to route
///  messages into sub-queues.
///
/// NB: Longer ids are silently truncated, and an embedded zero byte terminates the id early.
///      Everything after the first zero is zeroed out on construction, so byte-wise equality is
///      the same as equality of the logical id.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageId([u8; MessageId::LEN]);

impl MessageId {
    pub const LEN: usize = 15;

    pub fn new(id: &str) -> MessageId {
        Self::from_bytes(id.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> MessageId {
        let mut raw = [0u8; Self::LEN];
        for (dst, &src) in raw.iter_mut().zip(bytes.iter()) {
            if src == 0 {
                break;
            }
            *dst = src;
        }
        MessageId(raw)
    }

    pub fn as_raw(&self) -> &[u8; MessageId::LEN] {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::LEN);
        &self.0[..len]
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId::new(value)
    }
}


/// microseconds since the epoch, saturating at zero for clocks set before 1970
pub fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}


/// A [Message] is a fixed-size header plus an opaque payload. Cloning a message is cheap: all
///  clones share the same payload buffer, which is released when the last clone is dropped.
///
/// Messages are never modified once they are pushed into a queue.
#[derive(Clone)]
pub struct Message {
    ts_start: u64,
    ts_end: u64,
    priority: i8,
    id: MessageId,
    payload: Bytes,
}

impl Message {
    pub fn new(id: impl Into<MessageId>, payload: impl Into<Bytes>) -> Message {
        let now = now_micros();
        Message {
            ts_start: now,
            ts_end: now,
            priority: 0,
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// A heartbeat is an empty message without id. It is sent when there is nothing else to
    ///  send, and it only serves to keep the peer's watchdog from firing.
    pub fn heartbeat() -> Message {
        Message::new(MessageId::default(), Bytes::new())
    }

    pub(crate) fn from_parts(ts_start: u64, ts_end: u64, priority: i8, id: MessageId, payload: Bytes) -> Message {
        Message {
            ts_start,
            ts_end,
            priority,
            id,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Message {
        self.priority = priority;
        self
    }

    /// `ts_end` is clamped so it is never before `ts_start`; `None` means 'same as start'.
    pub fn with_timestamps(mut self, ts_start: u64, ts_end: Option<u64>) -> Message {
        self.ts_start = ts_start;
        self.ts_end = ts_end.unwrap_or(ts_start).max(ts_start);
        self
    }

    pub fn ts_start(&self) -> u64 {
        self.ts_start
    }

    pub fn ts_end(&self) -> u64 {
        self.ts_end
    }

    /// sort key for placing messages in a queue's buffer
    pub fn ts_key(&self) -> (u64, u64) {
        (self.ts_start, self.ts_end)
    }

    pub fn priority(&self) -> i8 {
        self.priority
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// total size including the header, i.e. the number of bytes this message occupies on the
    ///  wire and in a queue's size accounting
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.id.is_empty() && self.payload.is_empty()
    }

    pub fn same_buffer(&self, other: &Message) -> bool {
        self.payload.as_ptr() == other.payload.as_ptr() && self.payload.len() == other.payload.len()
    }

    /// Compares all header fields and the payload *content*, as opposed to `==` which requires
    ///  the payload to be the same buffer.
    pub fn content_eq(&self, other: &Message) -> bool {
        self.ts_start == other.ts_start
            && self.ts_end == other.ts_end
            && self.priority == other.priority
            && self.id == other.id
            && self.payload == other.payload
    }

    /// Logs the message's header fields (not the payload) with `context` as the log message.
    pub fn log_at(&self, level: Level, context: &str) {
        match level {
            Level::ERROR => tracing::error!(id = ?self.id, priority = self.priority, len = self.payload.len(), ts_start = self.ts_start, ts_end = self.ts_end, "{}", context),
            Level::WARN => tracing::warn!(id = ?self.id, priority = self.priority, len = self.payload.len(), ts_start = self.ts_start, ts_end = self.ts_end, "{}", context),
            Level::INFO => tracing::info!(id = ?self.id, priority = self.priority, len = self.payload.len(), ts_start = self.ts_start, ts_end = self.ts_end, "{}", context),
            Level::DEBUG => tracing::debug!(id = ?self.id, priority = self.priority, len = self.payload.len(), ts_start = self.ts_start, ts_end = self.ts_end, "{}", context),
            _ => tracing::trace!(id = ?self.id, priority = self.priority, len = self.payload.len(), ts_start = self.ts_start, ts_end = self.ts_end, "{}", context),
        }
    }
}

/// Equality is by timestamps, id and payload *identity*. Two messages with byte-identical but
///  separately allocated payloads are not equal, see [Message::content_eq] for that.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.ts_start == other.ts_start
            && self.ts_end == other.ts_end
            && self.id == other.id
            && self.same_buffer(other)
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{id:{:?}, prio:{}, len:{}, ts:{}..{}}}", self.id, self.priority, self.payload.len(), self.ts_start, self.ts_end)
    }
}
