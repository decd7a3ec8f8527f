use std::time::Duration;

/// Problems with a single frame on the wire. All of them are fatal for the connection that
///  received the frame, and they are never retried.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("bad magic number 0x{found:08X} in frame header")]
    BadMagic { found: u32 },
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    Oversized { len: u64, max: u32 },
}

impl From<bytes::TryGetError> for FrameError {
    fn from(value: bytes::TryGetError) -> Self {
        FrameError::Truncated {
            needed: value.requested,
            available: value.available,
        }
    }
}

/// Reasons for a connection to go down. These are logged and isolated to the affected
///  connection, they never reach queues or other connections.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
    #[error("no frame received within {0:?}")]
    LivenessTimeout(Duration),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not resolve or connect to {target}: {reason}")]
    ResolveOrConnect { target: String, reason: String },
}
