use std::sync::Arc;
use std::time::Duration;

use crate::message::{Message, MessageId};
use crate::queue::Queue;


/// timeout for callers that have no specific requirement
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);


/// The producer side of anything that carries messages: a local queue, a connection, a
///  server broadcasting to its peers, or a client.
pub trait MessageSink: Send + Sync {
    /// Returns `true` if the push caused older / lower priority messages to be evicted.
    fn push(&self, msg: Message, timeout: Duration) -> bool;
}

/// The consumer side, see [MessageSink].
pub trait MessageSource: Send + Sync {
    fn pop(&self, timeout: Duration) -> Option<Message>;

    fn is_empty(&self) -> bool;

    /// The named sub-queue of the receiving side's queue. Once it exists, received messages with
    ///  this id go there rather than to [MessageSource::pop].
    fn sub_queue(&self, id: MessageId) -> Arc<Queue>;
}
