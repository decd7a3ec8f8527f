use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::endpoint::{MessageSink, MessageSource};
use crate::message::{Message, MessageId};
use crate::queue::{Queue, QueueConfig};


/// A local mailbox: pushing and popping go to the same queue. It has the same API as the
///  network transports, so code can be tested in-process and deployed over TCP.
///
/// Closing is advisory: it flips the flag that producers and consumers check, queued messages
///  stay available.
#[derive(Clone)]
pub struct MemChannel {
    queue: Arc<Queue>,
    open: Arc<AtomicBool>,
}

impl MemChannel {
    pub fn new(config: QueueConfig) -> MemChannel {
        MemChannel {
            queue: Arc::new(Queue::new(config)),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }
}

impl Default for MemChannel {
    fn default() -> Self {
        MemChannel::new(QueueConfig::new())
    }
}

impl MessageSink for MemChannel {
    fn push(&self, msg: Message, timeout: Duration) -> bool {
        self.queue.push(msg, timeout)
    }
}

impl MessageSource for MemChannel {
    fn pop(&self, timeout: Duration) -> Option<Message> {
        self.queue.pop(timeout)
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn sub_queue(&self, id: MessageId) -> Arc<Queue> {
        self.queue.sub_queue(id)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use crate::endpoint::DEFAULT_TIMEOUT;
    use super::*;

    #[test]
    fn test_push_then_pop() {
        let channel = MemChannel::default();
        let producer = channel.clone();

        thread::spawn(move || {
            producer.push(Message::new("ping", b"1".as_slice()), Duration::ZERO);
        }).join().unwrap();

        let msg = channel.pop(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.id(), MessageId::new("ping"));
        assert!(channel.is_empty());
        assert!(channel.pop(DEFAULT_TIMEOUT).is_none());
    }

    #[test]
    fn test_close_keeps_messages() {
        let channel = MemChannel::default();
        channel.push(Message::new("last", b"words".as_slice()), Duration::ZERO);

        assert!(channel.is_open());
        channel.clone().close();
        assert!(!channel.is_open());
        assert_eq!(channel.queue().len(), 1);
        assert!(channel.pop(Duration::ZERO).is_some());
        assert_eq!(channel.queue().size_bytes(), 0);
    }
}
