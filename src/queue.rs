use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::bail;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tracing::{debug, trace, Level};

use crate::endpoint::{MessageSink, MessageSource};
use crate::message::{Message, MessageId};
use crate::util::random::{rng_random_factory, Random, RandomFactory};


#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Capacity in bytes, including message headers. This is a lower bound: the effective
    ///  capacity grows to `min_n_pkg` times the largest message ever pushed.
    pub max_size: usize,
    pub min_n_pkg: usize,
    /// The oldest message is only released once the queue spans at least this much time (by
    ///  `ts_start`), giving out-of-order deliveries a chance to be sorted into place.
    ///  `Duration::ZERO` disables the window.
    pub forced_delay: Duration,
}

impl QueueConfig {
    pub fn new() -> QueueConfig {
        QueueConfig {
            max_size: 0,
            min_n_pkg: 16,
            forced_delay: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_n_pkg == 0 {
            bail!("min_n_pkg must be at least 1");
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::new()
    }
}


struct QueueState {
    /// sorted by (ts_start, ts_end) descending, i.e. the oldest message is at the back
    messages: VecDeque<Message>,
    size: usize,
    max_size: usize,
    sub_queues: FxHashMap<MessageId, Arc<Queue>>,
    random: Box<dyn Random>,
}

impl QueueState {
    fn span(&self) -> Duration {
        match (self.messages.front(), self.messages.back()) {
            (Some(newest), Some(oldest)) => Duration::from_micros(newest.ts_start().saturating_sub(oldest.ts_start())),
            _ => Duration::ZERO,
        }
    }

    fn is_empty(&self, forced_delay: Duration) -> bool {
        self.messages.is_empty() || self.span() < forced_delay
    }

    fn add_sorted(&mut self, msg: Message) {
        let key = msg.ts_key();
        let pos = self.messages.partition_point(|existing| key < existing.ts_key());
        self.size += msg.size();
        self.messages.insert(pos, msg);
    }

    /// Drops random messages from the lowest priority class present until the queue fits into
    ///  `max_size`. The victim is picked by reservoir sampling in a single pass, so every member
    ///  of the class is equally likely to go regardless of its position.
    fn purge(&mut self) -> bool {
        let mut erased = false;
        while self.size > self.max_size {
            let mut victim = None;
            let mut lowest_priority = i8::MAX;
            let mut num_candidates = 0;

            for (idx, msg) in self.messages.iter().enumerate() {
                if msg.priority() < lowest_priority {
                    lowest_priority = msg.priority();
                    num_candidates = 0;
                }
                if msg.priority() == lowest_priority {
                    num_candidates += 1;
                    if self.random.gen_usize_range(0..num_candidates) == 0 {
                        victim = Some(idx);
                    }
                }
            }

            let Some(victim) = victim else {
                break;
            };
            if let Some(removed) = self.messages.remove(victim) {
                self.size -= removed.size();
                removed.log_at(Level::DEBUG, "queue over capacity - evicted message");
                erased = true;
            }
        }
        erased
    }
}


/// A bounded buffer of messages, ordered by timestamp and evicting by priority.
///
/// Producers `push` and consumers `pop` from arbitrary threads. Both may block for a bounded
///  time; a zero timeout never blocks, which is what reactor tasks use.
///
/// `push` never fails: if the queue is still full after waiting, the message is inserted
///  anyway and a random message of the lowest priority class present is evicted. `pop` always
///  returns the oldest message.
///
/// A queue can act as a router for named sub-queues (see [Queue::sub_queue]): a message whose id
///  has a registered sub-queue goes there instead, with that sub-queue's own capacity.
pub struct Queue {
    min_n_pkg: usize,
    forced_delay: Duration,
    config: QueueConfig,
    random_factory: RandomFactory,
    state: Mutex<QueueState>,
    cv: Condvar,
    arrivals: Notify,
}

impl Queue {
    pub fn new(config: QueueConfig) -> Queue {
        Self::with_random_factory(config, rng_random_factory())
    }

    /// Eviction randomness comes from `random_factory`, which is also used for every sub-queue.
    pub fn with_random_factory(config: QueueConfig, random_factory: RandomFactory) -> Queue {
        let random: Box<dyn Random> = random_factory();
        Queue {
            min_n_pkg: config.min_n_pkg.max(1),
            forced_delay: config.forced_delay,
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                size: 0,
                max_size: config.max_size,
                sub_queues: FxHashMap::default(),
                random,
            }),
            config,
            random_factory,
            cv: Condvar::new(),
            arrivals: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if messages were evicted to make room, which is a signal of backpressure
    ///  rather than an error.
    pub fn push(&self, msg: Message, timeout: Duration) -> bool {
        let mut state = self.lock();

        if let Some(sub_queue) = state.sub_queues.get(&msg.id()).cloned() {
            drop(state);
            return sub_queue.push(msg, timeout);
        }

        trace!(id = ?msg.id(), len = msg.payload().len(), ?timeout, "push");

        let msg_size = msg.size();
        state.max_size = state.max_size.max(self.min_n_pkg.saturating_mul(msg_size));

        if !timeout.is_zero() && state.size + msg_size > state.max_size {
            state = self.cv.wait_timeout_while(state, timeout, |s| s.size + msg_size > s.max_size)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.add_sorted(msg);
        let purged = state.purge();
        drop(state);

        self.cv.notify_all();
        self.arrivals.notify_one();
        purged
    }

    /// Removes and returns the oldest message, waiting up to `timeout` for one to become
    ///  available.
    pub fn pop(&self, timeout: Duration) -> Option<Message> {
        let mut state = self.lock();

        if state.is_empty(self.forced_delay) {
            if timeout.is_zero() {
                return None;
            }
            state = self.cv.wait_timeout_while(state, timeout, |s| s.is_empty(self.forced_delay))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if state.is_empty(self.forced_delay) {
                return None;
            }
        }

        let msg = state.messages.pop_back()?;
        state.size -= msg.size();
        drop(state);

        self.cv.notify_all();
        trace!(id = ?msg.id(), len = msg.payload().len(), "popped");
        Some(msg)
    }

    /// `true` if there are no messages, or if they do not yet span the reordering window
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty(self.forced_delay)
    }

    /// time between the oldest and the newest message's `ts_start`
    pub fn span(&self) -> Duration {
        self.lock().span()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.lock().size
    }

    pub fn max_size(&self) -> usize {
        self.lock().max_size
    }

    /// Returns the sub-queue for `id`, creating it with this queue's configuration and random
    ///  factory if it does not exist yet. From then on, messages pushed into this queue with that id are routed there.
    pub fn sub_queue(&self, id: impl Into<MessageId>) -> Arc<Queue> {
        let id = id.into();
        self.lock().sub_queues
            .entry(id)
            .or_insert_with(|| {
                debug!(?id, "creating sub-queue");
                Arc::new(Queue::with_random_factory(self.config.clone(), self.random_factory.clone()))
            })
            .clone()
    }

    /// Resolves after the next push into this queue. A push that happens while nobody waits is
    ///  remembered, so a caller that checked the queue and then waits does not miss it.
    pub async fn wait_for_arrival(&self) {
        self.arrivals.notified().await
    }
}

impl Default for Queue {
    fn default() -> Self {
        Queue::new(QueueConfig::new())
    }
}

impl MessageSink for Queue {
    fn push(&self, msg: Message, timeout: Duration) -> bool {
        Queue::push(self, msg, timeout)
    }
}

impl MessageSource for Queue {
    fn pop(&self, timeout: Duration) -> Option<Message> {
        Queue::pop(self, timeout)
    }

    fn is_empty(&self) -> bool {
        Queue::is_empty(self)
    }

    fn sub_queue(&self, id: MessageId) -> Arc<Queue> {
        Queue::sub_queue(self, id)
    }
}
