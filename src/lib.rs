//! A bounded, priority- and time-aware message transport.
//!
//! The same [queue::Queue] serves as a local mailbox and as the buffer behind TCP connections:
//!  producers push timestamped, prioritized [message::Message]s, consumers pop the oldest one.
//!  When a queue is full, a random message of the lowest priority present is evicted.
//!
//! Over the network, [net::connection::Connection] frames messages on a TCP stream with
//!  heartbeats and a receive watchdog, [net::server::Server] broadcasts to all of its peers,
//!  and [net::client::Client] reconnects on demand.

pub mod endpoint;
pub mod error;
pub mod mem_channel;
pub mod message;
pub mod message_header;
pub mod net;
pub mod queue;
pub mod util;
