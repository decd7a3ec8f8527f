use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::{select, time};
use tracing::{debug, info, trace, warn, Level};

use crate::endpoint::{MessageSink, MessageSource};
use crate::error::CommError;
use crate::message::{Message, MessageId};
use crate::message_header::{MessageHeader, HEADER_SIZE};
use crate::net::net_config::ConnectionConfig;
use crate::queue::Queue;


struct ConnectionShared {
    peer_addr: SocketAddr,
    established: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ConnectionShared {
    fn close(&self, reason: Option<&CommError>) {
        if self.established.swap(false, Ordering::AcqRel) {
            match reason {
                Some(CommError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => info!("connection to {:?} closed by peer", self.peer_addr),
                Some(e) => warn!("closing connection to {:?}: {}", self.peer_addr, e),
                None => info!("closing connection to {:?}", self.peer_addr),
            }
            self.shutdown.send_replace(true);
        }
    }
}


/// A framed duplex stream over one TCP socket. Messages are taken from the outbound queue and
///  written to the socket, frames read from the socket are pushed into the inbound queue.
///
/// Two tasks do the work:
/// * The writer sends a frame at least every `keep_alive_interval`, a heartbeat if the outbound
///   queue has nothing to offer. It sends immediately when something is pushed.
/// * The reader re-arms a watchdog for every frame. If no frame (not even a heartbeat) arrives
///   in time, the connection is closed.
///
/// Any error closes the connection for good; reconnecting means creating a new [Connection]
///  around the same queues. Neither task ever blocks on a queue.
pub struct Connection {
    shared: Arc<ConnectionShared>,
    outbound: Arc<Queue>,
    inbound: Arc<Queue>,
}

impl Connection {
    /// Takes ownership of the socket and starts the reader and writer tasks. This must be called
    ///  from within a tokio runtime.
    pub fn spawn(stream: TcpStream, outbound: Arc<Queue>, inbound: Arc<Queue>, config: Arc<ConnectionConfig>) -> std::io::Result<Connection> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(ConnectionShared {
            peer_addr,
            established: AtomicBool::new(true),
            shutdown,
        });
        info!("connection to {:?} established", peer_addr);

        tokio::spawn(write_loop(shared.clone(), write_half, outbound.clone(), config.clone()));
        tokio::spawn(read_loop(shared.clone(), read_half, inbound.clone(), config));

        Ok(Connection {
            shared,
            outbound,
            inbound,
        })
    }

    pub fn is_established(&self) -> bool {
        self.shared.established.load(Ordering::Acquire)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    /// Stops both tasks, which cancels their timers and closes the socket. Calling this more
    ///  than once has no effect.
    pub fn close(&self) {
        self.shared.close(None);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl MessageSink for Connection {
    fn push(&self, msg: Message, timeout: Duration) -> bool {
        self.outbound.push(msg, timeout)
    }
}

impl MessageSource for Connection {
    fn pop(&self, timeout: Duration) -> Option<Message> {
        self.inbound.pop(timeout)
    }

    fn is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    fn sub_queue(&self, id: MessageId) -> Arc<Queue> {
        self.inbound.sub_queue(id)
    }
}


async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&closed| closed).await;
}

async fn write_loop(shared: Arc<ConnectionShared>, mut socket: OwnedWriteHalf, outbound: Arc<Queue>, config: Arc<ConnectionConfig>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut header_buf = BytesMut::with_capacity(HEADER_SIZE);

    loop {
        // a closed connection must not take any more messages from the queue
        if !shared.established.load(Ordering::Acquire) {
            return;
        }
        let msg = outbound.pop(Duration::ZERO)
            .unwrap_or_else(Message::heartbeat);

        // nothing is written for a message that can not be framed, so the stream stays in sync
        let header = match MessageHeader::for_message(&msg, config.max_payload_len) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping message for {:?}: {}", shared.peer_addr, e);
                msg.log_at(Level::WARN, "dropped unframeable message");
                continue;
            }
        };
        trace!(id = ?msg.id(), len = msg.payload().len(), "sending frame to {:?}", shared.peer_addr);

        header_buf.clear();
        header.ser(&mut header_buf);

        let written = select! {
            biased;
            _ = closed(&mut shutdown) => return,
            r = write_frame(&mut socket, &header_buf, msg.payload()) => r,
        };
        if let Err(e) = written {
            shared.close(Some(&CommError::Io(e)));
            return;
        }

        if !outbound.is_empty() {
            continue;
        }
        select! {
            biased;
            _ = closed(&mut shutdown) => return,
            _ = outbound.wait_for_arrival() => {}
            _ = time::sleep(config.keep_alive_interval) => {}
        }
    }
}

async fn write_frame(socket: &mut OwnedWriteHalf, header: &[u8], payload: &[u8]) -> std::io::Result<()> {
    socket.write_all(header).await?;
    if !payload.is_empty() {
        socket.write_all(payload).await?;
    }
    Ok(())
}


async fn read_loop(shared: Arc<ConnectionShared>, mut socket: OwnedReadHalf, inbound: Arc<Queue>, config: Arc<ConnectionConfig>) {
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        let frame = select! {
            biased;
            _ = closed(&mut shutdown) => return,
            r = time::timeout(config.watchdog_timeout, read_frame(&mut socket, config.max_payload_len)) => r,
        };

        match frame {
            Ok(Ok(msg)) => {
                trace!(id = ?msg.id(), len = msg.payload().len(), "received frame from {:?}", shared.peer_addr);
                if msg.is_heartbeat() && !config.deliver_heartbeats {
                    continue;
                }
                if inbound.push(msg, Duration::ZERO) {
                    debug!("inbound queue for {:?} is over capacity", shared.peer_addr);
                }
            }
            Ok(Err(e)) => {
                shared.close(Some(&e));
                return;
            }
            Err(_) => {
                shared.close(Some(&CommError::LivenessTimeout(config.watchdog_timeout)));
                return;
            }
        }
    }
}

async fn read_frame(socket: &mut OwnedReadHalf, max_payload_len: u32) -> Result<Message, CommError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    socket.read_exact(&mut header_buf).await?;
    let header = MessageHeader::deser(&mut header_buf.as_slice(), max_payload_len)?;

    let payload = if header.payload_len == 0 {
        Bytes::new()
    }
    else {
        let mut payload = vec![0u8; header.payload_len as usize];
        socket.read_exact(&mut payload).await?;
        Bytes::from(payload)
    };
    Ok(header.into_message(payload))
}
