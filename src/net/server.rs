use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time;
use tracing::{debug, error, info, trace};

use crate::endpoint::{MessageSink, MessageSource};
use crate::message::{Message, MessageId};
use crate::net::connection::Connection;
use crate::net::net_config::{ConnectionConfig, ServerConfig};
use crate::net::reactor::Reactor;
use crate::queue::{Queue, QueueConfig};


const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

type ConnectionList = Arc<Mutex<Vec<Connection>>>;

fn lock_connections(connections: &Mutex<Vec<Connection>>) -> MutexGuard<'_, Vec<Connection>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}


/// A fan-out broker: every pushed message goes to all currently connected peers, and everything
///  the peers send is merged into one inbound queue.
///
/// Each peer connection has its own outbound queue, so a slow peer only evicts its own backlog.
///  Messages for peers that went away are dropped silently.
pub struct Server {
    // dropped first, so the accept loop and all connection I/O stop before anything else
    reactor: Reactor,
    local_addr: SocketAddr,
    inbound: Arc<Queue>,
    connections: ConnectionList,
}

impl Server {
    pub fn bind(config: ServerConfig) -> anyhow::Result<Server> {
        config.validate()?;

        let reactor = Reactor::start("comm-server")?;

        let std_listener = std::net::TcpListener::bind(config.bind_addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;
        let listener = {
            let _guard = reactor.handle().enter();
            TcpListener::from_std(std_listener)?
        };
        info!("server listening on {:?}", local_addr);

        let inbound = Arc::new(Queue::new(config.queue.clone()));
        let connections: ConnectionList = Default::default();

        reactor.handle().spawn(accept_loop(
            listener,
            connections.clone(),
            inbound.clone(),
            Arc::new(config.connection),
            config.queue,
        ));

        Ok(Server {
            reactor,
            local_addr,
            inbound,
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn num_connections(&self) -> usize {
        lock_connections(&self.connections).iter()
            .filter(|c| c.is_established())
            .count()
    }

    /// Broadcasts to all established connections. The timeout is ignored: each connection's
    ///  outbound queue accepts the message without waiting, evicting if necessary. The broadcast
    ///  itself happens asynchronously on the reactor, and the return value is always `false`.
    pub fn push(&self, msg: Message, _timeout: Duration) -> bool {
        trace!(id = ?msg.id(), "server: broadcasting");
        let connections = self.connections.clone();
        self.reactor.handle().spawn(async move {
            for connection in lock_connections(&connections).iter() {
                if connection.is_established() {
                    connection.push(msg.clone(), Duration::ZERO);
                }
            }
        });
        false
    }

    pub fn pop(&self, timeout: Duration) -> Option<Message> {
        self.inbound.pop(timeout)
    }

    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    pub fn sub_queue(&self, id: impl Into<MessageId>) -> Arc<Queue> {
        self.inbound.sub_queue(id)
    }
}

impl MessageSink for Server {
    fn push(&self, msg: Message, timeout: Duration) -> bool {
        Server::push(self, msg, timeout)
    }
}

impl MessageSource for Server {
    fn pop(&self, timeout: Duration) -> Option<Message> {
        Server::pop(self, timeout)
    }

    fn is_empty(&self) -> bool {
        Server::is_empty(self)
    }

    fn sub_queue(&self, id: MessageId) -> Arc<Queue> {
        Server::sub_queue(self, id)
    }
}


async fn accept_loop(listener: TcpListener, connections: ConnectionList, inbound: Arc<Queue>, config: Arc<ConnectionConfig>, queue_config: QueueConfig) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // e.g. out of file descriptors, which does not go away immediately
                error!("error accepting connection: {}", e);
                time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };
        debug!("accepted connection from {:?}", peer_addr);

        let outbound = Arc::new(Queue::new(queue_config.clone()));
        let connection = match Connection::spawn(stream, outbound, inbound.clone(), config.clone()) {
            Ok(connection) => connection,
            Err(e) => {
                error!("could not set up connection from {:?}: {}", peer_addr, e);
                continue;
            }
        };

        let mut list = lock_connections(&connections);
        list.retain(|c| c.is_established());
        list.push(connection);
    }
}


#[cfg(test)]
mod tests {
    use std::net::TcpStream;
    use std::thread;
    use std::time::Instant;
    use std::io::{Read, Write};
    use bytes::Bytes;

    use crate::message_header::{decode_frame, encode_frame, HEADER_SIZE};
    use crate::net::client::Client;
    use crate::net::net_config::ClientConfig;
    use super::*;

    fn fast_connection_config() -> ConnectionConfig {
        ConnectionConfig {
            keep_alive_interval: Duration::from_millis(10),
            watchdog_timeout: Duration::from_millis(200),
            ..ConnectionConfig::new()
        }
    }

    fn test_server() -> Server {
        test_server_with(fast_connection_config())
    }

    fn test_server_with(connection: ConnectionConfig) -> Server {
        let mut config = ServerConfig::new(0);
        config.bind_addr = "127.0.0.1:0".parse().unwrap();
        config.connection = connection;
        Server::bind(config).unwrap()
    }

    fn test_client(server: &Server) -> Client {
        let mut config = ClientConfig::new();
        config.connection = fast_connection_config();
        config.reconnect_grace_period = Duration::from_millis(50);
        Client::connect("127.0.0.1", server.local_addr().port(), config).unwrap()
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_broadcast_reaches_all_connected_clients() {
        let server = test_server();
        let clients = (0..3).map(|_| test_client(&server)).collect::<Vec<_>>();
        let departed = test_client(&server);

        assert!(wait_until(Duration::from_secs(5), || clients.iter().all(|c| c.is_connected()) && departed.is_connected()));
        assert!(wait_until(Duration::from_secs(5), || server.num_connections() == 4));

        drop(departed);
        assert!(wait_until(Duration::from_secs(5), || server.num_connections() == 3));

        server.push(Message::new("news", b"extra".as_slice()), Duration::ZERO);

        for client in &clients {
            let received = client.pop(Duration::from_secs(5)).expect("broadcast not received");
            assert_eq!(received.id(), MessageId::new("news"));
            assert_eq!(received.payload().as_ref(), b"extra");
        }
    }

    #[test]
    fn test_inbound_traffic_is_merged() {
        let server = test_server();
        let a = test_client(&server);
        let b = test_client(&server);

        a.push(Message::new("from-a", Bytes::new()), Duration::ZERO);
        b.push(Message::new("from-b", Bytes::new()), Duration::ZERO);

        let mut received = vec![
            server.pop(Duration::from_secs(5)).unwrap().id().as_string(),
            server.pop(Duration::from_secs(5)).unwrap().id().as_string(),
        ];
        received.sort();
        assert_eq!(received, vec!["from-a", "from-b"]);
    }

    #[test]
    fn test_raw_peer_receives_frames() {
        let server = test_server_with(ConnectionConfig {
            watchdog_timeout: Duration::from_secs(10),
            ..fast_connection_config()
        });
        let mut peer = TcpStream::connect(server.local_addr()).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        assert!(wait_until(Duration::from_secs(5), || server.num_connections() == 1));

        peer.write_all(&encode_frame(&Message::new("hello", b"server".as_slice())).unwrap()).unwrap();
        let received = server.pop(Duration::from_secs(5)).unwrap();
        assert_eq!(received.payload().as_ref(), b"server");

        server.push(Message::new("reply", b"peer".as_slice()), Duration::ZERO);

        // heartbeats may arrive before the reply
        loop {
            let mut header = [0u8; HEADER_SIZE];
            peer.read_exact(&mut header).unwrap();
            let payload_len = u32::from_le_bytes(header[32..36].try_into().unwrap()) as usize;
            let mut frame = header.to_vec();
            frame.resize(HEADER_SIZE + payload_len, 0);
            peer.read_exact(&mut frame[HEADER_SIZE..]).unwrap();

            let (msg, _) = decode_frame(&frame, u32::MAX).unwrap();
            if !msg.is_heartbeat() {
                assert_eq!(msg.id(), MessageId::new("reply"));
                assert_eq!(msg.payload().as_ref(), b"peer");
                break;
            }
        }
    }

    #[test]
    fn test_silent_peer_is_pruned() {
        let server = test_server();
        let _silent = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || server.num_connections() == 1));
        assert!(wait_until(Duration::from_secs(5), || server.num_connections() == 0));

        // closed connections are only removed from the list on the next accept
        assert_eq!(lock_connections(&server.connections).len(), 1);

        let client = test_client(&server);
        assert!(wait_until(Duration::from_secs(5), || client.is_connected() && server.num_connections() == 1));
        let list = lock_connections(&server.connections);
        assert_eq!(list.len(), 1);
        assert!(list[0].is_established());
    }
}
