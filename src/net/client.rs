use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::endpoint::{MessageSink, MessageSource};
use crate::error::CommError;
use crate::message::{Message, MessageId};
use crate::net::connection::Connection;
use crate::net::net_config::ClientConfig;
use crate::net::reactor::Reactor;
use crate::net::reconnect::{AccessAction, ReconnectState, Reconnector};
use crate::queue::Queue;


struct Link {
    reconnector: Reconnector,
    connection: Option<Connection>,
}

struct ClientShared {
    host: String,
    port: u16,
    config: ClientConfig,
    outbound: Arc<Queue>,
    inbound: Arc<Queue>,
    link: Mutex<Link>,
}

impl ClientShared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}


/// A client connection to a [crate::net::server::Server] (or any peer speaking the same
///  framing) that reconnects on demand.
///
/// The outbound and inbound queues belong to the client and survive reconnects: messages pushed
///  while disconnected are buffered (subject to the queue's capacity) and sent once a new
///  connection is up. Messages the peer sent while the connection was down are lost.
///
/// Reconnecting is lazy. Every access (push, pop, `is_connected`, ...) checks the connection and
///  may start a resolve + connect attempt in the background. After a failed attempt or a lost
///  connection, there is a grace period before the next attempt.
pub struct Client {
    // dropped first to stop all I/O before the queues go away
    reactor: Reactor,
    shared: Arc<ClientShared>,
}

impl Client {
    pub fn connect(host: &str, port: u16, config: ClientConfig) -> anyhow::Result<Client> {
        config.validate()?;

        let reactor = Reactor::start("comm-client")?;
        let shared = Arc::new(ClientShared {
            host: host.to_string(),
            port,
            outbound: Arc::new(Queue::new(config.queue.clone())),
            inbound: Arc::new(Queue::new(config.queue.clone())),
            link: Mutex::new(Link {
                reconnector: Reconnector::new(config.reconnect_grace_period),
                connection: None,
            }),
            config,
        });

        let client = Client {
            reactor,
            shared,
        };
        client.ensure_connected();
        Ok(client)
    }

    fn ensure_connected(&self) {
        let now = Instant::now();
        let mut link = self.shared.link();

        if link.connection.as_ref().is_some_and(|c| !c.is_established()) {
            debug!("connection to {} was lost", self.shared.target());
            link.connection = None;
            link.reconnector.on_connection_lost(now);
        }

        if link.reconnector.on_access(now) == AccessAction::StartAttempt {
            self.reactor.handle().spawn(resolve_and_connect(self.shared.clone()));
        }
    }

    /// Triggers the reconnect check, and reports whether there is currently a live connection
    pub fn is_connected(&self) -> bool {
        self.ensure_connected();
        let link = self.shared.link();
        link.connection.as_ref().is_some_and(|c| c.is_established())
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.shared.link().reconnector.state()
    }

    pub fn push(&self, msg: Message, timeout: Duration) -> bool {
        self.ensure_connected();
        self.shared.outbound.push(msg, timeout)
    }

    pub fn pop(&self, timeout: Duration) -> Option<Message> {
        self.ensure_connected();
        self.shared.inbound.pop(timeout)
    }

    pub fn is_empty(&self) -> bool {
        self.ensure_connected();
        self.shared.inbound.is_empty()
    }

    pub fn sub_queue(&self, id: impl Into<MessageId>) -> Arc<Queue> {
        self.ensure_connected();
        self.shared.inbound.sub_queue(id)
    }
}

impl MessageSink for Client {
    fn push(&self, msg: Message, timeout: Duration) -> bool {
        Client::push(self, msg, timeout)
    }
}

impl MessageSource for Client {
    fn pop(&self, timeout: Duration) -> Option<Message> {
        Client::pop(self, timeout)
    }

    fn is_empty(&self) -> bool {
        Client::is_empty(self)
    }

    fn sub_queue(&self, id: MessageId) -> Arc<Queue> {
        Client::sub_queue(self, id)
    }
}


async fn resolve_and_connect(shared: Arc<ClientShared>) {
    let addrs = match lookup_host((shared.host.as_str(), shared.port)).await {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(e) => {
            fail_attempt(&shared, e.to_string());
            return;
        }
    };
    if addrs.is_empty() {
        fail_attempt(&shared, "no addresses".to_string());
        return;
    }
    debug!("resolved {} to {:?}", shared.target(), addrs);
    shared.link().reconnector.on_resolved();

    let stream = match connect_any(&addrs).await {
        Ok(stream) => stream,
        Err(e) => {
            fail_attempt(&shared, e.to_string());
            return;
        }
    };

    let connection = match Connection::spawn(stream, shared.outbound.clone(), shared.inbound.clone(), Arc::new(shared.config.connection.clone())) {
        Ok(connection) => connection,
        Err(e) => {
            fail_attempt(&shared, e.to_string());
            return;
        }
    };

    info!("connected to {}", shared.target());
    let mut link = shared.link();
    link.connection = Some(connection);
    link.reconnector.on_connected();
}

async fn connect_any(addrs: &[SocketAddr]) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("could not connect to {:?}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses to connect to")))
}

fn fail_attempt(shared: &ClientShared, reason: String) {
    let error = CommError::ResolveOrConnect { target: shared.target(), reason };
    warn!("{}", error);
    shared.link().reconnector.on_attempt_failed(Instant::now());
}
