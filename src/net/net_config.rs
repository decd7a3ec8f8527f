use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::bail;

use crate::queue::QueueConfig;


pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// A frame is sent at least this often - a heartbeat if there is nothing else to send
    pub keep_alive_interval: Duration,
    /// The connection is closed if no complete frame arrives within this time. This should be
    ///  several keep-alive intervals to tolerate jitter.
    pub watchdog_timeout: Duration,
    /// Headers declaring a bigger payload are treated as corrupt
    pub max_payload_len: u32,
    /// Heartbeats are dropped by the receiver unless this is set
    pub deliver_heartbeats: bool,
}

impl ConnectionConfig {
    pub fn new() -> ConnectionConfig {
        ConnectionConfig {
            keep_alive_interval: Duration::from_millis(100),
            watchdog_timeout: Duration::from_millis(500),
            max_payload_len: 256*1024*1024,
            deliver_heartbeats: false,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keep_alive_interval.is_zero() {
            bail!("keep-alive interval must not be zero");
        }
        if self.watchdog_timeout <= self.keep_alive_interval {
            bail!("watchdog timeout ({:?}) must be longer than the keep-alive interval ({:?})", self.watchdog_timeout, self.keep_alive_interval);
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::new()
    }
}


#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub connection: ConnectionConfig,
    /// configuration of the shared inbound queue and of each connection's outbound queue
    pub queue: QueueConfig,
}

impl ServerConfig {
    pub fn new(port: u16) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            connection: ConnectionConfig::new(),
            queue: QueueConfig::new(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.connection.validate()?;
        self.queue.validate()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::new(DEFAULT_PORT)
    }
}


#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub queue: QueueConfig,
    /// minimum time between losing a connection (or failing to establish one) and the next
    ///  attempt
    pub reconnect_grace_period: Duration,
}

impl ClientConfig {
    pub fn new() -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig::new(),
            queue: QueueConfig::new(),
            reconnect_grace_period: Duration::from_millis(300),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.connection.validate()?;
        self.queue.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new()
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::defaults(100, 500, true)]
    #[case::equal(100, 100, false)]
    #[case::watchdog_too_short(100, 50, false)]
    #[case::zero_keep_alive(0, 50, false)]
    fn test_connection_config_validation(#[case] keep_alive_millis: u64, #[case] watchdog_millis: u64, #[case] valid: bool) {
        let config = ConnectionConfig {
            keep_alive_interval: Duration::from_millis(keep_alive_millis),
            watchdog_timeout: Duration::from_millis(watchdog_millis),
            ..ConnectionConfig::new()
        };
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_defaults() {
        assert!(ServerConfig::default().validate().is_ok());
        assert!(ClientConfig::default().validate().is_ok());
        assert_eq!(ServerConfig::default().bind_addr.port(), DEFAULT_PORT);
    }
}
