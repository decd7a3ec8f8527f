pub mod client;
pub mod connection;
pub mod net_config;
pub mod reactor;
pub mod reconnect;
pub mod server;
