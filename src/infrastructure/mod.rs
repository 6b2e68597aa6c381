pub mod backoff;
pub mod client;
pub mod http;
pub mod log;
pub mod persistence;
pub mod protocol;
pub mod server;

pub use backoff::Backoff;
pub use client::RemoteLog;
pub use self::log::InMemoryLog;
pub use persistence::*;
pub use server::BrokerServer;
