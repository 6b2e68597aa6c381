//! Runtime settings for the three processes.
//!
//! The binary fills these from its command line; tests construct them
//! directly and shorten the timeouts.

use std::time::Duration;

use crate::domain::group::GroupTimeouts;
use crate::domain::value_objects::{GroupId, TopicName};

pub const DEFAULT_BROKER_ADDRESS: &str = "127.0.0.1:9092";
pub const DEFAULT_TOPIC: &str = "notifications";
pub const DEFAULT_GROUP: &str = "notifications-group";
pub const DEFAULT_PRODUCER_PORT: u16 = 8081;
pub const DEFAULT_CONSUMER_PORT: u16 = 8082;
pub const DEFAULT_PARTITIONS: u32 = 4;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub listen: String,
    pub partitions: u32,
    pub timeouts: GroupTimeouts,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_BROKER_ADDRESS.to_string(),
            partitions: DEFAULT_PARTITIONS,
            timeouts: GroupTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub broker: String,
    pub topic: TopicName,
    pub port: u16,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER_ADDRESS.to_string(),
            topic: TopicName::from(DEFAULT_TOPIC),
            port: DEFAULT_PRODUCER_PORT,
        }
    }
}

/// Where a member starts reading a partition its group has never committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OffsetReset {
    /// Replay the partition from its first record
    Earliest,
    /// Only records appended after the assignment
    Latest,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub broker: String,
    pub topic: TopicName,
    pub group: GroupId,
    pub client_id: String,
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub fetch_max_wait: Duration,
    pub fetch_max_records: usize,
    pub offset_reset: OffsetReset,
    /// Consecutive failed heartbeats tolerated before the member gives up
    pub max_heartbeat_failures: u32,
    /// Consecutive failed joins tolerated before the member gives up
    pub max_join_failures: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER_ADDRESS.to_string(),
            topic: TopicName::from(DEFAULT_TOPIC),
            group: GroupId::from(DEFAULT_GROUP),
            client_id: "notifications-consumer".to_string(),
            port: DEFAULT_CONSUMER_PORT,
            heartbeat_interval: Duration::from_secs(1),
            fetch_max_wait: Duration::from_millis(500),
            fetch_max_records: 100,
            offset_reset: OffsetReset::Earliest,
            max_heartbeat_failures: 5,
            max_join_failures: 5,
        }
    }
}
