use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::entities::Record;
use super::errors::DomainError;

/// Identifier of a user, as carried in notifications and inbox lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Parse a user id from request input (decimal, surrounding whitespace ignored)
    pub fn parse(field: &str, raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DomainError::Validation(format!("{} is required", field)));
        }
        raw.parse::<i64>().map(UserId).map_err(|e| {
            DomainError::Validation(format!("failed to parse {} '{}': {}", field, raw, e))
        })
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Partition key under which notifications for this recipient are published
    pub fn partition_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// Represents a topic name with validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicName(pub String);

impl TopicName {
    pub fn new(name: String) -> Result<Self, DomainError> {
        if name.is_empty() {
            return Err(DomainError::InvalidTopicName(
                "Topic name cannot be empty".to_string(),
            ));
        }
        if name.len() > 255 {
            return Err(DomainError::InvalidTopicName(
                "Topic name too long (max 255 characters)".to_string(),
            ));
        }
        if name.contains(char::is_whitespace) {
            return Err(DomainError::InvalidTopicName(
                "Topic name cannot contain whitespace".to_string(),
            ));
        }
        Ok(TopicName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TopicName {
    fn from(name: &str) -> Self {
        TopicName(name.to_string())
    }
}

/// Position of a record within a partition. A committed offset names the
/// next record to read, not the last one applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Offset(pub u64);

impl Offset {
    pub fn new(value: u64) -> Self {
        Offset(value)
    }

    pub fn next(&self) -> Self {
        Offset(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Offset(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        PartitionId(id)
    }
}

/// Represents a topic-partition combination for offset tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: TopicName,
    pub partition: PartitionId,
}

impl TopicPartition {
    pub fn new(topic: TopicName, partition: PartitionId) -> Self {
        Self { topic, partition }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// Name of a consumer group; members sharing it split the topic's partitions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: String) -> Self {
        GroupId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        GroupId(id.to_string())
    }
}

/// Identifier the coordinator hands out to a group member on first join
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    /// Mint a fresh id for a client, e.g. `consumer-1f0c...`
    pub fn generate(client_id: &str) -> Self {
        MemberId(format!("{}-{}", client_id, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId(id.to_string())
    }
}

/// Epoch of a group's partition assignment, bumped on every completed rebalance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub i32);

impl Generation {
    pub fn next(&self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker acknowledgment of a durable append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
}

/// Proof of partition ownership presented with fetches and commits.
/// The coordinator rejects any fence that is not current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupFence {
    pub group: GroupId,
    pub member: MemberId,
    pub generation: Generation,
}

/// The partitions a member owns for one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub member: MemberId,
    pub generation: Generation,
    pub partitions: Vec<PartitionId>,
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub group: GroupId,
    pub topic: TopicName,
    /// `None` on first join; the id from the previous assignment on rejoin
    pub member: Option<MemberId>,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub topic_partition: TopicPartition,
    pub offset: Offset,
    pub max_records: usize,
    /// How long to wait for new records when the partition is caught up
    pub max_wait: Duration,
    pub fence: Option<GroupFence>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub records: Vec<Record>,
    pub high_watermark: Offset,
}
