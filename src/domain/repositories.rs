use async_trait::async_trait;

use super::{
    entities::*,
    errors::LogError,
    value_objects::*,
};

/// Repository for committed consumer group offsets
#[async_trait]
pub trait OffsetRepository: Send + Sync {
    async fn save_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), LogError>;

    async fn load_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, LogError>;
}

/// Static source of known users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Option<User>;
}

/// Per-recipient notification inboxes.
///
/// Implementations must make `append` atomic with respect to `get_all`: a
/// reader sees a recipient's sequence either with or without a given
/// notification, never a partial one.
pub trait InboxRepository: Send + Sync {
    fn append(&self, recipient: UserId, notification: Notification);

    /// A snapshot of the recipient's notifications in arrival order; empty
    /// for a recipient that has none.
    fn get_all(&self, recipient: UserId) -> Vec<Notification>;
}

/// Producing side of the log substrate
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Append a record and wait for the broker's acknowledgment
    async fn append(
        &self,
        topic: &TopicName,
        key: Option<String>,
        value: Vec<u8>,
    ) -> Result<Ack, LogError>;
}

/// Consuming side of the log substrate: group membership, fetch and offsets
#[async_trait]
pub trait GroupLog: Send + Sync {
    /// Join (or rejoin) a group and wait for this member's assignment
    async fn join_group(&self, request: JoinRequest) -> Result<Assignment, LogError>;

    async fn heartbeat(&self, fence: &GroupFence) -> Result<(), LogError>;

    async fn leave_group(&self, group: &GroupId, member: &MemberId) -> Result<(), LogError>;

    async fn fetch(&self, request: FetchRequest) -> Result<FetchedBatch, LogError>;

    async fn commit_offset(
        &self,
        fence: &GroupFence,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), LogError>;

    async fn committed_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, LogError>;

    /// Offset the next appended record will receive
    async fn end_offset(&self, topic_partition: &TopicPartition) -> Result<Offset, LogError>;
}
