use log::{debug, error, info};
use std::sync::Arc;

use crate::domain::{
    codec,
    entities::*,
    errors::*,
    repositories::*,
    value_objects::*,
};

/// Use case for publishing a notification from one user to another
pub struct SendNotificationUseCase {
    users: Arc<dyn UserDirectory>,
    producer: Arc<dyn LogProducer>,
    topic: TopicName,
}

impl SendNotificationUseCase {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        producer: Arc<dyn LogProducer>,
        topic: TopicName,
    ) -> Self {
        Self {
            users,
            producer,
            topic,
        }
    }

    /// Resolve both users, then append the notification keyed by recipient.
    ///
    /// Unknown users are rejected before the log is touched. The returned
    /// [`Ack`] means the broker has stored the record.
    pub async fn execute(&self, from_id: UserId, to_id: UserId, message: String) -> Result<Ack> {
        let from = self.resolve(from_id).await?;
        let to = self.resolve(to_id).await?;

        let notification = Notification::new(from, to, message);
        let payload = codec::encode(&notification).map_err(DomainError::Encode)?;
        debug!("Notification payload: {} bytes", payload.len());

        let ack = self
            .producer
            .append(&self.topic, Some(to_id.partition_key()), payload)
            .await
            .map_err(|e| {
                error!("Failed to publish notification {} -> {}: {}", from_id, to_id, e);
                DomainError::Publish(e)
            })?;

        info!(
            "Notification {} -> {} stored at {}:{} offset {}",
            from_id, to_id, ack.topic, ack.partition, ack.offset
        );
        Ok(ack)
    }

    async fn resolve(&self, id: UserId) -> Result<User> {
        self.users.find_by_id(id).await.ok_or(DomainError::UserNotFound(id))
    }
}

/// Use case for reading a recipient's inbox
pub struct QueryInboxUseCase {
    inbox: Arc<dyn InboxRepository>,
}

impl QueryInboxUseCase {
    pub fn new(inbox: Arc<dyn InboxRepository>) -> Self {
        Self { inbox }
    }

    pub fn execute(&self, recipient: UserId) -> Vec<Notification> {
        let notifications = self.inbox.get_all(recipient);
        debug!(
            "Inbox for user {} holds {} notification(s)",
            recipient,
            notifications.len()
        );
        notifications
    }
}
