use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{
    entities::{Notification, User},
    errors::LogError,
    repositories::*,
    value_objects::*,
};

/// In-memory implementation of the OffsetRepository
pub struct InMemoryOffsetRepository {
    offsets: Arc<DashMap<(GroupId, TopicPartition), Offset>>,
}

impl InMemoryOffsetRepository {
    pub fn new() -> Self {
        Self {
            offsets: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryOffsetRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OffsetRepository for InMemoryOffsetRepository {
    async fn save_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), LogError> {
        let key = (group.clone(), topic_partition.clone());
        self.offsets.insert(key, offset);
        Ok(())
    }

    async fn load_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, LogError> {
        let key = (group.clone(), topic_partition.clone());
        Ok(self.offsets.get(&key).map(|entry| *entry.value()))
    }
}

/// User directory loaded once at startup and never modified
pub struct InMemoryUserDirectory {
    users: HashMap<UserId, User>,
}

impl InMemoryUserDirectory {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    /// The demo users every deployment starts with
    pub fn with_default_users() -> Self {
        Self::new([
            User::new(1, "Emma"),
            User::new(2, "Bruno"),
            User::new(3, "Rick"),
            User::new(4, "Lena"),
        ])
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Option<User> {
        self.users.get(&id).cloned()
    }
}

/// Volatile inbox store sharded by recipient.
///
/// Each recipient's sequence lives in one `DashMap` shard; `append` holds
/// that shard's write lock only for the push, `get_all` holds its read lock
/// only for the clone. Recipients in other shards are never blocked, and a
/// reader can never observe a half-pushed entry.
pub struct InMemoryInboxRepository {
    inboxes: DashMap<UserId, Vec<Notification>>,
}

impl InMemoryInboxRepository {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
        }
    }

    /// Number of recipients with at least one notification
    pub fn recipient_count(&self) -> usize {
        self.inboxes.len()
    }
}

impl Default for InMemoryInboxRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InboxRepository for InMemoryInboxRepository {
    fn append(&self, recipient: UserId, notification: Notification) {
        self.inboxes.entry(recipient).or_default().push(notification);
    }

    fn get_all(&self, recipient: UserId) -> Vec<Notification> {
        self.inboxes
            .get(&recipient)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}
