//! # Kafka-Notify
//!
//! Point-to-point user notifications carried over a partitioned log.
//!
//! A producer resolves sender and recipient, then appends the notification
//! keyed by recipient id, so every notification for one user lands in one
//! partition in send order. Consumers join a group, split the partitions
//! between them and materialize per-recipient inboxes in memory.
//!
//! ## Architecture
//!
//! The codebase follows Domain-Driven Design principles with clear separation between:
//! - **Domain Layer**: users, notifications, the record codec, the partition
//!   log model and the consumer-group state machine
//! - **Application Layer**: the send and inbox use cases and the group member runtime
//! - **Infrastructure Layer**: the in-memory log, its TCP broker and client,
//!   the inbox store and the HTTP surfaces
//!
//! ## Usage
//!
//! ```rust
//! use kafka_notify::application::{QueryInboxUseCase, SendNotificationUseCase};
//! use kafka_notify::domain::group::GroupTimeouts;
//! use kafka_notify::domain::value_objects::{TopicName, UserId};
//! use kafka_notify::infrastructure::{InMemoryInboxRepository, InMemoryLog, InMemoryUserDirectory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = Arc::new(InMemoryLog::new(4, GroupTimeouts::default()));
//!     let users = Arc::new(InMemoryUserDirectory::with_default_users());
//!     let send = SendNotificationUseCase::new(users, log, TopicName::from("notifications"));
//!
//!     let ack = send.execute(UserId(1), UserId(2), "hi".to_string()).await?;
//!     println!("Stored in partition {} at offset {}", ack.partition, ack.offset);
//!
//!     // Nothing consumed yet, so the inbox is empty rather than missing
//!     let inbox = QueryInboxUseCase::new(Arc::new(InMemoryInboxRepository::new()));
//!     assert!(inbox.execute(UserId(2)).is_empty());
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use application::{GroupMember, MemberState, QueryInboxUseCase, SendNotificationUseCase};
pub use config::{BrokerSettings, ConsumerSettings, OffsetReset, ProducerSettings};
pub use domain::entities::{Notification, User};
pub use domain::errors::{DomainError, LogError};
pub use domain::value_objects::{TopicName, UserId};
pub use infrastructure::{BrokerServer, InMemoryInboxRepository, InMemoryLog, RemoteLog};
