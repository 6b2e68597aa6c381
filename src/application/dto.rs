use serde::{Deserialize, Serialize};

use crate::domain::{entities::Notification, value_objects::Ack};

/// Send request as posted to the producer, either form-encoded or JSON.
///
/// Ids stay strings here so that a malformed id is reported as a validation
/// failure naming the field instead of a generic body rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationForm {
    #[serde(default)]
    pub from_id: String,
    #[serde(default)]
    pub to_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationResponse {
    pub message: String,
    pub partition: u32,
    pub offset: u64,
}

impl From<Ack> for SendNotificationResponse {
    fn from(ack: Ack) -> Self {
        Self {
            message: "Notification sent successfully!".to_string(),
            partition: ack.partition.value(),
            offset: ack.offset.value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxResponse {
    pub notifications: Vec<Notification>,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: String,
    pub partitions: Vec<u32>,
    pub applied: u64,
    pub skipped: u64,
    pub rebalances: u64,
}
