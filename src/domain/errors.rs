use thiserror::Error;

use super::value_objects::*;

pub type Result<T> = std::result::Result<T, DomainError>;

/// Failures surfaced by the notification pipeline
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("failed to publish notification: {0}")]
    Publish(#[source] LogError),

    #[error("malformed record at {topic_partition} offset {offset}: {source}")]
    Decode {
        topic_partition: TopicPartition,
        offset: Offset,
        #[source]
        source: CodecError,
    },

    #[error("failed to encode notification: {0}")]
    Encode(#[source] CodecError),

    #[error("group coordination failed: {0}")]
    Coordination(#[source] LogError),

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),
}

/// Failures reported by the log substrate. Each variant has a stable wire
/// code so the broker protocol can carry it to remote clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("offset {0} is out of range")]
    OffsetOutOfRange(u64),

    #[error("topic '{0}' not found")]
    UnknownTopic(String),

    #[error("record of {0} bytes exceeds the size limit")]
    RecordTooLarge(usize),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("request timed out")]
    Timeout,

    #[error("partition {0} is not assigned to this member")]
    NotAssigned(String),

    #[error("generation {0} is not current")]
    IllegalGeneration(i32),

    #[error("member '{0}' is not known to the group")]
    UnknownMember(String),

    #[error("group is rebalancing")]
    RebalanceInProgress,

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LogError {
    pub fn code(&self) -> i16 {
        match self {
            LogError::OffsetOutOfRange(_) => 1,
            LogError::UnknownTopic(_) => 3,
            LogError::RecordTooLarge(_) => 10,
            LogError::Storage(_) => 5,
            LogError::Timeout => 7,
            LogError::NotAssigned(_) => 16,
            LogError::IllegalGeneration(_) => 22,
            LogError::UnknownMember(_) => 25,
            LogError::RebalanceInProgress => 27,
            LogError::Unavailable(_) => 35,
            LogError::Protocol(_) => 42,
        }
    }

    /// Payload carried next to the code on the wire
    pub fn detail(&self) -> String {
        match self {
            LogError::OffsetOutOfRange(offset) => offset.to_string(),
            LogError::RecordTooLarge(size) => size.to_string(),
            LogError::IllegalGeneration(generation) => generation.to_string(),
            LogError::UnknownTopic(s)
            | LogError::Storage(s)
            | LogError::NotAssigned(s)
            | LogError::UnknownMember(s)
            | LogError::Unavailable(s)
            | LogError::Protocol(s) => s.clone(),
            LogError::Timeout | LogError::RebalanceInProgress => String::new(),
        }
    }

    pub fn from_wire(code: i16, detail: String) -> Self {
        match code {
            1 => LogError::OffsetOutOfRange(detail.parse().unwrap_or_default()),
            3 => LogError::UnknownTopic(detail),
            10 => LogError::RecordTooLarge(detail.parse().unwrap_or_default()),
            5 => LogError::Storage(detail),
            7 => LogError::Timeout,
            16 => LogError::NotAssigned(detail),
            22 => LogError::IllegalGeneration(detail.parse().unwrap_or_default()),
            25 => LogError::UnknownMember(detail),
            27 => LogError::RebalanceInProgress,
            35 => LogError::Unavailable(detail),
            other => LogError::Protocol(format!("error code {}: {}", other, detail)),
        }
    }

    /// The caller no longer owns what it asked about and must rejoin its group
    pub fn is_fencing(&self) -> bool {
        matches!(
            self,
            LogError::RebalanceInProgress
                | LogError::IllegalGeneration(_)
                | LogError::UnknownMember(_)
                | LogError::NotAssigned(_)
        )
    }
}

/// A payload that does not hold a well-formed notification
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid notification payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record has no payload")]
    Empty,
}
