//! JSON record codec for notifications.
//!
//! The payload shape is `{"from":{"id","name"},"to":{"id","name"},"message"}`.

use super::entities::Notification;
use super::errors::CodecError;

pub fn encode(notification: &Notification) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(notification)?)
}

pub fn decode(payload: &[u8]) -> Result<Notification, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}
