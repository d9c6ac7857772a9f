use std::sync::Arc;
use async_trait::async_trait;
use thiserror::Error;

use crate::message::{ChatId, MessageId, OutgoingMessage};

pub type Sender = Arc<dyn MessageSender>;

/// Errors a transport can return when delivering or editing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The platform refused the message (bad markup, blocked bot, ...).
    #[error("message rejected: {0}")]
    Rejected(String),

    /// A timeout occurred.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// The transport is not connected or not running.
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("channel error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> ChannelError {
        ChannelError::Rejected(err.to_string())
    }
}

impl From<anyhow::Error> for ChannelError {
    fn from(err: anyhow::Error) -> ChannelError {
        ChannelError::Other(err.to_string())
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> ChannelError {
        ChannelError::Unavailable(err.to_string())
    }
}

/// The send primitive a chat platform integration provides.
///
/// Retries and timeouts belong to the implementation; callers treat every
/// call as a single blocking attempt.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, msg: OutgoingMessage) -> Result<MessageId, ChannelError>;

    /// Strip the inline keyboard from an already delivered message.
    async fn remove_keyboard(&self, chat: &ChatId, message: &MessageId) -> Result<(), ChannelError>;

    async fn delete_message(&self, chat: &ChatId, message: &MessageId) -> Result<(), ChannelError>;
}
