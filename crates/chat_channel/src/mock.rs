use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    message::{ChatId, MessageId, OutgoingMessage},
    sender::{ChannelError, MessageSender},
};

/// Edits a `RecordingSender` was asked to perform on delivered messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderOp {
    RemoveKeyboard(ChatId, MessageId),
    Delete(ChatId, MessageId),
}

/// In-memory sender that records everything it is asked to deliver.
#[derive(Clone, Default)]
pub struct RecordingSender {
    outgoing: Arc<Mutex<Vec<OutgoingMessage>>>,
    ops: Arc<Mutex<Vec<SenderOp>>>,
    failing: Arc<AtomicBool>,
    failing_edits: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `send` fails with `ChannelError::Unavailable`.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// While set, `remove_keyboard` and `delete_message` fail without recording anything.
    pub fn fail_edits(&self, failing: bool) {
        self.failing_edits.store(failing, Ordering::SeqCst);
    }

    pub async fn sent_messages(&self) -> Vec<OutgoingMessage> {
        self.outgoing.lock().await.clone()
    }

    pub async fn last_message(&self) -> Option<OutgoingMessage> {
        self.outgoing.lock().await.last().cloned()
    }

    pub async fn ops(&self) -> Vec<SenderOp> {
        self.ops.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.outgoing.lock().await.clear();
        self.ops.lock().await.clear();
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, msg: OutgoingMessage) -> Result<MessageId, ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("recording sender set to fail".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.outgoing.lock().await.push(msg);
        Ok(MessageId(format!("m{id}")))
    }

    async fn remove_keyboard(&self, chat: &ChatId, message: &MessageId) -> Result<(), ChannelError> {
        if self.failing_edits.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected(format!("cannot edit message {message}")));
        }
        self.ops.lock().await.push(SenderOp::RemoveKeyboard(chat.clone(), message.clone()));
        Ok(())
    }

    async fn delete_message(&self, chat: &ChatId, message: &MessageId) -> Result<(), ChannelError> {
        if self.failing_edits.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected(format!("cannot delete message {message}")));
        }
        self.ops.lock().await.push(SenderOp::Delete(chat.clone(), message.clone()));
        Ok(())
    }
}
