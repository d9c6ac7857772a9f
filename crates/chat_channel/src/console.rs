use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use async_trait::async_trait;
use tokio::{
    io::{AsyncWriteExt, stdout},
    sync::Mutex,
};
use tracing::trace;

use crate::{
    message::{ChatId, InlineButtonKind, InlineKeyboard, MessageId, OutgoingContent, OutgoingMessage},
    sender::{ChannelError, MessageSender},
};

/// Renders outgoing messages on stdout so a flow can be driven from a terminal.
///
/// Buttons are numbered from 1 in reading order; the keyboard of the most
/// recent message is kept so the caller can map a typed number back to a token.
#[derive(Clone, Default)]
pub struct ConsoleSender {
    last_keyboard: Arc<Mutex<Option<(MessageId, InlineKeyboard)>>>,
    next_id: Arc<AtomicU64>,
}

impl ConsoleSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// The keyboard attached to the last delivered message, if it still has one.
    pub async fn last_keyboard(&self) -> Option<(MessageId, InlineKeyboard)> {
        self.last_keyboard.lock().await.clone()
    }

    fn render(id: &MessageId, msg: &OutgoingMessage) -> String {
        let mut out = String::new();
        match &msg.content {
            OutgoingContent::Text(text) => {
                out.push_str(&format!("bot [{id}]> {}\n", text.trim()));
            }
            OutgoingContent::Photo { image, caption } => {
                out.push_str(&format!("bot [{id}]> [image: {image}]\n"));
                if !caption.is_empty() {
                    out.push_str(&format!("    {caption}\n"));
                }
            }
        }
        if let Some(keyboard) = &msg.keyboard {
            let mut n = 0;
            for row in &keyboard.rows {
                let cells: Vec<String> = row
                    .iter()
                    .map(|button| {
                        n += 1;
                        match &button.kind {
                            InlineButtonKind::Callback(_) => format!("[#{n} {}]", button.text),
                            InlineButtonKind::Url(url) => format!("[#{n} {} -> {url}]", button.text),
                        }
                    })
                    .collect();
                out.push_str(&format!("    {}\n", cells.join(" ")));
            }
        }
        out
    }

    async fn write(&self, text: &str) -> Result<(), ChannelError> {
        let mut out = stdout();
        out.write_all(text.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSender for ConsoleSender {
    async fn send(&self, msg: OutgoingMessage) -> Result<MessageId, ChannelError> {
        let id = MessageId(format!("{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        trace!(chat = %msg.chat, message = %id, "console send");
        self.write(&Self::render(&id, &msg)).await?;
        if let Some(keyboard) = msg.keyboard {
            *self.last_keyboard.lock().await = Some((id.clone(), keyboard));
        }
        Ok(id)
    }

    async fn remove_keyboard(&self, _chat: &ChatId, message: &MessageId) -> Result<(), ChannelError> {
        let mut last = self.last_keyboard.lock().await;
        if last.as_ref().is_some_and(|(id, _)| id == message) {
            *last = None;
        }
        Ok(())
    }

    async fn delete_message(&self, chat: &ChatId, message: &MessageId) -> Result<(), ChannelError> {
        self.remove_keyboard(chat, message).await?;
        self.write(&format!("bot> (message {message} deleted)\n")).await
    }
}
