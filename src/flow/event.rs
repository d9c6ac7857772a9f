use std::collections::HashMap;
use chat_channel::{ChatId, MessageId, UserId};

use crate::state::StateValue;

/// A button press as the transport reports it: the token is still opaque.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ButtonClick {
    pub token: String,
    pub text: String,
    /// Message the keyboard was attached to, when the platform tells us.
    pub message: Option<MessageId>,
    pub metadata: HashMap<String, StateValue>,
}

impl ButtonClick {
    pub fn new(token: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn on_message(mut self, message: MessageId) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One inbound user event for `FlowManager::advance`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InboundEvent {
    pub user: UserId,
    pub chat: ChatId,
    /// Raw text; empty when the event is a button press.
    pub text: String,
    pub button: Option<ButtonClick>,
    /// Transient per-request data, never stored in the session.
    pub data: HashMap<String, StateValue>,
}

impl InboundEvent {
    pub fn text(user: impl Into<UserId>, chat: impl Into<ChatId>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            chat: chat.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn button(user: impl Into<UserId>, chat: impl Into<ChatId>, click: ButtonClick) -> Self {
        Self {
            user: user.into(),
            chat: chat.into(),
            button: Some(click),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A resolved button press: `payload` is what the application attached to the button.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonClickEvent {
    pub payload: StateValue,
    pub text: String,
    pub user: UserId,
    pub chat: ChatId,
    pub message: Option<MessageId>,
    pub metadata: HashMap<String, StateValue>,
}

/// What step logic gets to decide on.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInput {
    pub text: String,
    pub button: Option<ButtonClickEvent>,
}

impl StepInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), button: None }
    }

    /// Button payload as a string, when it is one.
    pub fn button_str(&self) -> Option<&str> {
        self.button.as_ref().and_then(|b| b.payload.as_str())
    }

    pub fn is_button(&self) -> bool {
        self.button.is_some()
    }
}
