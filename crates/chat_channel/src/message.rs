use std::{fmt, path::PathBuf};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Platform identity of the person talking to the bot.
    UserId
);
string_id!(
    /// The conversation a message is delivered to (a private chat, a group, ...).
    ChatId
);
string_id!(
    /// Identifier the platform hands back for a delivered message.
    MessageId
);

/// How the text of an outgoing message should be interpreted by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
    Markdown,
}

/// Where the bytes of an image come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageRef {
    Url(#[schemars(with = "String")] Url),
    Path(PathBuf),
    /// An id the platform already knows (a previously uploaded file).
    FileId(String),
    Bytes { file_name: String, data: Vec<u8> },
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Url(url) => write!(f, "{url}"),
            ImageRef::Path(path) => write!(f, "{}", path.display()),
            ImageRef::FileId(id) => write!(f, "file:{id}"),
            ImageRef::Bytes { file_name, data } => write!(f, "{file_name} ({} bytes)", data.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InlineButtonKind {
    /// Opaque token the platform echoes back when the button is pressed.
    Callback(String),
    Url(#[schemars(with = "String")] Url),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InlineButton {
    pub text: String,
    pub kind: InlineButtonKind,
}

impl InlineButton {
    pub fn callback_token(&self) -> Option<&str> {
        match &self.kind {
            InlineButtonKind::Callback(token) => Some(token),
            InlineButtonKind::Url(_) => None,
        }
    }
}

/// Interactive markup attached below a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn button_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.button_count() == 0
    }

    /// Buttons in reading order, row by row.
    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingContent {
    Text(String),
    Photo { image: ImageRef, caption: String },
}

/// Exactly one unit the transport delivers to a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutgoingMessage {
    pub chat: ChatId,
    pub content: OutgoingContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<InlineKeyboard>,
    #[serde(default)]
    pub format: TextFormat,
}

impl OutgoingMessage {
    pub fn text(chat: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat,
            content: OutgoingContent::Text(text.into()),
            keyboard: None,
            format: TextFormat::Plain,
        }
    }

    pub fn photo(chat: ChatId, image: ImageRef, caption: impl Into<String>) -> Self {
        Self {
            chat,
            content: OutgoingContent::Photo { image, caption: caption.into() },
            keyboard: None,
            format: TextFormat::Plain,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Option<InlineKeyboard>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    /// The text a user reads: the body of a text message or the caption of a photo.
    pub fn visible_text(&self) -> &str {
        match &self.content {
            OutgoingContent::Text(text) => text,
            OutgoingContent::Photo { caption, .. } => caption,
        }
    }

    pub fn image(&self) -> Option<&ImageRef> {
        match &self.content {
            OutgoingContent::Photo { image, .. } => Some(image),
            OutgoingContent::Text(_) => None,
        }
    }
}
