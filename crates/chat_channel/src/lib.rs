pub mod console;
pub mod message;
pub mod sender;

#[cfg(feature = "test-utils")]
pub mod mock;

pub use console::ConsoleSender;
pub use message::{
    ChatId, ImageRef, InlineButton, InlineButtonKind, InlineKeyboard, MessageId, OutgoingContent,
    OutgoingMessage, TextFormat, UserId,
};
pub use sender::{ChannelError, MessageSender, Sender};

#[cfg(feature = "test-utils")]
pub use mock::{RecordingSender, SenderOp};
