use std::{fmt, sync::Arc};
use chat_channel::{
    ChannelError, ImageRef, InlineButton, InlineButtonKind, InlineKeyboard, MessageId, OutgoingMessage, Sender,
    TextFormat,
};
use serde_json::Value;
use tracing::{debug, trace};

use super::{
    DefaultImageResolver, HandlebarsRenderer, ImageResolver, ImageSource, Keyboard, MessageSource, PromptError,
    PromptSpec, RenderedText, TemplateRenderer,
    keyboard::ButtonAction,
};
use crate::{callback::CallbackStore, flow::context::StepContext};

/// Zero width space: platforms refuse empty messages, and a keyboard needs a message to hang on.
pub const DEFAULT_KEYBOARD_PLACEHOLDER: &str = "\u{200B}";

/// Turns a `PromptSpec` into at most one outgoing message and hands it to the sender.
#[derive(Clone)]
pub struct PromptComposer {
    callbacks: CallbackStore,
    templates: Arc<dyn TemplateRenderer>,
    images: Arc<dyn ImageResolver>,
    sender: Sender,
    placeholder: String,
}

impl PromptComposer {
    pub fn new(sender: Sender, callbacks: CallbackStore) -> Self {
        Self {
            callbacks,
            templates: Arc::new(HandlebarsRenderer::new()),
            images: Arc::new(DefaultImageResolver),
            sender,
            placeholder: DEFAULT_KEYBOARD_PLACEHOLDER.to_string(),
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_image_resolver(mut self, images: Arc<dyn ImageResolver>) -> Self {
        self.images = images;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn callbacks(&self) -> &CallbackStore {
        &self.callbacks
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Resolves every part of `spec` against `ctx`.
    ///
    /// Any failure aborts the whole prompt. The keyboard is resolved last, so
    /// callback tokens are only registered once text and image are known good.
    /// `Ok(None)` means everything resolved to nothing and there is nothing to send.
    pub fn compose(&self, spec: &PromptSpec, ctx: &StepContext) -> Result<Option<OutgoingMessage>, PromptError> {
        spec.validate()?;

        let RenderedText { text, format } = self.resolve_message(spec, ctx)?;
        let image = self.resolve_image(spec, ctx)?;
        let keyboard = self.resolve_keyboard(spec, ctx)?;

        let chat = ctx.chat().clone();
        let message = if let Some(image) = image {
            Some(OutgoingMessage::photo(chat, image, text))
        } else if !text.is_empty() {
            Some(OutgoingMessage::text(chat, text))
        } else if keyboard.is_some() {
            Some(OutgoingMessage::text(chat, self.placeholder.clone()))
        } else {
            None
        };

        let message = message.map(|m| m.with_keyboard(keyboard).with_format(format));
        debug!(
            user = %ctx.user(),
            flow = ctx.flow(),
            step = ctx.step(),
            composed = message.is_some(),
            "composed prompt"
        );
        Ok(message)
    }

    pub async fn dispatch(&self, message: OutgoingMessage) -> Result<MessageId, ChannelError> {
        let id = self.sender.send(message).await?;
        trace!(message = %id, "prompt delivered");
        Ok(id)
    }

    fn resolve_message(&self, spec: &PromptSpec, ctx: &StepContext) -> Result<RenderedText, PromptError> {
        let plain = |text: String| RenderedText { text, format: TextFormat::Plain };
        match &spec.message {
            None => Ok(plain(String::new())),
            Some(MessageSource::Literal(text)) => Ok(plain(text.clone())),
            Some(MessageSource::Computed(f)) => f(ctx).map(plain),
            Some(MessageSource::Template(name)) => {
                let data = template_data(spec, ctx);
                self.templates.render(name, &data)
            }
        }
    }

    fn resolve_image(&self, spec: &PromptSpec, ctx: &StepContext) -> Result<Option<ImageRef>, PromptError> {
        let image = match &spec.image {
            None => None,
            Some(ImageSource::Literal(image)) => Some(image.clone()),
            Some(ImageSource::Computed(f)) => f(ctx)?,
        };
        image.map(|image| self.images.resolve(image, ctx)).transpose()
    }

    fn resolve_keyboard(&self, spec: &PromptSpec, ctx: &StepContext) -> Result<Option<InlineKeyboard>, PromptError> {
        let Some(build) = &spec.keyboard else {
            return Ok(None);
        };
        let keyboard: Keyboard = build(ctx)?;
        keyboard.validate().map_err(PromptError::Keyboard)?;
        if keyboard.is_empty() {
            return Ok(None);
        }

        let rows = keyboard
            .rows
            .into_iter()
            .filter(|row| !row.is_empty())
            .map(|row| {
                row.into_iter()
                    .map(|button| {
                        let kind = match button.action {
                            ButtonAction::Callback(payload) => {
                                InlineButtonKind::Callback(self.callbacks.register(ctx.user(), payload))
                            }
                            ButtonAction::Url(url) => InlineButtonKind::Url(url),
                        };
                        InlineButton { text: button.text, kind }
                    })
                    .collect()
            })
            .collect();
        Ok(Some(InlineKeyboard { rows }))
    }
}

/// Session values with the prompt's own template data layered on top.
fn template_data(spec: &PromptSpec, ctx: &StepContext) -> Value {
    let mut data = ctx.data().to_json_map();
    for (key, value) in &spec.template_data {
        data.insert(key.clone(), value.to_json());
    }
    Value::Object(data)
}

impl fmt::Debug for PromptComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptComposer")
            .field("callbacks", &self.callbacks)
            .field("placeholder", &self.placeholder)
            .finish_non_exhaustive()
    }
}
