pub mod composer;
pub mod image;
pub mod keyboard;
pub mod template;

use std::{collections::HashMap, fmt, sync::Arc};
use chat_channel::ImageRef;
use thiserror::Error;

use crate::{flow::context::StepContext, state::StateValue};

pub use composer::PromptComposer;
pub use image::{DefaultImageResolver, ImageResolver};
pub use keyboard::{Button, ButtonAction, Keyboard};
pub use template::{HandlebarsRenderer, RenderedText, TemplateRenderer};

/// Possible errors while turning a `PromptSpec` into a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt has no message, image or keyboard")]
    EmptySpec,

    #[error("message resolution failed: {0}")]
    Message(String),

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("image resolution failed: {0}")]
    Image(String),

    #[error("keyboard build failed: {0}")]
    Keyboard(String),
}

pub type TextFn = Arc<dyn Fn(&StepContext) -> Result<String, PromptError> + Send + Sync>;
pub type ImageFn = Arc<dyn Fn(&StepContext) -> Result<Option<ImageRef>, PromptError> + Send + Sync>;
pub type KeyboardFn = Arc<dyn Fn(&StepContext) -> Result<Keyboard, PromptError> + Send + Sync>;

/// Where the text of a prompt comes from.
#[derive(Clone)]
pub enum MessageSource {
    Literal(String),
    /// Name of a template known to the `TemplateRenderer`.
    Template(String),
    Computed(TextFn),
}

impl fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            MessageSource::Template(name) => f.debug_tuple("Template").field(name).finish(),
            MessageSource::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

#[derive(Clone)]
pub enum ImageSource {
    Literal(ImageRef),
    Computed(ImageFn),
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Literal(image) => f.debug_tuple("Literal").field(image).finish(),
            ImageSource::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Declarative description of what to show: text, image and keyboard, each optional.
///
/// ```
/// use chatflow::prompt::{Keyboard, PromptSpec};
///
/// let spec = PromptSpec::text("Continue?")
///     .with_static_keyboard(Keyboard::new().row(vec![
///         chatflow::prompt::Button::callback("Yes", "yes"),
///         chatflow::prompt::Button::callback("No", "no"),
///     ]));
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Clone, Default)]
pub struct PromptSpec {
    pub message: Option<MessageSource>,
    pub image: Option<ImageSource>,
    pub keyboard: Option<KeyboardFn>,
    /// Values layered over the session data when a template is rendered.
    pub template_data: HashMap<String, StateValue>,
}

impl PromptSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: Some(MessageSource::Literal(text.into())),
            ..Self::default()
        }
    }

    pub fn template(name: impl Into<String>) -> Self {
        Self {
            message: Some(MessageSource::Template(name.into())),
            ..Self::default()
        }
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<String, PromptError> + Send + Sync + 'static,
    {
        Self {
            message: Some(MessageSource::Computed(Arc::new(f))),
            ..Self::default()
        }
    }

    pub fn image(image: ImageRef) -> Self {
        Self::new().with_image(image)
    }

    pub fn keyboard_only<F>(f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Keyboard, PromptError> + Send + Sync + 'static,
    {
        Self::new().with_keyboard(f)
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(ImageSource::Literal(image));
        self
    }

    pub fn with_image_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Option<ImageRef>, PromptError> + Send + Sync + 'static,
    {
        self.image = Some(ImageSource::Computed(Arc::new(f)));
        self
    }

    pub fn with_keyboard<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<Keyboard, PromptError> + Send + Sync + 'static,
    {
        self.keyboard = Some(Arc::new(f));
        self
    }

    pub fn with_static_keyboard(self, keyboard: Keyboard) -> Self {
        self.with_keyboard(move |_| Ok(keyboard.clone()))
    }

    pub fn with_template_data(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.template_data.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.image.is_none() && self.keyboard.is_none()
    }

    pub fn validate(&self) -> Result<(), PromptError> {
        if self.is_empty() {
            Err(PromptError::EmptySpec)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for PromptSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptSpec")
            .field("message", &self.message)
            .field("image", &self.image)
            .field("keyboard", &self.keyboard.as_ref().map(|_| ".."))
            .field("template_data", &self.template_data)
            .finish()
    }
}
