use std::{collections::HashMap, fmt};
use chat_channel::TextFormat;
use handlebars::{Handlebars, no_escape};
use serde_json::Value;

use super::PromptError;

/// Text produced by a template together with how the platform should read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedText {
    pub text: String,
    pub format: TextFormat,
}

/// Renders named templates; the composer only ever asks for a name plus data.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, data: &Value) -> Result<RenderedText, PromptError>;
}

/// Handlebars-backed renderer.
///
/// HTML templates get Handlebars' HTML escaping of interpolated values, plain
/// and markdown templates are rendered verbatim. Missing values render empty.
pub struct HandlebarsRenderer {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
    formats: HashMap<String, TextFormat>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut plain = Handlebars::new();
        plain.register_escape_fn(no_escape);
        Self {
            html: Handlebars::new(),
            plain,
            formats: HashMap::new(),
        }
    }

    /// Registers (or replaces) a template under `name`.
    pub fn register(&mut self, name: &str, source: &str, format: TextFormat) -> Result<(), PromptError> {
        let (target, other) = match format {
            TextFormat::Html => (&mut self.html, &mut self.plain),
            TextFormat::Plain | TextFormat::Markdown => (&mut self.plain, &mut self.html),
        };
        target
            .register_template_string(name, source)
            .map_err(|e| PromptError::Template(format!("template '{name}' does not parse: {e}")))?;
        other.unregister_template(name);
        self.formats.insert(name.to_string(), format);
        Ok(())
    }

    pub fn with_template(mut self, name: &str, source: &str, format: TextFormat) -> Result<Self, PromptError> {
        self.register(name, source, format)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlebarsRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlebarsRenderer").field("templates", &self.formats).finish()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, name: &str, data: &Value) -> Result<RenderedText, PromptError> {
        let format = *self
            .formats
            .get(name)
            .ok_or_else(|| PromptError::Template(format!("unknown template '{name}'")))?;
        let registry = match format {
            TextFormat::Html => &self.html,
            TextFormat::Plain | TextFormat::Markdown => &self.plain,
        };
        let text = registry
            .render(name, data)
            .map_err(|e| PromptError::Template(format!("template '{name}': {e}")))?;
        Ok(RenderedText { text, format })
    }
}
