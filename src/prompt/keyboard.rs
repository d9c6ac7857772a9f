use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::state::StateValue;

/// What pressing a button does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    /// Comes back to the step logic as `ButtonClickEvent::payload`, shape intact.
    Callback(StateValue),
    Url(#[schemars(with = "String")] Url),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Button {
    pub text: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn callback(text: impl Into<String>, payload: impl Into<StateValue>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Callback(payload.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: Url) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url),
        }
    }
}

/// Application-side keyboard: buttons carry real payloads, not tokens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    /// Appends a callback button on its own row.
    pub fn button(self, text: impl Into<String>, payload: impl Into<StateValue>) -> Self {
        self.row(vec![Button::callback(text, payload)])
    }

    pub fn url_button(self, text: impl Into<String>, url: Url) -> Self {
        self.row(vec![Button::url(text, url)])
    }

    /// One button per row, in order.
    pub fn single_column(buttons: impl IntoIterator<Item = Button>) -> Self {
        Self {
            rows: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }

    pub fn button_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.button_count() == 0
    }

    /// Error message for the first button that cannot be shown, if any.
    pub fn validate(&self) -> Result<(), String> {
        for (r, row) in self.rows.iter().enumerate() {
            for (c, button) in row.iter().enumerate() {
                if button.text.trim().is_empty() {
                    return Err(format!("button at row {r}, column {c} has no text"));
                }
            }
        }
        Ok(())
    }
}
