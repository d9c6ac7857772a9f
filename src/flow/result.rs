use thiserror::Error;

use crate::prompt::PromptSpec;

/// Where a step wants the session to go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavAction {
    /// Following step in definition order; completes the flow on the last step.
    Next,
    Jump(String),
    Retry,
    Complete,
    Cancel,
}

/// What step logic returns: exactly one navigation action, optionally with a
/// prompt to show instead of the default one.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    action: NavAction,
    prompt: Option<PromptSpec>,
}

impl ProcessResult {
    fn of(action: NavAction) -> Self {
        Self { action, prompt: None }
    }

    pub fn next() -> Self {
        Self::of(NavAction::Next)
    }

    pub fn jump(step: impl Into<String>) -> Self {
        Self::of(NavAction::Jump(step.into()))
    }

    pub fn retry() -> Self {
        Self::of(NavAction::Retry)
    }

    pub fn complete() -> Self {
        Self::of(NavAction::Complete)
    }

    pub fn cancel() -> Self {
        Self::of(NavAction::Cancel)
    }

    /// Replaces the prompt the action would otherwise render.
    pub fn with_prompt(mut self, prompt: PromptSpec) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn action(&self) -> &NavAction {
        &self.action
    }

    pub fn prompt(&self) -> Option<&PromptSpec> {
        self.prompt.as_ref()
    }

    /// Target step, only for jumps.
    pub fn target(&self) -> Option<&str> {
        match &self.action {
            NavAction::Jump(step) => Some(step),
            _ => None,
        }
    }

    pub(crate) fn into_parts(self) -> (NavAction, Option<PromptSpec>) {
        (self.action, self.prompt)
    }
}

/// Failure of step logic itself, as opposed to a decision to retry or cancel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// How `FlowManager::advance` handled an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The user has no active flow; the event is for someone else to handle.
    NotInFlow,
    /// The button token is unknown for this user (old keyboard or forged).
    StaleCallback,
    Moved { step: String },
    Retried { step: String },
    /// Step logic failed and the error policy kept the session on `step`.
    Recovered { step: String },
    Completed,
    Cancelled,
    /// The session had outlived its flow's lifetime and was dropped.
    Expired,
    /// The session was cancelled or replaced while the event was processed.
    Superseded,
}

impl AdvanceOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, AdvanceOutcome::Completed | AdvanceOutcome::Cancelled | AdvanceOutcome::Expired)
    }

    pub fn step(&self) -> Option<&str> {
        match self {
            AdvanceOutcome::Moved { step } | AdvanceOutcome::Retried { step } | AdvanceOutcome::Recovered { step } => {
                Some(step)
            }
            _ => None,
        }
    }
}
