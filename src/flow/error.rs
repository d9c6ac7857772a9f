use chat_channel::{ChannelError, UserId};
use thiserror::Error;

use crate::{flow::result::StepError, prompt::PromptError};

/// Problems in a flow definition, reported by `FlowBuilder::build`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("flow name must not be empty")]
    EmptyName,

    #[error("flow '{0}' has no steps")]
    NoSteps(String),

    #[error("flow '{0}' has a step with an empty name")]
    EmptyStepName(String),

    #[error("flow '{flow}' defines step '{step}' more than once")]
    DuplicateStep { flow: String, step: String },

    #[error("step '{step}' of flow '{flow}' has an empty prompt")]
    EmptyPrompt { flow: String, step: String },

    #[error("step '{step}' of flow '{flow}' may jump to unknown step '{target}'")]
    UnknownJumpTarget { flow: String, step: String, target: String },

    #[error("fallback prompt of flow '{0}' is empty")]
    EmptyFallback(String),
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown flow '{0}'")]
    UnknownFlow(String),

    /// A jump named a step the flow does not have. The session stays where it was.
    #[error("flow '{flow}' has no step '{step}'")]
    UnknownStep { flow: String, step: String },

    #[error("user {0} has no active flow")]
    NoActiveSession(UserId),

    /// Step logic failed and the error policy ended the flow.
    #[error("step '{step}' of flow '{flow}' failed: {source}")]
    Step {
        flow: String,
        step: String,
        #[source]
        source: StepError,
    },

    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// The transition happened; only the notification was lost.
    #[error("failed to send prompt: {0}")]
    Send(#[from] ChannelError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}
