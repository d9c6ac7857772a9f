use crate::{
    flow::{
        definition::FlowDefinition,
        error::FlowError,
        result::{NavAction, ProcessResult},
    },
    prompt::PromptSpec,
};

/// Structural effect of a step result on its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Stay,
    MoveTo(String),
    Complete,
    Cancel,
}

/// A prompt to render, and the step whose view of the session renders it.
#[derive(Debug, Clone)]
pub struct PlannedPrompt {
    pub spec: PromptSpec,
    pub step: String,
}

#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub transition: Transition,
    pub prompt: Option<PlannedPrompt>,
}

/// Maps a navigation action on `current` to a transition.
///
/// `Next` on the last step completes the flow. A jump to a step the flow
/// does not have is an error.
pub fn resolve(flow: &FlowDefinition, current: &str, action: &NavAction) -> Result<Transition, FlowError> {
    match action {
        NavAction::Next => Ok(flow
            .next_after(current)
            .map(|step| Transition::MoveTo(step.name().to_string()))
            .unwrap_or(Transition::Complete)),
        NavAction::Jump(target) if flow.contains(target) => Ok(Transition::MoveTo(target.clone())),
        NavAction::Jump(target) => Err(FlowError::UnknownStep {
            flow: flow.name().to_string(),
            step: target.clone(),
        }),
        NavAction::Retry => Ok(Transition::Stay),
        NavAction::Complete => Ok(Transition::Complete),
        NavAction::Cancel => Ok(Transition::Cancel),
    }
}

/// Resolves `result` and picks the prompt that goes with it.
///
/// An override prompt replaces the default one. Without an override, staying
/// shows the current step's prompt again, moving shows the destination's, and
/// completing or cancelling shows nothing.
pub fn plan(flow: &FlowDefinition, current: &str, result: ProcessResult) -> Result<TransitionPlan, FlowError> {
    let (action, override_prompt) = result.into_parts();
    let transition = resolve(flow, current, &action)?;

    let prompt = match (override_prompt, &transition) {
        (Some(spec), _) => Some(PlannedPrompt { spec, step: current.to_string() }),
        (None, Transition::Stay) => flow.step(current).map(|step| PlannedPrompt {
            spec: step.prompt().clone(),
            step: current.to_string(),
        }),
        (None, Transition::MoveTo(target)) => flow.step(target).map(|step| PlannedPrompt {
            spec: step.prompt().clone(),
            step: target.clone(),
        }),
        (None, Transition::Complete | Transition::Cancel) => None,
    };

    Ok(TransitionPlan { transition, prompt })
}
