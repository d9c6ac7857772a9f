use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};
use async_trait::async_trait;
use chat_channel::{ChatId, UserId};

use crate::{
    flow::{
        context::StepContext,
        error::DefinitionError,
        event::StepInput,
        result::{ProcessResult, StepError},
    },
    prompt::PromptSpec,
    state::FlowData,
};

/// Input-processing logic of one step.
///
/// Mutations made through `ctx` are kept only if the returned result leads to
/// a committed transition.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn process(&self, input: &StepInput, ctx: &mut StepContext) -> Result<ProcessResult, StepError>;
}

/// Adapts a plain closure to `StepHandler`.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(&StepInput, &mut StepContext) -> Result<ProcessResult, StepError> + Send + Sync,
{
    async fn process(&self, input: &StepInput, ctx: &mut StepContext) -> Result<ProcessResult, StepError> {
        (self.0)(input, ctx)
    }
}

/// What happens to the message whose button was clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonCleanup {
    Keep,
    #[default]
    RemoveKeyboard,
    Delete,
}

/// What to do when step logic returns an error instead of a result.
#[derive(Debug, Clone, Default)]
pub enum ErrorPolicy {
    /// End the flow and surface the error.
    #[default]
    Cancel,
    /// Stay on the step and show its prompt again.
    Retry,
    /// Stay on the step and show this prompt.
    Fallback(PromptSpec),
}

/// Handed to the completion hook once a flow completes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCompletion {
    pub flow: String,
    pub user: UserId,
    pub chat: ChatId,
    pub data: FlowData,
}

pub type CompletionHook = Arc<dyn Fn(&FlowCompletion) + Send + Sync>;

#[derive(Clone)]
pub struct StepDefinition {
    name: String,
    prompt: PromptSpec,
    handler: Arc<dyn StepHandler>,
    jumps: Vec<String>,
    cleanup: Option<ButtonCleanup>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, prompt: PromptSpec, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            prompt,
            handler,
            jumps: Vec::new(),
            cleanup: None,
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, prompt: PromptSpec, f: F) -> Self
    where
        F: Fn(&StepInput, &mut StepContext) -> Result<ProcessResult, StepError> + Send + Sync + 'static,
    {
        Self::new(name, prompt, Arc::new(FnHandler(f)))
    }

    /// Declares steps this step may jump to, checked when the flow is built.
    pub fn jumps_to<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jumps.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Overrides the flow's button cleanup for clicks on this step.
    pub fn button_cleanup(mut self, cleanup: ButtonCleanup) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt(&self) -> &PromptSpec {
        &self.prompt
    }

    pub fn handler(&self) -> &Arc<dyn StepHandler> {
        &self.handler
    }

    pub fn declared_jumps(&self) -> &[String] {
        &self.jumps
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("prompt", &self.prompt)
            .field("jumps", &self.jumps)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

/// Immutable, named, ordered sequence of steps. Shared by every session running it.
pub struct FlowDefinition {
    name: String,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
    on_complete: Option<CompletionHook>,
    error_policy: ErrorPolicy,
    max_lifetime: Option<Duration>,
    button_cleanup: ButtonCleanup,
}

impl FlowDefinition {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// The builder guarantees at least one step.
    pub fn first_step(&self) -> &StepDefinition {
        &self.steps[0]
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Step following `name` in definition order; `None` on the last step or an unknown name.
    pub fn next_after(&self, name: &str) -> Option<&StepDefinition> {
        self.index.get(name).and_then(|&i| self.steps.get(i + 1))
    }

    pub fn error_policy(&self) -> &ErrorPolicy {
        &self.error_policy
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime
    }

    pub fn button_cleanup_for(&self, step: &str) -> ButtonCleanup {
        self.step(step).and_then(|s| s.cleanup).unwrap_or(self.button_cleanup)
    }

    pub fn on_complete(&self) -> Option<&CompletionHook> {
        self.on_complete.as_ref()
    }
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("error_policy", &self.error_policy)
            .field("max_lifetime", &self.max_lifetime)
            .field("button_cleanup", &self.button_cleanup)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Collects steps and hooks, then checks them once in `build`.
pub struct FlowBuilder {
    name: String,
    steps: Vec<StepDefinition>,
    on_complete: Option<CompletionHook>,
    error_policy: ErrorPolicy,
    max_lifetime: Option<Duration>,
    button_cleanup: ButtonCleanup,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            on_complete: None,
            error_policy: ErrorPolicy::default(),
            max_lifetime: None,
            button_cleanup: ButtonCleanup::default(),
        }
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_fn<F>(self, name: impl Into<String>, prompt: PromptSpec, f: F) -> Self
    where
        F: Fn(&StepInput, &mut StepContext) -> Result<ProcessResult, StepError> + Send + Sync + 'static,
    {
        self.step(StepDefinition::from_fn(name, prompt, f))
    }

    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FlowCompletion) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn button_cleanup(mut self, cleanup: ButtonCleanup) -> Self {
        self.button_cleanup = cleanup;
        self
    }

    pub fn build(self) -> Result<FlowDefinition, DefinitionError> {
        let flow = self.name;
        if flow.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps(flow));
        }

        let mut index = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(DefinitionError::EmptyStepName(flow));
            }
            if index.insert(step.name.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateStep { flow, step: step.name.clone() });
            }
            if step.prompt.is_empty() {
                return Err(DefinitionError::EmptyPrompt { flow, step: step.name.clone() });
            }
        }

        let names: HashSet<&str> = index.keys().map(String::as_str).collect();
        for step in &self.steps {
            if let Some(target) = step.jumps.iter().find(|t| !names.contains(t.as_str())) {
                return Err(DefinitionError::UnknownJumpTarget {
                    flow,
                    step: step.name.clone(),
                    target: target.clone(),
                });
            }
        }

        if let ErrorPolicy::Fallback(prompt) = &self.error_policy {
            if prompt.is_empty() {
                return Err(DefinitionError::EmptyFallback(flow));
            }
        }

        Ok(FlowDefinition {
            name: flow,
            steps: self.steps,
            index,
            on_complete: self.on_complete,
            error_policy: self.error_policy,
            max_lifetime: self.max_lifetime,
            button_cleanup: self.button_cleanup,
        })
    }
}
