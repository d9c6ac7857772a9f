use std::{collections::HashMap, sync::Arc, time::Duration};
use chat_channel::{ChatId, MessageId, OutgoingMessage, Sender, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    callback::{CallbackStore, InMemoryCallbackStore},
    flow::{
        context::{RequestContext, StepContext},
        definition::{ButtonCleanup, ErrorPolicy, FlowCompletion, FlowDefinition},
        error::FlowError,
        event::{ButtonClickEvent, InboundEvent, StepInput},
        result::{AdvanceOutcome, ProcessResult, StepError},
        session::{FlowSession, InMemorySessionStore, SessionHandle, SessionStore},
        transition::{self, Transition},
    },
    logger::FLOW_EVENT_TARGET,
    prompt::PromptComposer,
    state::StateValue,
    util::short_token,
};

fn flow_event(flow: &str, user: &UserId, event: &str, step: Option<&str>) {
    info!(
        target: FLOW_EVENT_TARGET,
        flow,
        user = %user,
        event,
        step = step.unwrap_or_default(),
        "flow {event}"
    );
}

/// Owns the registered flows and every user's active session.
///
/// Events for one user are processed one at a time; different users never
/// wait on each other.
pub struct FlowManager {
    flows: DashMap<String, Arc<FlowDefinition>>,
    sessions: SessionStore,
    composer: PromptComposer,
}

impl FlowManager {
    pub fn new(sessions: SessionStore, composer: PromptComposer) -> Arc<Self> {
        Arc::new(FlowManager {
            flows: DashMap::new(),
            sessions,
            composer,
        })
    }

    /// In-memory sessions and callback store, default template and image handling.
    pub fn in_memory(sender: Sender) -> Arc<Self> {
        let composer = PromptComposer::new(sender, InMemoryCallbackStore::new());
        Self::new(InMemorySessionStore::new(), composer)
    }

    /// Registers `flow` under its name, replacing any flow of the same name.
    /// Sessions already running keep the definition they started with.
    pub fn register_flow(&self, flow: FlowDefinition) -> Arc<FlowDefinition> {
        let flow = Arc::new(flow);
        let name = flow.name().to_string();
        if self.flows.insert(name.clone(), flow.clone()).is_some() {
            info!("Replaced flow: {}", name);
        } else {
            info!("Registered flow: {}", name);
        }
        flow
    }

    pub fn flow(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(name).map(|f| f.value().clone())
    }

    pub fn flow_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.flows.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }

    pub fn remove_flow(&self, name: &str) -> bool {
        let removed = self.flows.remove(name).is_some();
        if removed {
            info!("Removed flow: {}", name);
        }
        removed
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn callbacks(&self) -> &CallbackStore {
        self.composer.callbacks()
    }

    /// Starts `flow_name` for the user in `request` and sends its first prompt.
    ///
    /// A session the user already had is discarded together with its button
    /// tokens. If the first prompt cannot be composed the new session is
    /// dropped again; if it cannot be sent the session stays.
    #[tracing::instrument(skip(self, request), fields(user = %request.user))]
    pub async fn start_flow(&self, flow_name: &str, request: RequestContext) -> Result<Option<MessageId>, FlowError> {
        let flow = self
            .flow(flow_name)
            .ok_or_else(|| FlowError::UnknownFlow(flow_name.to_string()))?;
        let RequestContext { user, chat, data } = request;

        let session = FlowSession::new(user.clone(), chat, flow.clone(), Utc::now());
        let ctx = StepContext::for_session(&session, data);
        let handle = SessionHandle::new(session);
        let _guard = handle.lock().await;

        if self.sessions.insert(user.clone(), handle.clone()).is_some() {
            info!(%user, flow = flow.name(), "replaced active flow session");
        }
        self.callbacks().clear(&user);

        let first = flow.first_step();
        let message = match self.composer.compose(first.prompt(), &ctx) {
            Ok(message) => message,
            Err(err) => {
                self.sessions.remove_if_same(&user, &handle);
                self.callbacks().clear(&user);
                error!(%user, flow = flow.name(), error = %err, "first prompt failed, flow not started");
                return Err(err.into());
            }
        };
        if !self.sessions.is_current(&user, &handle) {
            self.discard(&user, message);
            debug!(%user, flow = flow.name(), "flow cancelled before its first prompt went out");
            return Ok(None);
        }
        flow_event(flow.name(), &user, "started", Some(first.name()));
        self.send(message).await
    }

    pub fn is_user_in_flow(&self, user: &UserId) -> bool {
        self.sessions.contains(user)
    }

    pub async fn current_step(&self, user: &UserId) -> Option<String> {
        let handle = self.sessions.get(user)?;
        let session = handle.lock().await;
        Some(session.step().to_string())
    }

    /// Drops the user's session and button tokens without waiting for
    /// in-flight processing. Returns whether a session was active.
    pub fn cancel_flow(&self, user: &UserId) -> bool {
        let removed = self.sessions.remove(user);
        self.callbacks().clear(user);
        let Some(handle) = removed else {
            return false;
        };
        // an in-flight advance holds the lock; it will see the session is gone
        flow_event(handle.flow_name(), user, "cancelled", None);
        true
    }

    /// Writes straight into the session data, outside of any step transition.
    pub async fn set_user_flow_data(
        &self,
        user: &UserId,
        key: &str,
        value: impl Into<StateValue>,
    ) -> Result<Option<StateValue>, FlowError> {
        let handle = self
            .sessions
            .get(user)
            .ok_or_else(|| FlowError::NoActiveSession(user.clone()))?;
        let mut session = handle.lock().await;
        if !self.sessions.is_current(user, &handle) {
            return Err(FlowError::NoActiveSession(user.clone()));
        }
        Ok(session.data_mut().set(key, value))
    }

    pub async fn get_user_flow_data(&self, user: &UserId, key: &str) -> Option<StateValue> {
        let handle = self.sessions.get(user)?;
        let session = handle.lock().await;
        if !self.sessions.is_current(user, &handle) {
            return None;
        }
        session.data().get(key).cloned()
    }

    /// Looks up a button payload for `user`, e.g. for keyboards sent with a
    /// completion message.
    pub fn resolve_callback(&self, user: &UserId, token: &str) -> Option<StateValue> {
        self.callbacks().resolve(user, token)
    }

    /// Feeds one inbound event to the user's current step and applies the result.
    #[tracing::instrument(skip(self, event), fields(user = %event.user))]
    pub async fn advance(&self, event: InboundEvent) -> Result<AdvanceOutcome, FlowError> {
        let InboundEvent { user, chat, text, button, data } = event;

        let Some(handle) = self.sessions.get(&user) else {
            return Ok(AdvanceOutcome::NotInFlow);
        };
        let mut session = handle.lock().await;
        if !self.sessions.is_current(&user, &handle) {
            return Ok(AdvanceOutcome::Superseded);
        }

        if session.is_expired_at(Utc::now()) {
            self.expire(&user, &handle, &session);
            return Ok(AdvanceOutcome::Expired);
        }

        let flow = session.flow().clone();
        let step_name = session.step().to_string();
        let step = flow.step(&step_name).ok_or_else(|| FlowError::UnknownStep {
            flow: flow.name().to_string(),
            step: step_name.clone(),
        })?;

        let button = match button {
            None => None,
            Some(click) => {
                let Some(payload) = self.callbacks().resolve(&user, &click.token) else {
                    warn!(%user, token = short_token(&click.token), "ignoring stale button");
                    return Ok(AdvanceOutcome::StaleCallback);
                };
                if let Some(message) = &click.message {
                    self.clean_up_button(flow.button_cleanup_for(&step_name), &chat, message)
                        .await;
                }
                Some(ButtonClickEvent {
                    payload,
                    text: click.text,
                    user: user.clone(),
                    chat: chat.clone(),
                    message: click.message,
                    metadata: click.metadata,
                })
            }
        };

        let input = StepInput { text, button };
        let mut ctx = StepContext::for_session(&session, data.clone());
        debug!(flow = flow.name(), step = %step_name, "processing step input");

        match step.handler().process(&input, &mut ctx).await {
            Ok(result) => self.apply(&handle, &mut session, ctx, result).await,
            Err(err) => self.recover(&handle, &mut session, data, err).await,
        }
    }

    async fn apply(
        &self,
        handle: &SessionHandle,
        session: &mut FlowSession,
        ctx: StepContext,
        result: ProcessResult,
    ) -> Result<AdvanceOutcome, FlowError> {
        let flow = session.flow().clone();
        let user = session.user().clone();
        let from = session.step().to_string();

        let plan = transition::plan(&flow, &from, result).inspect_err(|err| {
            warn!(%user, flow = flow.name(), step = %from, error = %err, "transition rejected");
        })?;
        if !self.sessions.is_current(&user, handle) {
            return Ok(AdvanceOutcome::Superseded);
        }
        let message = match &plan.prompt {
            Some(prompt) => self.composer.compose(&prompt.spec, &ctx.at_step(&prompt.step))?,
            None => None,
        };
        if !self.sessions.is_current(&user, handle) {
            return Ok(self.discard(&user, message));
        }

        let mut completion = None;
        let outcome = match plan.transition {
            Transition::Stay => {
                session.replace_data(ctx.into_data());
                debug!(flow = flow.name(), step = %from, "retrying step");
                AdvanceOutcome::Retried { step: from }
            }
            Transition::MoveTo(target) => {
                session.replace_data(ctx.into_data());
                session.move_to(target.clone());
                debug!(flow = flow.name(), from = %from, to = %target, "moved to step");
                AdvanceOutcome::Moved { step: target }
            }
            Transition::Complete => {
                if !self.sessions.remove_if_same(&user, handle) {
                    return Ok(self.discard(&user, message));
                }
                flow_event(flow.name(), &user, "completed", Some(&from));
                completion = Some(FlowCompletion {
                    flow: flow.name().to_string(),
                    user: user.clone(),
                    chat: session.chat().clone(),
                    data: ctx.into_data(),
                });
                AdvanceOutcome::Completed
            }
            Transition::Cancel => {
                if !self.sessions.remove_if_same(&user, handle) {
                    return Ok(self.discard(&user, message));
                }
                self.callbacks().clear(&user);
                flow_event(flow.name(), &user, "cancelled", Some(&from));
                AdvanceOutcome::Cancelled
            }
        };

        // a cancel that removed the session after the commit wins; nothing goes out
        if matches!(outcome, AdvanceOutcome::Retried { .. } | AdvanceOutcome::Moved { .. })
            && !self.sessions.is_current(&user, handle)
        {
            return Ok(self.discard(&user, message));
        }

        let sent = self.send(message).await;
        if let (Some(completion), Some(hook)) = (&completion, flow.on_complete()) {
            hook(completion);
        }
        sent?;
        Ok(outcome)
    }

    async fn recover(
        &self,
        handle: &SessionHandle,
        session: &mut FlowSession,
        request: HashMap<String, StateValue>,
        err: StepError,
    ) -> Result<AdvanceOutcome, FlowError> {
        let flow = session.flow().clone();
        let user = session.user().clone();
        let step = session.step().to_string();
        error!(%user, flow = flow.name(), step = %step, error = %err, "step logic failed");

        let spec = match flow.error_policy() {
            ErrorPolicy::Cancel => {
                if self.sessions.remove_if_same(&user, handle) {
                    self.callbacks().clear(&user);
                    flow_event(flow.name(), &user, "failed", Some(&step));
                }
                return Err(FlowError::Step {
                    flow: flow.name().to_string(),
                    step,
                    source: err,
                });
            }
            ErrorPolicy::Retry => match session.current_step() {
                Some(current) => current.prompt().clone(),
                None => return Err(FlowError::UnknownStep { flow: flow.name().to_string(), step }),
            },
            ErrorPolicy::Fallback(spec) => spec.clone(),
        };

        if !self.sessions.is_current(&user, handle) {
            return Ok(AdvanceOutcome::Superseded);
        }
        let ctx = StepContext::for_session(session, request);
        let message = self.composer.compose(&spec, &ctx)?;
        if !self.sessions.is_current(&user, handle) {
            return Ok(self.discard(&user, message));
        }
        self.send(message).await?;
        Ok(AdvanceOutcome::Recovered { step })
    }

    async fn send(&self, message: Option<OutgoingMessage>) -> Result<Option<MessageId>, FlowError> {
        match message {
            Some(message) => Ok(Some(self.composer.dispatch(message).await?)),
            None => Ok(None),
        }
    }

    /// Drops the tokens registered for a message that will never be sent.
    fn discard(&self, user: &UserId, message: Option<OutgoingMessage>) -> AdvanceOutcome {
        let Some(keyboard) = message.and_then(|m| m.keyboard) else {
            return AdvanceOutcome::Superseded;
        };
        let dropped = keyboard
            .buttons()
            .filter_map(|button| button.callback_token())
            .filter(|token| self.callbacks().forget(user, token))
            .count();
        debug!(%user, dropped, "discarded prompt of a superseded session");
        AdvanceOutcome::Superseded
    }

    async fn clean_up_button(&self, cleanup: ButtonCleanup, chat: &ChatId, message: &MessageId) {
        let sender = self.composer.sender();
        let result = match cleanup {
            ButtonCleanup::Keep => return,
            ButtonCleanup::RemoveKeyboard => sender.remove_keyboard(chat, message).await,
            ButtonCleanup::Delete => sender.delete_message(chat, message).await,
        };
        if let Err(err) = result {
            warn!(%chat, %message, ?cleanup, error = %err, "button cleanup failed");
        }
    }

    fn expire(&self, user: &UserId, handle: &SessionHandle, session: &FlowSession) {
        if self.sessions.remove_if_same(user, handle) {
            self.callbacks().clear(user);
            warn!(%user, flow = session.flow_name(), "flow session expired");
            flow_event(session.flow_name(), user, "expired", Some(session.step()));
        }
    }

    /// Cancels every session past its flow's lifetime at `now`.
    ///
    /// Sessions locked by an in-flight event are skipped; `advance` checks
    /// expiry itself. Returns how many sessions were dropped.
    pub fn reap_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut reaped = 0;
        for user in self.sessions.users() {
            let Some(handle) = self.sessions.get(&user) else {
                continue;
            };
            let Ok(session) = handle.try_lock() else {
                continue;
            };
            if session.is_expired_at(now) && self.sessions.is_current(&user, &handle) {
                self.expire(&user, &handle, &session);
                reaped += 1;
            }
        }
        reaped
    }

    /// Runs `reap_expired_at` every `interval` until `shutdown` is cancelled.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("session reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = manager.reap_expired_at(Utc::now());
                        if reaped > 0 {
                            info!(reaped, "reaped expired flow sessions");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowManager")
            .field("flows", &self.flow_names())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
