use std::collections::HashMap;
use chat_channel::{ChatId, UserId};

use crate::{
    flow::session::FlowSession,
    state::{FlowData, StateValue},
};

/// Who is talking and any transient data the host attaches to this one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestContext {
    pub user: UserId,
    pub chat: ChatId,
    pub data: HashMap<String, StateValue>,
}

impl RequestContext {
    pub fn new(user: impl Into<UserId>, chat: impl Into<ChatId>) -> Self {
        Self {
            user: user.into(),
            chat: chat.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// What step logic and prompt functions see while one event is handled.
///
/// Holds a working copy of the session data; the flow manager writes it back
/// only when the transition it leads to is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    user: UserId,
    chat: ChatId,
    flow: String,
    step: String,
    data: FlowData,
    request: HashMap<String, StateValue>,
}

impl StepContext {
    pub fn new(
        user: UserId,
        chat: ChatId,
        flow: impl Into<String>,
        step: impl Into<String>,
        data: FlowData,
        request: HashMap<String, StateValue>,
    ) -> Self {
        Self {
            user,
            chat,
            flow: flow.into(),
            step: step.into(),
            data,
            request,
        }
    }

    pub(crate) fn for_session(session: &FlowSession, request: HashMap<String, StateValue>) -> Self {
        Self::new(
            session.user().clone(),
            session.chat().clone(),
            session.flow_name(),
            session.step(),
            session.data().clone(),
            request,
        )
    }

    /// Same context viewed from another step, used to render the destination prompt.
    pub(crate) fn at_step(&self, step: &str) -> Self {
        let mut view = self.clone();
        view.step = step.to_string();
        view
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn chat(&self) -> &ChatId {
        &self.chat
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.data.set(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.data.remove(key)
    }

    pub fn data(&self) -> &FlowData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut FlowData {
        &mut self.data
    }

    pub(crate) fn into_data(self) -> FlowData {
        self.data
    }

    /// Transient per-request value; never persisted in the session.
    pub fn request(&self, key: &str) -> Option<&StateValue> {
        self.request.get(key)
    }

    pub fn request_data(&self) -> &HashMap<String, StateValue> {
        &self.request
    }
}
