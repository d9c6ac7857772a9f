use std::{fmt::Debug, sync::Arc};
use chat_channel::{ChatId, UserId};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard, TryLockError};

use crate::{
    flow::definition::{FlowDefinition, StepDefinition},
    state::FlowData,
};

/// One user's live run through a flow.
#[derive(Debug)]
pub struct FlowSession {
    user: UserId,
    chat: ChatId,
    flow: Arc<FlowDefinition>,
    step: String,
    data: FlowData,
    created_at: DateTime<Utc>,
}

impl FlowSession {
    /// New session on the flow's first step.
    pub fn new(user: UserId, chat: ChatId, flow: Arc<FlowDefinition>, created_at: DateTime<Utc>) -> Self {
        let step = flow.first_step().name().to_string();
        Self {
            user,
            chat,
            flow,
            step,
            data: FlowData::new(),
            created_at,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn chat(&self) -> &ChatId {
        &self.chat
    }

    pub fn flow(&self) -> &Arc<FlowDefinition> {
        &self.flow
    }

    pub fn flow_name(&self) -> &str {
        self.flow.name()
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Definition of the current step. Sessions only ever point at steps of their own flow.
    pub fn current_step(&self) -> Option<&StepDefinition> {
        self.flow.step(&self.step)
    }

    pub fn data(&self) -> &FlowData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut FlowData {
        &mut self.data
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `None` when the flow sets no lifetime.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = TimeDelta::from_std(self.flow.max_lifetime()?).ok()?;
        self.created_at.checked_add_signed(lifetime)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn move_to(&mut self, step: impl Into<String>) {
        self.step = step.into();
    }

    pub(crate) fn replace_data(&mut self, data: FlowData) {
        self.data = data;
    }
}

/// A session behind its own lock; all mutation of one user's session goes through it.
///
/// The flow a session runs never changes, so it is readable without the lock.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    flow: Arc<FlowDefinition>,
    session: Arc<Mutex<FlowSession>>,
}

impl SessionHandle {
    pub fn new(session: FlowSession) -> Self {
        Self {
            flow: session.flow().clone(),
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub fn flow_name(&self) -> &str {
        self.flow.name()
    }

    pub async fn lock(&self) -> MutexGuard<'_, FlowSession> {
        self.session.lock().await
    }

    pub fn try_lock(&self) -> Result<MutexGuard<'_, FlowSession>, TryLockError> {
        self.session.try_lock()
    }

    /// Whether both handles point at the same session.
    pub fn same_as(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

pub type SessionStore = Arc<dyn SessionStoreType>;

/// Registry of active sessions, at most one per user.
///
/// Operations on different users never contend on a common lock.
pub trait SessionStoreType: Send + Sync + Debug {
    fn get(&self, user: &UserId) -> Option<SessionHandle>;

    /// Stores `handle` for its user, returning the one it replaced.
    fn insert(&self, user: UserId, handle: SessionHandle) -> Option<SessionHandle>;

    fn remove(&self, user: &UserId) -> Option<SessionHandle>;

    /// Removes the user's session only if it is still `handle`.
    fn remove_if_same(&self, user: &UserId, handle: &SessionHandle) -> bool;

    /// Whether `handle` is still the user's registered session.
    fn is_current(&self, user: &UserId, handle: &SessionHandle) -> bool {
        self.get(user).is_some_and(|current| current.same_as(handle))
    }

    fn contains(&self, user: &UserId) -> bool {
        self.get(user).is_some()
    }

    fn users(&self) -> Vec<UserId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<UserId, SessionHandle>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SessionStoreType for InMemorySessionStore {
    fn get(&self, user: &UserId) -> Option<SessionHandle> {
        self.sessions.get(user).map(|entry| entry.value().clone())
    }

    fn insert(&self, user: UserId, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(user, handle)
    }

    fn remove(&self, user: &UserId) -> Option<SessionHandle> {
        self.sessions.remove(user).map(|(_, handle)| handle)
    }

    fn remove_if_same(&self, user: &UserId, handle: &SessionHandle) -> bool {
        self.sessions.remove_if(user, |_, current| current.same_as(handle)).is_some()
    }

    fn users(&self) -> Vec<UserId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn clear(&self) {
        self.sessions.clear();
    }
}
