use std::{collections::HashMap, fmt::Debug, sync::Arc};
use chat_channel::UserId;
use dashmap::DashMap;
use tracing::trace;
use uuid::Uuid;

use crate::{state::StateValue, util::short_token};

pub type CallbackStore = Arc<dyn CallbackStoreType>;

/// Per-user registry of button tokens.
///
/// Every lookup is scoped by user; a payload is never found from a token alone.
pub trait CallbackStoreType: Send + Sync + Debug {
    /// Stores `payload` for `user` and returns the token to embed in a button.
    fn register(&self, user: &UserId, payload: StateValue) -> String;

    /// Returns the payload only if `token` was issued to this `user` and not cleared since.
    fn resolve(&self, user: &UserId, token: &str) -> Option<StateValue>;

    /// Drops a single token of `user`, returning whether it was live.
    fn forget(&self, user: &UserId, token: &str) -> bool;

    /// Drops every token of `user`. Idempotent.
    fn clear(&self, user: &UserId);

    /// Number of live tokens for `user`.
    fn count(&self, user: &UserId) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryCallbackStore {
    // Each user's table sits behind its own map entry; `get` takes a shared
    // shard lock and `entry`/`remove` an exclusive one.
    by_user: DashMap<UserId, HashMap<String, StateValue>>,
}

impl InMemoryCallbackStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl CallbackStoreType for InMemoryCallbackStore {
    fn register(&self, user: &UserId, payload: StateValue) -> String {
        let mut table = self.by_user.entry(user.clone()).or_default();
        let mut token = Uuid::new_v4().simple().to_string();
        while table.contains_key(&token) {
            token = Uuid::new_v4().simple().to_string();
        }
        trace!(%user, token = short_token(&token), "registered callback token");
        table.insert(token.clone(), payload);
        token
    }

    fn resolve(&self, user: &UserId, token: &str) -> Option<StateValue> {
        self.by_user.get(user).and_then(|table| table.get(token).cloned())
    }

    fn forget(&self, user: &UserId, token: &str) -> bool {
        let Some(mut table) = self.by_user.get_mut(user) else {
            return false;
        };
        let removed = table.remove(token).is_some();
        if table.is_empty() {
            drop(table);
            self.by_user.remove_if(user, |_, table| table.is_empty());
        }
        removed
    }

    fn clear(&self, user: &UserId) {
        if let Some((_, table)) = self.by_user.remove(user) {
            trace!(%user, tokens = table.len(), "cleared callback tokens");
        }
    }

    fn count(&self, user: &UserId) -> usize {
        self.by_user.get(user).map(|table| table.len()).unwrap_or(0)
    }
}
