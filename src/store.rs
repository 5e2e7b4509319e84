//! Session storage
//!
//! Sessions are fully independent. The store is owned by whoever drives the
//! sessions and passed to them explicitly; there is no global registry.

use std::{collections::HashMap, time::Duration};

use crate::{constants::registration::REGISTRATION_WINDOW, ids::SessionId, state::Session};

/// All live sessions, keyed by chat
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
    registration_window: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_registration_window(Duration::from_secs(REGISTRATION_WINDOW))
    }
}

impl SessionStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose sessions keep registration open for `window`
    pub fn with_registration_window(window: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            registration_window: window,
        }
    }

    fn fresh(&self, id: SessionId) -> Session {
        Session::with_registration_window(id, self.registration_window)
    }

    /// Returns the session of a chat, creating an idle one if none exists
    pub fn get_or_create(&mut self, id: SessionId) -> &mut Session {
        let window = self.registration_window;
        self.sessions
            .entry(id)
            .or_insert_with(|| Session::with_registration_window(id, window))
    }

    /// Returns the session of a chat
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Returns the session of a chat for modification
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Replaces the session of a chat with a fresh idle one
    ///
    /// Any alarm or background result still in flight for the old session
    /// carries a token the fresh session does not know, and is ignored.
    pub fn reset(&mut self, id: SessionId) {
        let fresh = self.fresh(id);
        self.sessions.insert(id, fresh);
    }

    /// Removes the session of a chat
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
