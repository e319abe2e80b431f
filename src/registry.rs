//! Session registry
//!
//! The authoritative table of connected usernames. Owned by the relay
//! actor, so every mutation is already serialised; the methods here keep
//! the table's own invariants (unique names, registration order).

use std::collections::HashMap;

use crate::session::Session;
use crate::types::{SessionId, Username};

/// Username → Session table
///
/// `/list` output and broadcast fan-out follow registration order.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<Username, Session>,
    /// Registration order of the keys in `sessions`
    order: Vec<Username>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its username if the name is free
    ///
    /// Returns false and leaves the table untouched if the name is taken.
    pub fn register(&mut self, session: Session) -> bool {
        if self.sessions.contains_key(&session.username) {
            return false;
        }
        self.order.push(session.username.clone());
        self.sessions.insert(session.username.clone(), session);
        true
    }

    /// Remove `name` only if it still belongs to session `id`
    ///
    /// A stale cleanup from an earlier connection cannot evict a newer
    /// session that reused the name. Returns whether anything was removed.
    pub fn unregister(&mut self, name: &str, id: SessionId) -> bool {
        match self.sessions.get(name) {
            Some(session) if session.id == id => {}
            _ => return false,
        }
        self.sessions.remove(name);
        self.order.retain(|n| n.as_str() != name);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    /// Snapshot of connected names in registration order
    pub fn list_names(&self) -> Vec<String> {
        self.order.iter().map(|n| n.to_string()).collect()
    }

    /// Sessions in registration order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.order.iter().filter_map(|n| self.sessions.get(n))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Empty the table, returning the sessions in registration order
    pub fn drain(&mut self) -> Vec<Session> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|n| self.sessions.remove(&n))
            .collect()
    }
}
