use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard},
};

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::{gateway::ServerEvent, model::UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Outbound events a session may have queued before pushes start failing.
pub const SESSION_QUEUE: usize = 64;

/// Addressable end of a live connection. Pushing never waits; a push to a
/// session whose socket is gone, or whose queue is full, is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { id: SessionId::new(), tx }
    }

    /// A handle and the receiving end of its bounded queue.
    pub fn channel() -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns false when the connection has gone away or stopped reading.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = %self.id, "outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Default)]
struct Bindings {
    by_user: HashMap<UserId, SessionHandle>,
    by_session: HashMap<SessionId, UserId>,
}

/// Which identity owns which live session. Process memory only.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: Mutex<Bindings>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Bindings> {
        // the maps are consistent between statements, so a poisoned lock is still usable
        self.bindings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last registration wins. The superseded session stays open but is no
    /// longer addressable.
    pub fn register(&self, user_id: UserId, session: SessionHandle) {
        let mut bindings = self.lock();

        if let Some(previous_user) = bindings.by_session.insert(session.id, user_id) {
            if previous_user != user_id
                && bindings.by_user.get(&previous_user).is_some_and(|s| s.id == session.id)
            {
                bindings.by_user.remove(&previous_user);
            }
        }

        if let Some(previous) = bindings.by_user.insert(user_id, session.clone()) {
            if previous.id != session.id {
                bindings.by_session.remove(&previous.id);
                tracing::debug!(%user_id, superseded = %previous.id, "session superseded");
            }
        }
    }

    /// No-op when the session isn't bound.
    pub fn unregister(&self, session_id: SessionId) -> Option<UserId> {
        let mut bindings = self.lock();
        let user_id = bindings.by_session.remove(&session_id)?;
        if bindings.by_user.get(&user_id).is_some_and(|s| s.id == session_id) {
            bindings.by_user.remove(&user_id);
        }
        Some(user_id)
    }

    pub fn session_for(&self, user_id: UserId) -> Option<SessionHandle> {
        self.lock().by_user.get(&user_id).cloned()
    }

    pub fn user_for(&self, session_id: SessionId) -> Option<UserId> {
        self.lock().by_session.get(&session_id).copied()
    }

    pub fn online_count(&self) -> usize {
        self.lock().by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (SessionHandle, mpsc::Receiver<ServerEvent>) {
        SessionHandle::channel()
    }

    #[test]
    fn newer_registration_supersedes() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = session();
        let (s2, _rx2) = session();

        registry.register(UserId(1), s1.clone());
        registry.register(UserId(1), s2.clone());

        assert_eq!(registry.session_for(UserId(1)).map(|s| s.id()), Some(s2.id()));
        assert_eq!(registry.user_for(s1.id()), None);
        assert_eq!(registry.user_for(s2.id()), Some(UserId(1)));
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn unregistering_a_superseded_session_keeps_the_new_one() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = session();
        let (s2, _rx2) = session();

        registry.register(UserId(1), s1.clone());
        registry.register(UserId(1), s2.clone());

        assert_eq!(registry.unregister(s1.id()), None);
        assert_eq!(registry.session_for(UserId(1)).map(|s| s.id()), Some(s2.id()));

        assert_eq!(registry.unregister(s2.id()), Some(UserId(1)));
        assert!(registry.session_for(UserId(1)).is_none());
        assert_eq!(registry.unregister(s2.id()), None);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = session();
        registry.register(UserId(5), s1.clone());
        registry.register(UserId(5), s1.clone());
        assert_eq!(registry.user_for(s1.id()), Some(UserId(5)));
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn rebinding_a_session_to_another_user_drops_the_old_binding() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = session();
        registry.register(UserId(1), s1.clone());
        registry.register(UserId(2), s1.clone());

        assert!(registry.session_for(UserId(1)).is_none());
        assert_eq!(registry.user_for(s1.id()), Some(UserId(2)));
    }

    #[test]
    fn push_reports_closed_sessions() {
        let (s1, rx1) = session();
        drop(rx1);
        assert!(!s1.push(ServerEvent::success("register", "ok")));
    }

    #[test]
    fn push_drops_once_the_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(2);
        let slow = SessionHandle::new(tx);

        assert!(slow.push(ServerEvent::success("sendMessage", "1")));
        assert!(slow.push(ServerEvent::success("sendMessage", "2")));
        assert!(!slow.push(ServerEvent::success("sendMessage", "3")));

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::success("sendMessage", "1"));
        assert!(slow.push(ServerEvent::success("sendMessage", "4")));
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::success("sendMessage", "2"));
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::success("sendMessage", "4"));
    }
}
