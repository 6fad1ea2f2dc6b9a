use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use crate::{
    model::ConversationId,
    registry::{SessionHandle, SessionId},
};

use super::ServerEvent;

/// Broadcast groups keyed by conversation id.
#[derive(Default)]
pub struct Rooms {
    members: Mutex<HashMap<ConversationId, HashMap<SessionId, SessionHandle>>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, HashMap<SessionId, SessionHandle>>> {
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn join(&self, conversation_id: ConversationId, session: SessionHandle) {
        self.lock()
            .entry(conversation_id)
            .or_default()
            .insert(session.id(), session);
    }

    pub fn leave_all(&self, session_id: SessionId) {
        let mut members = self.lock();
        members.retain(|_, room| {
            room.remove(&session_id);
            !room.is_empty()
        });
    }

    /// Pushes to everyone in the room except `skip`. Returns how many sessions
    /// took the event; sessions that have gone away are dropped from the room.
    pub fn broadcast(&self, conversation_id: ConversationId, event: &ServerEvent, skip: Option<SessionId>) -> usize {
        let mut members = self.lock();
        let Some(room) = members.get_mut(&conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        room.retain(|id, session| {
            if Some(*id) == skip {
                return true;
            }
            let alive = session.push(event.clone());
            delivered += usize::from(alive);
            alive
        });
        if room.is_empty() {
            members.remove(&conversation_id);
        }
        delivered
    }

    pub fn size(&self, conversation_id: ConversationId) -> usize {
        self.lock().get(&conversation_id).map_or(0, HashMap::len)
    }
}
