//! Per-actor table of live sockets keyed by participant identifier.
//!
//! Owned by exactly one actor, so it needs no locking. Sends are best-effort:
//! an entry whose channel is gone is dropped on the first failed send.

use axum::extract::ws::{CloseFrame, Message};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::models::Role;
use crate::ws::{ConnectionSender, ParticipantId};

/// Close code sent to a socket that was replaced by a reconnect.
pub const CLOSE_REPLACED: u16 = 4000;

/// A live socket: the writer-task channel plus a per-connection id, so a stale
/// close can be told apart from the connection that replaced it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
        }
    }

    /// Queue a frame for the writer task. False once the connection is gone.
    pub fn send(&self, msg: Message) -> bool {
        self.sender.send(msg).is_ok()
    }

    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.sender.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ParticipantId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. The replaced socket, if any, is told to close.
    pub fn add(&mut self, id: ParticipantId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let new_id = handle.id;
        let previous = self.entries.insert(id.clone(), handle);
        if let Some(old) = &previous {
            if old.id != new_id {
                tracing::debug!(participant = %id, "Replacing stale connection");
                old.close(CLOSE_REPLACED, "Replaced by a newer connection");
            }
        }
        previous
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<ConnectionHandle> {
        self.entries.remove(id)
    }

    /// Remove `id` only if it still maps to `connection_id`.
    pub fn remove_if_current(&mut self, id: &ParticipantId, connection_id: Uuid) -> bool {
        match self.entries.get(id) {
            Some(handle) if handle.id == connection_id => {
                self.entries.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&ConnectionHandle> {
        self.entries.get(id)
    }

    /// Direct send; a failed send drops the entry.
    pub fn send_to(&mut self, id: &ParticipantId, msg: Message) -> bool {
        let Some(handle) = self.entries.get(id) else {
            return false;
        };
        if handle.send(msg) {
            true
        } else {
            tracing::debug!(participant = %id, "Pruning dead connection");
            self.entries.remove(id);
            false
        }
    }

    /// Send to every entry, returning how many sends succeeded.
    pub fn broadcast(&mut self, msg: &Message) -> usize {
        self.fan_out(msg, |_| true)
    }

    pub fn broadcast_except(&mut self, msg: &Message, excluded: &ParticipantId) -> usize {
        self.fan_out(msg, |id| id != excluded)
    }

    fn fan_out(&mut self, msg: &Message, include: impl Fn(&ParticipantId) -> bool) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, handle) in &self.entries {
            if !include(id) {
                continue;
            }
            if handle.send(msg.clone()) {
                delivered += 1;
            } else {
                dead.push(id.clone());
            }
        }
        for id in dead {
            tracing::debug!(participant = %id, "Pruning dead connection");
            self.entries.remove(&id);
        }
        delivered
    }

    pub fn contains_role(&self, role: Role) -> bool {
        self.entries.keys().any(|id| id.role == role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
