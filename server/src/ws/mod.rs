pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;

use std::fmt;
use tokio::sync::mpsc;

use crate::db::models::Role;

/// Type alias for the sender half of a WebSocket connection's channel.
/// The owning actor clones this into its registry to push frames to the client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Participant identifier, rendered as `"<role>:<userId>"` (e.g. `admin:42`).
/// At most one live connection per identifier within an actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId {
    pub role: Role,
    pub user_id: String,
}

impl ParticipantId {
    pub fn new(role: Role, user_id: impl Into<String>) -> Self {
        Self {
            role,
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role.prefix(), self.user_id)
    }
}
