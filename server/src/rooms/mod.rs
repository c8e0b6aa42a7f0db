//! Actor-per-key rooms: one chat room per conversation, one notification hub
//! per business. Each actor is a tokio task draining an unbounded mailbox, so
//! its registry and durable state are only ever touched by that task.

pub mod chat_room;
pub mod directory;
pub mod notification_hub;
pub mod rate_limit;
pub mod sweeper;

use std::time::Duration;

use crate::config::RoomsConfig;
use crate::ws::protocol::DispatchLimits;

pub use chat_room::{ChatRoomHandle, ChatRoomSpawner};
pub use directory::{ActorDirectory, ActorHandle, Spawn};
pub use notification_hub::{HubHandle, HubSpawner};

pub type ChatRooms = ActorDirectory<ChatRoomSpawner>;
pub type NotificationHubs = ActorDirectory<HubSpawner>;

/// Upper bound for configured lifetimes. Larger values are clamped so
/// deadline and expiry arithmetic cannot overflow.
pub const MAX_CONFIGURED_SECS: u64 = 30 * 24 * 60 * 60;

fn clamped_secs(secs: u64) -> u64 {
    secs.min(MAX_CONFIGURED_SECS)
}

/// Runtime form of the `[rooms]` config section.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub idle_cleanup: chrono::Duration,
    pub sweep_interval: Duration,
    pub backlog_limit: u32,
    pub max_page_limit: u32,
    pub max_content_length: usize,
    pub notify_timeout: Duration,
    pub display_name_ttl: Duration,
    pub max_messages_per_window: u32,
    pub rate_window: Duration,
}

impl RoomSettings {
    pub fn from_config(config: &RoomsConfig) -> Self {
        Self {
            idle_cleanup: chrono::Duration::seconds(clamped_secs(config.idle_cleanup_secs) as i64),
            sweep_interval: Duration::from_secs(clamped_secs(config.sweep_interval_secs).max(1)),
            backlog_limit: config.backlog_limit.max(1),
            max_page_limit: config.max_page_limit.max(1),
            max_content_length: config.max_content_length,
            notify_timeout: Duration::from_millis(config.notify_timeout_ms),
            display_name_ttl: Duration::from_secs(clamped_secs(config.display_name_ttl_secs)),
            max_messages_per_window: config.max_messages_per_window,
            rate_window: Duration::from_secs(config.rate_window_secs),
        }
    }

    pub fn dispatch_limits(&self) -> DispatchLimits {
        DispatchLimits {
            default_page_limit: self.backlog_limit.min(self.max_page_limit),
            max_page_limit: self.max_page_limit,
            max_content_length: self.max_content_length,
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from_config(&RoomsConfig::default())
    }
}
