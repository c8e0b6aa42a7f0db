//! Background scheduler driving idle cleanup.
//!
//! Every tick carries the current wall-clock time; actors compare it against
//! their persisted deadline, so a delayed or repeated tick is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::chat::names::DisplayNameCache;
use crate::chat::store::ChatStore;
use crate::rooms::{ChatRooms, NotificationHubs};

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub rooms_ticked: usize,
    pub hubs_ticked: usize,
    pub evicted: usize,
    /// Rooms with an overdue deadline that were not running in this process
    pub woken: usize,
    pub names_purged: usize,
}

pub struct CleanupSweeper {
    rooms: Arc<ChatRooms>,
    hubs: Arc<NotificationHubs>,
    store: Arc<dyn ChatStore>,
    names: Arc<DisplayNameCache>,
}

impl CleanupSweeper {
    pub fn new(
        rooms: Arc<ChatRooms>,
        hubs: Arc<NotificationHubs>,
        store: Arc<dyn ChatStore>,
        names: Arc<DisplayNameCache>,
    ) -> Self {
        Self {
            rooms,
            hubs,
            store,
            names,
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            evicted: self.rooms.evict_stopped() + self.hubs.evict_stopped(),
            ..SweepReport::default()
        };

        for (_, room) in self.rooms.handles() {
            if room.tick(now) {
                report.rooms_ticked += 1;
            }
        }
        for (_, hub) in self.hubs.handles() {
            if hub.tick(now) {
                report.hubs_ticked += 1;
            }
        }

        // Deadlines that outlived the process that set them
        match self.store.due_room_states(now).await {
            Ok(keys) => {
                for key in keys {
                    if self.rooms.get(&key).is_none() && self.rooms.resolve(&key).tick(now) {
                        report.woken += 1;
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to load due room states"),
        }

        report.names_purged = self.names.purge_expired();
        report
    }
}

/// Spawn a background task that sweeps every `interval`.
pub fn spawn_cleanup_sweeper(sweeper: CleanupSweeper, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = sweeper.sweep_once(Utc::now()).await;
            if report.evicted > 0 || report.woken > 0 {
                tracing::info!(
                    evicted = report.evicted,
                    woken = report.woken,
                    "Cleanup sweep"
                );
            } else {
                tracing::debug!(
                    rooms = report.rooms_ticked,
                    hubs = report.hubs_ticked,
                    names_purged = report.names_purged,
                    "Cleanup sweep"
                );
            }
        }
    });
}
