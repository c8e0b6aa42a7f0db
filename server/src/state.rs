use std::sync::Arc;

use crate::chat::names::DisplayNameCache;
use crate::chat::store::{ChatStore, SqliteChatStore};
use crate::db::DbPool;
use crate::rooms::chat_room::RoomContext;
use crate::rooms::{ChatRoomSpawner, ChatRooms, HubSpawner, NotificationHubs, RoomSettings};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Persistence collaborator used by rooms and REST handlers
    pub store: Arc<dyn ChatStore>,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// One chat room actor per conversation
    pub rooms: Arc<ChatRooms>,
    /// One notification hub actor per business
    pub hubs: Arc<NotificationHubs>,
    pub names: Arc<DisplayNameCache>,
    pub settings: RoomSettings,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, settings: RoomSettings) -> Self {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(db.clone()));
        let names = Arc::new(DisplayNameCache::new(store.clone(), settings.display_name_ttl));
        let hubs = Arc::new(NotificationHubs::new(HubSpawner::new(settings.idle_cleanup)));
        let context = Arc::new(RoomContext::new(
            store.clone(),
            names.clone(),
            hubs.clone(),
            settings.clone(),
        ));
        let rooms = Arc::new(ChatRooms::new(ChatRoomSpawner::new(context)));

        Self {
            db,
            store,
            jwt_secret,
            rooms,
            hubs,
            names,
            settings,
        }
    }
}
