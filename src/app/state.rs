//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let rooms = Arc::new(RoomRegistry::new(
            config.room.clone(),
            config.max_players_per_room,
        ));

        Self {
            config: Arc::new(config),
            rooms,
        }
    }
}
