//! Room registry - owns every live room and drives each one on its own task

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::ws::protocol::{ClientId, ClientMsg};

use super::room::{Outbound, Room, RoomSettings, RoomStats};

/// Room used when the client does not name one
pub const DEFAULT_ROOM: &str = "default";

/// Max players per room
pub const MAX_PLAYERS_PER_ROOM: usize = 8;

/// Idle wait when a room has no pending timers
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Commands accepted by a room task
pub enum RoomCommand {
    Join {
        client_id: ClientId,
        name: String,
        outbound: Box<dyn Outbound>,
    },
    Leave {
        client_id: ClientId,
    },
    Input {
        client_id: ClientId,
        msg: ClientMsg,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
    Shutdown,
}

/// Join rejections
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Room {room_id} is full ({max} players)")]
    RoomFull { room_id: String, max: usize },

    #[error("Room {0} is shutting down")]
    RoomClosed(String),
}

impl JoinError {
    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::RoomFull { .. } => "ROOM_FULL",
            JoinError::RoomClosed(_) => "ROOM_CLOSED",
        }
    }
}

/// Handle to a running room
#[derive(Clone, Debug)]
pub struct RoomHandle {
    pub id: String,
    tx: mpsc::Sender<RoomCommand>,
    /// Players in the room plus joins in flight
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Forward a decoded client command; false once the room is gone
    pub async fn input(&self, client_id: ClientId, msg: ClientMsg) -> bool {
        self.tx
            .send(RoomCommand::Input { client_id, msg })
            .await
            .is_ok()
    }

    pub async fn stats(&self) -> Option<RoomStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RoomCommand::Stats { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    settings: RoomSettings,
    max_players: usize,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings, max_players: usize) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            settings,
            max_players: max_players.max(1),
        }
    }

    pub fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Join `room_id`, creating the room on first use
    pub async fn join(
        &self,
        room_id: &str,
        client_id: ClientId,
        name: String,
        outbound: Box<dyn Outbound>,
    ) -> Result<RoomHandle, JoinError> {
        let handle = {
            let entry = self
                .rooms
                .entry(room_id.to_string())
                .or_insert_with(|| self.spawn_room(room_id));

            // Reserve the slot under the shard lock so a concurrent last-leave
            // cannot tear the room down underneath us.
            let count = entry.player_count.load(Ordering::Relaxed);
            if count >= self.max_players {
                return Err(JoinError::RoomFull {
                    room_id: room_id.to_string(),
                    max: self.max_players,
                });
            }
            entry.player_count.fetch_add(1, Ordering::Relaxed);
            entry.value().clone()
        };

        let join = RoomCommand::Join {
            client_id,
            name,
            outbound,
        };
        if handle.tx.send(join).await.is_err() {
            handle.player_count.fetch_sub(1, Ordering::Relaxed);
            return Err(JoinError::RoomClosed(room_id.to_string()));
        }

        Ok(handle)
    }

    /// Leave a room; the room task tears itself down once it is empty
    pub async fn leave(&self, room_id: &str, client_id: ClientId) {
        let Some(handle) = self.get(room_id) else {
            debug!(room_id = %room_id, client_id = %client_id, "Leave for unknown room");
            return;
        };
        if handle.tx.send(RoomCommand::Leave { client_id }).await.is_err() {
            debug!(room_id = %room_id, client_id = %client_id, "Room already closed");
        }
    }

    /// Statistics for every live room
    pub async fn stats(&self) -> Vec<RoomStats> {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|r| r.value().clone()).collect();

        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(room_stats) = handle.stats().await {
                stats.push(room_stats);
            }
        }
        stats.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        stats
    }

    /// Stop every room and wait for its timers to be torn down
    pub async fn shutdown_all(&self) {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|r| r.value().clone()).collect();
        self.rooms.clear();

        info!(rooms = handles.len(), "Shutting down all rooms");

        for handle in &handles {
            let _ = handle.tx.send(RoomCommand::Shutdown).await;
        }
        for handle in handles {
            handle.tx.closed().await;
        }
    }

    fn spawn_room(&self, room_id: &str) -> RoomHandle {
        let (tx, rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: room_id.to_string(),
            tx,
            player_count: player_count.clone(),
        };

        let room = Room::new(room_id, self.settings.clone());
        let rooms = self.rooms.clone();
        info!(room_id = %room_id, "Room created");
        tokio::spawn(run_room(room, rx, player_count, rooms));

        handle
    }
}

/// Drive one room: apply commands as they arrive and fire its timers against
/// wall time elapsed since the task started.
async fn run_room(
    mut room: Room,
    mut rx: mpsc::Receiver<RoomCommand>,
    player_count: Arc<AtomicUsize>,
    rooms: Arc<DashMap<String, RoomHandle>>,
) {
    let start = Instant::now();

    loop {
        let wake_at = start + room.next_deadline().unwrap_or_else(|| room.now() + IDLE_WAIT);

        let command = tokio::select! {
            cmd = rx.recv() => cmd,
            _ = sleep_until(wake_at) => {
                room.advance_to(start.elapsed());
                continue;
            }
        };

        let Some(command) = command else {
            break;
        };

        room.advance_to(start.elapsed());

        match command {
            RoomCommand::Join {
                client_id,
                name,
                outbound,
            } => {
                let before = room.player_count();
                room.add_player(client_id, outbound, name);
                if room.player_count() == before {
                    // Reconnect under the same id: the reserved slot is not needed.
                    player_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
            RoomCommand::Leave { client_id } => {
                if room.remove_player(client_id) {
                    player_count.fetch_sub(1, Ordering::Relaxed);
                }

                if room.is_empty() {
                    let removed = rooms.remove_if(room.id(), |_, h| {
                        Arc::ptr_eq(&h.player_count, &player_count) && h.player_count() == 0
                    });
                    if removed.is_some() {
                        break;
                    }
                }
            }
            RoomCommand::Input { client_id, msg } => {
                room.handle_player_input(client_id, msg);
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(room.stats());
            }
            RoomCommand::Shutdown => {
                if !room.is_empty() {
                    warn!(
                        room_id = %room.id(),
                        players = room.player_count(),
                        "Shutting down room with players"
                    );
                }
                break;
            }
        }
    }

    room.destroy();
}
