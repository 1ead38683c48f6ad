//! Game simulation modules

pub mod bullet;
pub mod environment;
pub mod player;
pub mod registry;
pub mod room;
pub mod scheduler;
pub mod snapshot;

pub use registry::{JoinError, RoomHandle, RoomRegistry};
pub use room::{Outbound, Room, RoomSettings, RoomStats, SendError};
