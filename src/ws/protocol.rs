//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client identifier assigned by the transport on connect
pub type ClientId = Uuid;

/// Score table keyed by client id (serialized as a JSON object)
pub type ScoreTable = BTreeMap<ClientId, u32>;

/// Held movement keys, replaced wholesale on every MOVE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveKeys {
    pub left: bool,
    pub right: bool,
    /// Jetpack thrust
    pub up: bool,
    pub crouch: bool,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMsg {
    /// Replace the held-key snapshot and aim
    Move {
        #[serde(default)]
        keys: MoveKeys,
        /// Aim direction in radians
        #[serde(default, rename = "gunAngle")]
        gun_angle: f32,
    },

    /// Fire one bullet along the current aim
    Shoot,

    /// Jump if standing on something
    Jump,

    /// Start a reload
    Reload,

    /// Any other `type`; logged and ignored by the room
    #[serde(other)]
    Unknown,
}

impl ClientMsg {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMsg::Move { .. } => "MOVE",
            ClientMsg::Shoot => "SHOOT",
            ClientMsg::Jump => "JUMP",
            ClientMsg::Reload => "RELOAD",
            ClientMsg::Unknown => "UNKNOWN",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMsg {
    /// Sent once the WebSocket is accepted into a room
    Connected { client_id: ClientId, room_id: String },

    /// Full room state, unicast to a joining player
    InitialGameState {
        environment: EnvironmentSnapshot,
        players: Vec<PlayerSnapshot>,
        bullets: Vec<BulletSnapshot>,
        scores: ScoreTable,
        round_time: u32,
        room_id: String,
    },

    PlayerJoined { player: PlayerSnapshot, room_id: String },

    PlayerLeft { client_id: ClientId },

    BulletCreated { bullet: BulletSnapshot },

    BulletDestroyed { bullet_id: u64 },

    /// Periodic state diff: changed players and every live bullet
    GameState {
        players: Vec<PlayerSnapshot>,
        bullets: Vec<BulletSnapshot>,
        timestamp: u64,
    },

    PlayerHit {
        target_id: ClientId,
        shooter_id: ClientId,
        damage: f32,
        health: f32,
    },

    PlayerDeath {
        player_id: ClientId,
        killer_id: ClientId,
        scores: ScoreTable,
    },

    PlayerRespawned { player_id: ClientId, player: PlayerSnapshot },

    /// Seconds left in the round, once per second
    RoundTime { round_time: u32 },

    RoundEnd { scores: ScoreTable, ranking: Vec<RankEntry> },

    RoundStart { round_time: u32 },

    /// Error message
    Error { code: String, message: String },
}

/// Player state as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: ClientId,
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    /// Health (0-100)
    pub health: f32,
    pub is_dead: bool,
    pub is_crouching: bool,
    pub is_using_jetpack: bool,
    pub gun_angle: f32,
    pub ammo: u32,
    pub is_reloading: bool,
    /// Jetpack fuel (0-100)
    pub jetpack_fuel: f32,
    pub on_ground: bool,
}

/// A point on a bullet's recent path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub x: f32,
    pub y: f32,
}

/// Bullet state as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletSnapshot {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub owner_id: ClientId,
    /// At most the last 3 positions
    pub trail: Vec<TrailPoint>,
    pub active: bool,
}

/// Axis-aligned obstacle, top-left anchored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Static world description sent on join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    pub base_width: f32,
    pub base_height: f32,
    pub world_width: f32,
    pub world_height: f32,
    pub ground_level: f32,
    pub obstacles: Vec<Obstacle>,
}

/// One row of the end-of-round ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub rank: u32,
    pub client_id: ClientId,
    pub score: u32,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn move_decodes_from_wire_shape() {
        let raw = r#"{"type":"MOVE","keys":{"left":true,"right":false,"up":true,"crouch":false},
                     "gunAngle":1.5}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Move {
                keys: MoveKeys {
                    left: true,
                    right: false,
                    up: true,
                    crouch: false
                },
                gun_angle: 1.5
            }
        );
    }

    #[test]
    fn bare_commands_decode() {
        for (raw, expected) in [
            (r#"{"type":"SHOOT"}"#, ClientMsg::Shoot),
            (r#"{"type":"JUMP"}"#, ClientMsg::Jump),
            (r#"{"type":"RELOAD"}"#, ClientMsg::Reload),
        ] {
            assert_eq!(serde_json::from_str::<ClientMsg>(raw).unwrap(), expected);
        }
    }

    #[test]
    fn unrecognised_type_maps_to_unknown() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"TELEPORT","x":5}"#).unwrap();
        assert_eq!(msg, ClientMsg::Unknown);
    }

    #[test]
    fn missing_keys_default_to_released() {
        let raw = r#"{"type":"MOVE","keys":{"left":true}}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::Move { keys, gun_angle } => {
                assert!(keys.left && !keys.right && !keys.up && !keys.crouch);
                assert_eq!(gun_angle, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_messages_use_screaming_type_and_camel_fields() {
        let msg = ServerMsg::BulletDestroyed { bullet_id: 7 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "BULLET_DESTROYED", "bulletId": 7})
        );

        let msg = ServerMsg::RoundTime { round_time: 42 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "ROUND_TIME", "roundTime": 42})
        );
    }

    #[test]
    fn player_snapshot_field_names() {
        let snapshot = PlayerSnapshot {
            id: Uuid::nil(),
            x: 1.0,
            y: 2.0,
            velocity_x: 0.0,
            velocity_y: 0.0,
            health: 100.0,
            is_dead: false,
            is_crouching: false,
            is_using_jetpack: false,
            gun_angle: 0.0,
            ammo: 25,
            is_reloading: false,
            jetpack_fuel: 100.0,
            on_ground: true,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        for key in [
            "velocityX",
            "velocityY",
            "isDead",
            "isCrouching",
            "isUsingJetpack",
            "gunAngle",
            "isReloading",
            "jetpackFuel",
            "onGround",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
