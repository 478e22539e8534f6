//! Boundary to the shared scene the keypads act on.
//!
//! The relay never owns the scene. Everything it reads or mutates goes through
//! [`SceneHost`], persistent per-user state goes through [`FlagStore`], and the
//! rendered view used for the LED ring comes from a [`FrameSource`]. The
//! [`Directory`] bundles these with the player to controller mappings and
//! answers the "which player / which token" questions features ask every tick.

pub mod directory;
pub mod flags;
pub mod memory;

use crate::error::AppError;
use crate::geometry::Bounds;
use crate::protocol::Rgb;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use directory::Directory;
pub use flags::{FlagStore, JsonFileFlags, MemoryFlags};
pub use memory::InMemoryScene;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Door {
    pub id: String,
    pub bounds: Bounds,
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightAnimation {
    #[serde(rename = "type")]
    pub kind: String,
    pub speed: u8,
    pub intensity: u8,
}

/// Light emitted by a token. `bright == 0 && dim == 0` means dark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightParams {
    pub bright: f64,
    pub dim: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<LightAnimation>,
}

impl LightParams {
    pub fn off() -> Self {
        Self {
            bright: 0.0,
            dim: 0.0,
            alpha: None,
            color: None,
            animation: None,
        }
    }

    pub fn is_lit(&self) -> bool {
        self.bright > 0.0 || self.dim > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Players with owner-level permission on the combatant's actor.
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub defeated: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CombatState {
    pub started: bool,
    pub round: u32,
    /// Index into `turns`.
    pub turn: usize,
    pub turns: Vec<Combatant>,
}

impl CombatState {
    pub fn is_active(&self) -> bool {
        self.started && !self.turns.is_empty()
    }

    pub fn current(&self) -> Option<&Combatant> {
        self.turns.get(self.turn)
    }
}

/// Changes to the tracked combat, pushed by the scene host.
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    /// `round` is set when the update started a new round.
    Updated {
        combat: CombatState,
        round: Option<u32>,
        turn: Option<usize>,
    },
    Ended,
}

/// RGBA pixels of the rendered scene, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl SceneFrame {
    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let base = (x + y * self.width) * 4;
        let px = self.pixels.get(base..base + 3)?;
        Some(Rgb::new(px[0], px[1], px[2]))
    }
}

pub trait SceneHost: Send + Sync {
    fn players(&self) -> Vec<Player>;
    /// Tokens the player owns, ordered by id.
    fn find_tokens_for(&self, player_id: &str) -> Vec<String>;
    fn character_token(&self, player_id: &str) -> Option<String>;
    fn token_exists(&self, token_id: &str) -> bool;
    fn token_bounds(&self, token_id: &str) -> Option<Bounds>;
    fn token_emits_light(&self, token_id: &str) -> bool;
    fn grid_size(&self) -> f64;
    fn doors(&self) -> Vec<Door>;
    /// Shift by whole grid steps, or only turn to face the direction.
    fn move_token(&self, token_id: &str, dx: i32, dy: i32, rotate_only: bool)
    -> Result<(), AppError>;
    fn set_token_light(&self, token_id: &str, light: &LightParams) -> Result<(), AppError>;
    fn toggle_door(&self, door_id: &str) -> Result<(), AppError>;
    fn combat(&self) -> Option<CombatState>;
    fn next_turn(&self) -> Result<(), AppError>;
    /// Subscribe to combat changes. Every call returns an independent stream.
    fn subscribe_combat(&self) -> mpsc::UnboundedReceiver<CombatEvent>;
}

pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Option<SceneFrame>;
    /// Colour of the empty scene, skipped when sampling.
    fn background(&self) -> Rgb;
}
