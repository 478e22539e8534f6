//! Self-contained scene used when no external host is attached.
//!
//! Seeded from the `[scene]` config table. Every mutation is applied to the
//! in-memory state and also appended to an effect log so callers can observe
//! what the keypads did.

use super::{
    CombatEvent, CombatState, Combatant, Door, FrameSource, LightParams, Player, SceneFrame,
    SceneHost,
};
use crate::error::AppError;
use crate::geometry::Bounds;
use crate::protocol::Rgb;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Largest frame edge, in grid cells, rendered for the LED ring.
const MAX_FRAME_CELLS: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum SceneEffect {
    Moved {
        token: String,
        dx: i32,
        dy: i32,
        rotate_only: bool,
    },
    Light {
        token: String,
        light: LightParams,
    },
    DoorToggled {
        door: String,
        open: bool,
    },
    TurnAdvanced {
        round: u32,
        turn: usize,
    },
}

#[derive(Debug, Clone)]
struct TokenState {
    name: String,
    owners: Vec<String>,
    bounds: Bounds,
    /// Facing in degrees, 0 = north.
    rotation: f64,
    light: LightParams,
}

#[derive(Debug, Default)]
struct SceneState {
    players: Vec<Player>,
    characters: HashMap<String, String>,
    tokens: BTreeMap<String, TokenState>,
    doors: Vec<Door>,
    combat: Option<CombatState>,
    effects: Vec<SceneEffect>,
    combat_listeners: Vec<mpsc::UnboundedSender<CombatEvent>>,
}

impl SceneState {
    fn publish(&mut self, event: CombatEvent) {
        self.combat_listeners
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// One pixel per grid cell, coloured by the first owner of the token
    /// covering the cell centre. `None` while the scene has no tokens.
    fn render(&self, grid_size: f64, background: Rgb) -> Option<SceneFrame> {
        let (right, bottom) = self.tokens.values().fold((0.0f64, 0.0f64), |(r, b), t| {
            (
                r.max(t.bounds.x + t.bounds.width),
                b.max(t.bounds.y + t.bounds.height),
            )
        });
        if right <= 0.0 || bottom <= 0.0 {
            return None;
        }
        let cells = |extent: f64| ((extent / grid_size).ceil() as usize).clamp(1, MAX_FRAME_CELLS);
        let (width, height) = (cells(right), cells(bottom));

        let mut pixels = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            let cy = (y as f64 + 0.5) * grid_size;
            for x in 0..width {
                let cx = (x as f64 + 0.5) * grid_size;
                let color = self
                    .tokens
                    .values()
                    .find(|t| {
                        let b = &t.bounds;
                        cx >= b.x && cx < b.x + b.width && cy >= b.y && cy < b.y + b.height
                    })
                    .and_then(|t| t.owners.first())
                    .and_then(|owner| self.players.iter().find(|p| &p.id == owner))
                    .map_or(background, |p| p.color);
                pixels.extend_from_slice(&[color.r, color.g, color.b, 255]);
            }
        }
        Some(SceneFrame {
            width,
            height,
            pixels,
        })
    }
}

#[derive(Debug)]
pub struct InMemoryScene {
    grid_size: f64,
    background: Rgb,
    state: Mutex<SceneState>,
}

impl InMemoryScene {
    pub fn new(grid_size: f64, background: Rgb) -> Self {
        Self {
            grid_size,
            background,
            state: Mutex::new(SceneState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SceneState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("scene state poisoned".into()))
    }

    fn with_state<T: Default>(&self, f: impl FnOnce(&SceneState) -> T) -> T {
        match self.state.lock() {
            Ok(guard) => f(&guard),
            Err(_) => T::default(),
        }
    }

    pub fn add_player(&self, player: Player, character: Option<String>) -> Result<(), AppError> {
        let mut state = self.state()?;
        if let Some(token) = character {
            state.characters.insert(player.id.clone(), token);
        }
        state.players.retain(|p| p.id != player.id);
        state.players.push(player);
        Ok(())
    }

    pub fn add_token(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        owners: Vec<String>,
        bounds: Bounds,
    ) -> Result<(), AppError> {
        let mut state = self.state()?;
        state.tokens.insert(
            id.into(),
            TokenState {
                name: name.into(),
                owners,
                bounds,
                rotation: 0.0,
                light: LightParams::off(),
            },
        );
        Ok(())
    }

    pub fn add_door(&self, door: Door) -> Result<(), AppError> {
        let mut state = self.state()?;
        state.doors.retain(|d| d.id != door.id);
        state.doors.push(door);
        Ok(())
    }

    /// Start an encounter in round 1 with the first combatant acting.
    pub fn start_combat(&self, turns: Vec<Combatant>) -> Result<(), AppError> {
        let mut state = self.state()?;
        let combat = CombatState {
            started: true,
            round: 1,
            turn: 0,
            turns,
        };
        info!(combatants = combat.turns.len(), "Combat started");
        state.combat = Some(combat.clone());
        state.publish(CombatEvent::Updated {
            combat,
            round: Some(1),
            turn: Some(0),
        });
        Ok(())
    }

    #[cfg(test)]
    pub fn end_combat(&self) -> Result<(), AppError> {
        let mut state = self.state()?;
        if state.combat.take().is_some() {
            info!("Combat ended");
            state.publish(CombatEvent::Ended);
        }
        Ok(())
    }

    pub fn effects(&self) -> Vec<SceneEffect> {
        self.with_state(|s| s.effects.clone())
    }

    pub fn take_effects(&self) -> Vec<SceneEffect> {
        match self.state.lock() {
            Ok(mut guard) => std::mem::take(&mut guard.effects),
            Err(_) => Vec::new(),
        }
    }

    pub fn token_rotation(&self, token_id: &str) -> Option<f64> {
        self.with_state(|s| s.tokens.get(token_id).map(|t| t.rotation))
    }

    pub fn token_light(&self, token_id: &str) -> Option<LightParams> {
        self.with_state(|s| s.tokens.get(token_id).map(|t| t.light.clone()))
    }

    pub fn door_open(&self, door_id: &str) -> Option<bool> {
        self.with_state(|s| s.doors.iter().find(|d| d.id == door_id).map(|d| d.open))
    }
}

impl SceneHost for InMemoryScene {
    fn players(&self) -> Vec<Player> {
        self.with_state(|s| s.players.clone())
    }

    fn find_tokens_for(&self, player_id: &str) -> Vec<String> {
        self.with_state(|s| {
            s.tokens
                .iter()
                .filter(|(_, t)| t.owners.iter().any(|o| o == player_id))
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    fn character_token(&self, player_id: &str) -> Option<String> {
        self.with_state(|s| s.characters.get(player_id).cloned())
    }

    fn token_exists(&self, token_id: &str) -> bool {
        self.with_state(|s| s.tokens.contains_key(token_id))
    }

    fn token_bounds(&self, token_id: &str) -> Option<Bounds> {
        self.with_state(|s| s.tokens.get(token_id).map(|t| t.bounds))
    }

    fn token_emits_light(&self, token_id: &str) -> bool {
        self.with_state(|s| s.tokens.get(token_id).is_some_and(|t| t.light.is_lit()))
    }

    fn grid_size(&self) -> f64 {
        self.grid_size
    }

    fn doors(&self) -> Vec<Door> {
        self.with_state(|s| s.doors.clone())
    }

    fn move_token(
        &self,
        token_id: &str,
        dx: i32,
        dy: i32,
        rotate_only: bool,
    ) -> Result<(), AppError> {
        let grid = self.grid_size;
        let mut state = self.state()?;
        let token = state
            .tokens
            .get_mut(token_id)
            .ok_or_else(|| AppError::Internal(format!("unknown token {token_id}")))?;
        if dx != 0 || dy != 0 {
            token.rotation = (dx as f64).atan2(-(dy as f64)).to_degrees().rem_euclid(360.0);
        }
        if !rotate_only {
            token.bounds.x += dx as f64 * grid;
            token.bounds.y += dy as f64 * grid;
        }
        debug!(token = %token.name, dx, dy, rotate_only, "Token moved");
        state.effects.push(SceneEffect::Moved {
            token: token_id.to_string(),
            dx,
            dy,
            rotate_only,
        });
        Ok(())
    }

    fn set_token_light(&self, token_id: &str, light: &LightParams) -> Result<(), AppError> {
        let mut state = self.state()?;
        let token = state
            .tokens
            .get_mut(token_id)
            .ok_or_else(|| AppError::Internal(format!("unknown token {token_id}")))?;
        token.light = light.clone();
        state.effects.push(SceneEffect::Light {
            token: token_id.to_string(),
            light: light.clone(),
        });
        Ok(())
    }

    fn toggle_door(&self, door_id: &str) -> Result<(), AppError> {
        let mut state = self.state()?;
        let door = state
            .doors
            .iter_mut()
            .find(|d| d.id == door_id)
            .ok_or_else(|| AppError::Internal(format!("unknown door {door_id}")))?;
        door.open = !door.open;
        let open = door.open;
        state.effects.push(SceneEffect::DoorToggled {
            door: door_id.to_string(),
            open,
        });
        Ok(())
    }

    fn combat(&self) -> Option<CombatState> {
        self.with_state(|s| s.combat.clone())
    }

    fn next_turn(&self) -> Result<(), AppError> {
        let mut state = self.state()?;
        let Some(combat) = state.combat.as_mut() else {
            return Err(AppError::Internal("no active combat".into()));
        };
        let mut new_round = None;
        combat.turn += 1;
        if combat.turn >= combat.turns.len() {
            combat.turn = 0;
            combat.round += 1;
            new_round = Some(combat.round);
        }
        let snapshot = combat.clone();
        state.effects.push(SceneEffect::TurnAdvanced {
            round: snapshot.round,
            turn: snapshot.turn,
        });
        let turn = Some(snapshot.turn);
        state.publish(CombatEvent::Updated {
            combat: snapshot,
            round: new_round,
            turn,
        });
        Ok(())
    }

    fn subscribe_combat(&self) -> mpsc::UnboundedReceiver<CombatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.state.lock() {
            state.combat_listeners.push(tx);
        }
        rx
    }
}

impl FrameSource for InMemoryScene {
    fn capture(&self) -> Option<SceneFrame> {
        self.with_state(|s| s.render(self.grid_size, self.background))
    }

    fn background(&self) -> Rgb {
        self.background
    }
}
