//! WASD token movement relative to the keypad's orientation.

use super::{ListenerError, log_scene_failure};
use crate::controller::{Keypad, TickContext, TickListener};
use crate::geometry::{Vector, deg2rad};
use crate::scene::Directory;
use tracing::{debug, info};

const MOVEMENT_KEYS: [&str; 4] = ["W", "A", "S", "D"];

#[derive(Debug, Default)]
pub struct TokenMovement;

impl TokenMovement {
    pub fn new() -> Self {
        Self
    }

    fn handle_movement(&self, now: u64, keypad: &mut Keypad, directory: &Directory) {
        let Some(player) = keypad.player(directory) else {
            return;
        };
        let Some(token) = directory.token_for(&player.id) else {
            return;
        };

        keypad.sync_repetitions(&MOVEMENT_KEYS, now);
        let rotate_only = keypad.is_down("SHI");
        let mut direction = Vector::default();
        if keypad.is_repeated_down("W", now) {
            direction.y -= 1.0;
        }
        if keypad.is_repeated_down("D", now) {
            direction.x += 1.0;
        }
        if keypad.is_repeated_down("S", now) {
            direction.y += 1.0;
        }
        if keypad.is_repeated_down("A", now) {
            direction.x -= 1.0;
        }
        if direction.length() < 1.0 {
            return;
        }

        let rotation = keypad.rotation(directory.flags());
        let (dx, dy) = direction.rotate(deg2rad(rotation)).round();
        debug!(
            player = %player.name,
            token = %token,
            dx,
            dy,
            rotate_only,
            "{} token",
            if rotate_only { "Rotating" } else { "Moving" }
        );

        let scene = directory.scene();
        let result = scene
            .move_token(&token, dx, dy, rotate_only)
            .and_then(|()| {
                if rotate_only {
                    Ok(())
                } else {
                    scene.move_token(&token, dx, dy, true)
                }
            });
        if let Err(e) = result {
            log_scene_failure(self.name(), keypad.controller_id(), &e);
        }
    }

    /// Turn the keypad a quarter clockwise and face the token along its new north.
    fn rotate_keypad(&self, keypad: &mut Keypad, directory: &Directory) {
        let new_rotation = keypad.rotation(directory.flags()) + 90.0;
        if let Some(token) = keypad.token(directory) {
            let (dx, dy) = Vector::new(0.0, -1.0).rotate(deg2rad(new_rotation)).round();
            if let Err(e) = directory.scene().move_token(&token, dx, dy, true) {
                log_scene_failure(self.name(), keypad.controller_id(), &e);
            }
        }
        match keypad.set_rotation(directory.flags(), new_rotation) {
            Ok(orientation) => info!(
                controller_id = %keypad.controller_id(),
                player = %keypad
                    .player(directory)
                    .map(|p| p.name)
                    .unwrap_or_else(|| "unassigned".to_string()),
                orientation,
                "Keypad orientation changed"
            ),
            Err(e) => log_scene_failure(self.name(), keypad.controller_id(), &e),
        }
    }
}

impl TickListener for TokenMovement {
    fn name(&self) -> &str {
        "token-movement"
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError> {
        let now = ctx.now();
        let directory = ctx.directory();
        for keypad in ctx.keypads() {
            self.handle_movement(now, keypad, directory);
            if keypad.is_down("SHI") && keypad.is_just_down("C", now) {
                self.rotate_keypad(keypad, directory);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::manager::tests::{connect, manager_with, press};
    use crate::scene::SceneHost;
    use crate::scene::memory::SceneEffect;
    use crate::scene::memory::tests::sample_scene;
    use std::sync::Arc;

    fn moved(token: &str, dx: i32, dy: i32, rotate_only: bool) -> SceneEffect {
        SceneEffect::Moved {
            token: token.into(),
            dx,
            dy,
            rotate_only,
        }
    }

    #[test]
    fn test_forward_moves_then_faces() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenMovement::new()));
        connect(&mut manager, "C1");
        press(&mut manager, "C1", "W", "down");
        manager.tick(1_000);
        assert_eq!(
            scene.take_effects(),
            vec![moved("t1", 0, -1, false), moved("t1", 0, -1, true)]
        );
        assert_eq!(scene.token_bounds("t1").unwrap().y, 0.0);
    }

    #[test]
    fn test_held_key_repeats_after_interval() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenMovement::new()));
        connect(&mut manager, "C1");
        press(&mut manager, "C1", "D", "down");
        manager.tick(1_000);
        manager.tick(1_100);
        manager.tick(1_200);
        assert_eq!(scene.take_effects().len(), 2);
        manager.tick(1_251);
        assert_eq!(scene.take_effects(), vec![moved("t1", 1, 0, false), moved("t1", 1, 0, true)]);
    }

    #[test]
    fn test_shift_only_rotates() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenMovement::new()));
        connect(&mut manager, "C1");
        press(&mut manager, "C1", "SHI", "down");
        press(&mut manager, "C1", "S", "down");
        manager.tick(1_000);
        assert_eq!(scene.take_effects(), vec![moved("t1", 0, 1, true)]);
        assert_eq!(scene.token_bounds("t1").unwrap().y, 100.0);
        assert_eq!(scene.token_rotation("t1"), Some(180.0));
    }

    #[test]
    fn test_movement_follows_keypad_rotation() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenMovement::new()));
        connect(&mut manager, "C1");
        let keypad = manager.keypad("C1").unwrap();
        keypad
            .set_rotation(manager.directory().flags(), 90.0)
            .unwrap();
        press(&mut manager, "C1", "W", "down");
        manager.tick(1_000);
        assert_eq!(scene.take_effects()[0], moved("t1", 1, 0, false));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_shift_c_rotates_keypad() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenMovement::new()));
        connect(&mut manager, "C1");
        press(&mut manager, "C1", "SHI", "down");
        press(&mut manager, "C1", "C", "down");
        manager.tick(1_000);
        manager.tick(1_016);
        assert_eq!(scene.take_effects(), vec![moved("t1", 1, 0, true)]);
        let keypad = manager.keypad("C1").unwrap();
        assert_eq!(keypad.rotation(manager.directory().flags()), 90.0);
        assert!(logs_contain("Keypad orientation changed"));
    }

    #[test]
    fn test_keypad_without_player_does_nothing() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenMovement::new()));
        connect(&mut manager, "C7");
        press(&mut manager, "C7", "W", "down");
        manager.tick(1_000);
        assert!(scene.effects().is_empty());
    }
}
