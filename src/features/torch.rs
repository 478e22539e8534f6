use super::{ListenerError, log_scene_failure};
use crate::controller::{Keypad, TickContext, TickListener};
use crate::protocol::Rgb;
use crate::scene::{Directory, LightAnimation, LightParams};
use tracing::debug;

const TORCH_BRIGHT: f64 = 20.0;
const TORCH_DIM: f64 = 40.0;
const TORCH_ALPHA: f64 = 0.4;
const TORCH_COLOR: Rgb = Rgb::new(0xff, 0xad, 0x58);

pub fn torch_light() -> LightParams {
    LightParams {
        bright: TORCH_BRIGHT,
        dim: TORCH_DIM,
        alpha: Some(TORCH_ALPHA),
        color: Some(TORCH_COLOR),
        animation: Some(LightAnimation {
            kind: "flame".to_string(),
            speed: 5,
            intensity: 5,
        }),
    }
}

/// `X` lights or extinguishes a torch on the keypad's token.
#[derive(Debug, Default)]
pub struct TokenTorch;

impl TokenTorch {
    pub fn new() -> Self {
        Self
    }

    fn toggle_torch(&self, keypad: &Keypad, directory: &Directory) {
        let Some(token) = keypad.token(directory) else {
            return;
        };
        let scene = directory.scene();
        let light = if scene.token_emits_light(&token) {
            debug!(controller_id = %keypad.controller_id(), token = %token, "Turn off torch");
            LightParams::off()
        } else {
            debug!(controller_id = %keypad.controller_id(), token = %token, "Turn on torch");
            torch_light()
        };
        if let Err(e) = scene.set_token_light(&token, &light) {
            log_scene_failure(self.name(), keypad.controller_id(), &e);
        }
    }
}

impl TickListener for TokenTorch {
    fn name(&self) -> &str {
        "token-torch"
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError> {
        let now = ctx.now();
        let directory = ctx.directory();
        for keypad in ctx.keypads() {
            if keypad.is_just_down("X", now) {
                self.toggle_torch(keypad, directory);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::manager::tests::{connect, manager_with, press};
    use crate::scene::memory::tests::sample_scene;
    use std::sync::Arc;

    #[test]
    fn test_torch_toggles() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenTorch::new()));
        connect(&mut manager, "C1");

        press(&mut manager, "C1", "X", "down");
        manager.tick(1_000);
        manager.tick(1_016);
        let lit = scene.token_light("t1").unwrap();
        assert_eq!(lit, torch_light());
        assert_eq!(lit.color, Some(Rgb::from_hex("#ffad58").unwrap()));

        press(&mut manager, "C1", "X", "up");
        press(&mut manager, "C1", "X", "down");
        manager.tick(1_032);
        assert!(!scene.token_light("t1").unwrap().is_lit());
        assert_eq!(scene.take_effects().len(), 2);
    }

    #[test]
    fn test_keypad_without_token_is_ignored() {
        let scene = Arc::new(sample_scene());
        let (mut manager, _out) = manager_with(scene.clone());
        manager.register_tick_listener(Box::new(TokenTorch::new()));
        connect(&mut manager, "C7");
        press(&mut manager, "C7", "X", "down");
        manager.tick(1_000);
        assert!(scene.effects().is_empty());
    }
}
