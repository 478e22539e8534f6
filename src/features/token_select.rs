use super::{ListenerError, log_scene_failure};
use crate::controller::{Keypad, TickContext, TickListener};
use crate::scene::Directory;
use tracing::debug;

/// `Q` cycles the player's selected token.
#[derive(Debug, Default)]
pub struct TokenSelect;

impl TokenSelect {
    pub fn new() -> Self {
        Self
    }

    fn select_next_token(&self, keypad: &Keypad, directory: &Directory) {
        let Some(player) = keypad.player(directory) else {
            return;
        };
        let result = match directory.selected_token_flag(&player.id) {
            None => directory.select_default_token(&player).map(|_| ()),
            Some(current) => {
                let tokens = directory.scene().find_tokens_for(&player.id);
                if tokens.is_empty() {
                    debug!(player = %player.name, "Player owns no tokens, nothing to select");
                    return;
                }
                // A selection that is no longer owned restarts at the first token.
                let next = match tokens.iter().position(|t| *t == current) {
                    Some(i) => (i + 1) % tokens.len(),
                    None => 0,
                };
                debug!(player = %player.name, token = %tokens[next], "Selected token");
                directory.set_selected_token(&player.id, Some(&tokens[next]))
            }
        };
        if let Err(e) = result {
            log_scene_failure(self.name(), keypad.controller_id(), &e);
        }
    }
}

impl TickListener for TokenSelect {
    fn name(&self) -> &str {
        "token-select"
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError> {
        let now = ctx.now();
        let directory = ctx.directory();
        for keypad in ctx.keypads() {
            if keypad.is_just_down("Q", now) {
                self.select_next_token(keypad, directory);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerManager;
    use crate::controller::manager::tests::{connect, manager_with, press};
    use crate::scene::memory::tests::sample_scene;
    use std::sync::Arc;

    fn tap(manager: &mut ControllerManager, now: u64) {
        press(manager, "C1", "Q", "down");
        manager.tick(now);
        press(manager, "C1", "Q", "up");
        manager.tick(now + 16);
    }

    #[test]
    fn test_first_press_selects_default_then_cycles() {
        let (mut manager, _out) = manager_with(Arc::new(sample_scene()));
        manager.register_tick_listener(Box::new(TokenSelect::new()));
        connect(&mut manager, "C1");
        let directory = manager.directory().clone();

        tap(&mut manager, 1_000);
        // character token first
        assert_eq!(directory.selected_token_flag("p1").as_deref(), Some("t2"));
        tap(&mut manager, 2_000);
        assert_eq!(directory.selected_token_flag("p1").as_deref(), Some("t1"));
        tap(&mut manager, 3_000);
        assert_eq!(directory.selected_token_flag("p1").as_deref(), Some("t2"));
        assert_eq!(directory.token_for("p1").as_deref(), Some("t2"));
    }

    #[test]
    fn test_held_key_selects_once() {
        let (mut manager, _out) = manager_with(Arc::new(sample_scene()));
        manager.register_tick_listener(Box::new(TokenSelect::new()));
        connect(&mut manager, "C1");
        let directory = manager.directory().clone();
        directory.set_selected_token("p1", Some("t1")).unwrap();

        press(&mut manager, "C1", "Q", "down");
        manager.tick(1_000);
        manager.tick(1_500);
        assert_eq!(directory.selected_token_flag("p1").as_deref(), Some("t2"));
    }

    #[test]
    fn test_unknown_selection_restarts_at_first() {
        let (mut manager, _out) = manager_with(Arc::new(sample_scene()));
        manager.register_tick_listener(Box::new(TokenSelect::new()));
        connect(&mut manager, "C1");
        let directory = manager.directory().clone();
        directory.set_selected_token("p1", Some("t3")).unwrap();
        tap(&mut manager, 1_000);
        assert_eq!(directory.selected_token_flag("p1").as_deref(), Some("t1"));
    }
}
