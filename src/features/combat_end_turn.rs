use super::{ListenerError, log_scene_failure};
use crate::controller::{Keypad, TickContext, TickListener};
use crate::scene::{CombatState, Directory};
use tracing::{info, warn};

/// `SPC` ends the active combatant's turn, if the keypad's player owns it.
#[derive(Debug, Default)]
pub struct CombatEndTurn;

impl CombatEndTurn {
    pub fn new() -> Self {
        Self
    }

    /// Returns whether the turn was advanced.
    fn end_turn_for(&self, keypad: &Keypad, combat: &CombatState, directory: &Directory) -> bool {
        let Some(player) = keypad.player(directory) else {
            return false;
        };
        let owns_current = combat
            .current()
            .is_some_and(|c| c.owners.iter().any(|o| *o == player.id));
        if !owns_current {
            warn!(
                controller_id = %keypad.controller_id(),
                player = %player.name,
                "Player tried to end a turn that is not theirs"
            );
            return false;
        }
        match directory.scene().next_turn() {
            Ok(()) => {
                info!(player = %player.name, round = combat.round, turn = combat.turn, "Turn ended");
                true
            }
            Err(e) => {
                log_scene_failure(self.name(), keypad.controller_id(), &e);
                false
            }
        }
    }
}

impl TickListener for CombatEndTurn {
    fn name(&self) -> &str {
        "combat-end-turn"
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError> {
        let directory = ctx.directory();
        let Some(combat) = directory.scene().combat().filter(CombatState::is_active) else {
            return Ok(());
        };
        let now = ctx.now();
        for keypad in ctx.keypads() {
            // At most one advance per tick, however many keypads pressed.
            if keypad.is_just_down("SPC", now) && self.end_turn_for(keypad, &combat, directory) {
                break;
            }
        }
        Ok(())
    }
}
