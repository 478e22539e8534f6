//! Shows the turn order on the keypads' second LED.
//!
//! Red is the active combatant, yellow is up next, green still has a turn this
//! round, and keypads whose turn has passed go back to the player colour. A new
//! encounter or round first waits out the tactical discussion countdown.

use super::ListenerError;
use super::timer::TimerBoard;
use crate::config::CombatConfig;
use crate::controller::{Keypad, TickContext, TickListener};
use crate::protocol::Rgb;
use crate::scene::{CombatEvent, CombatState, Directory};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info};

const TURN_LED: usize = 1;

#[derive(Debug)]
struct Deferred {
    due: u64,
    countdown: u64,
}

pub struct CombatIndicator {
    events: mpsc::UnboundedReceiver<CombatEvent>,
    events_closed: bool,
    timers: TimerBoard,
    tactical_ms: u64,
    reaction_ms: u64,
    skip_defeated: bool,
    running: bool,
    deferred: Option<Deferred>,
    reaction: Option<u64>,
}

impl CombatIndicator {
    pub fn new(
        config: &CombatConfig,
        events: mpsc::UnboundedReceiver<CombatEvent>,
        timers: TimerBoard,
    ) -> Self {
        Self {
            events,
            events_closed: false,
            timers,
            tactical_ms: config.tactical_discussion_secs * 1000,
            reaction_ms: config.player_reaction_secs * 1000,
            skip_defeated: config.skip_defeated,
            running: false,
            deferred: None,
            reaction: None,
        }
    }

    fn handle_update(
        &mut self,
        combat: CombatState,
        round: Option<u32>,
        turn: Option<usize>,
        now: u64,
        keypads: &mut [Keypad],
        directory: &Directory,
    ) {
        if !self.running {
            if combat.started {
                self.running = true;
                info!(round = combat.round, "Combat started, holding tactical discussion");
                self.start_tactical(&combat, now, keypads, directory);
            }
            return;
        }
        if round.is_some() && combat.turn == 0 {
            debug!(round = combat.round, "New round, holding tactical discussion");
            self.start_tactical(&combat, now, keypads, directory);
        } else if turn.is_some() {
            self.apply_turn(&combat, now, keypads, directory);
        }
    }

    fn start_tactical(
        &mut self,
        combat: &CombatState,
        now: u64,
        keypads: &mut [Keypad],
        directory: &Directory,
    ) {
        if let Some(previous) = self.deferred.take() {
            self.timers.remove(previous.countdown);
        }
        if self.tactical_ms == 0 {
            self.apply_turn(combat, now, keypads, directory);
            return;
        }
        let countdown = self.timers.add(now, self.tactical_ms, true);
        self.deferred = Some(Deferred {
            due: now + self.tactical_ms,
            countdown,
        });
    }

    /// Colour every keypad by its owner's position in the turn order.
    fn apply_turn(
        &mut self,
        combat: &CombatState,
        now: u64,
        keypads: &mut [Keypad],
        directory: &Directory,
    ) {
        let by_player: HashMap<String, usize> = keypads
            .iter()
            .enumerate()
            .filter_map(|(idx, k)| k.player(directory).map(|p| (p.id, idx)))
            .collect();

        let current = combat.turn;
        let mut has_next = false;
        let mut first = None;
        let mut acting = Vec::new();
        for (i, combatant) in combat.turns.iter().enumerate() {
            if self.skip_defeated && combatant.defeated {
                continue;
            }
            for owner in &combatant.owners {
                let Some(&idx) = by_player.get(owner) else {
                    continue;
                };
                let keypad = &mut keypads[idx];
                first.get_or_insert(idx);
                match i.cmp(&current) {
                    Ordering::Equal => {
                        keypad.set_led(TURN_LED, Rgb::RED);
                        acting.push(idx);
                    }
                    Ordering::Greater if !has_next => {
                        keypad.set_led(TURN_LED, Rgb::YELLOW);
                        has_next = true;
                    }
                    Ordering::Greater => keypad.set_led(TURN_LED, Rgb::GREEN),
                    Ordering::Less => keypad.set_default_led_color(directory),
                }
            }
        }
        if !has_next {
            // Next up is at the top of the following round, unless that
            // keypad is acting right now.
            if let Some(idx) = first.filter(|idx| !acting.contains(idx)) {
                keypads[idx].set_led(TURN_LED, Rgb::YELLOW);
            }
        }

        if let Some(previous) = self.reaction.take() {
            self.timers.remove(previous);
        }
        if !acting.is_empty() && self.reaction_ms > 0 {
            self.reaction = Some(self.timers.add(now, self.reaction_ms, true));
        }
        debug!(round = combat.round, turn = current, "Updated turn indicators");
    }

    fn reset(&mut self, keypads: &mut [Keypad], directory: &Directory) {
        self.running = false;
        if let Some(deferred) = self.deferred.take() {
            self.timers.remove(deferred.countdown);
        }
        if let Some(reaction) = self.reaction.take() {
            self.timers.remove(reaction);
        }
        for keypad in keypads {
            keypad.set_default_led_color(directory);
        }
    }
}

impl TickListener for CombatIndicator {
    fn name(&self) -> &str {
        "combat-indicator"
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError> {
        let now = ctx.now();
        let directory = ctx.directory();

        if self.deferred.as_ref().is_some_and(|d| now >= d.due) {
            if let Some(deferred) = self.deferred.take() {
                self.timers.remove(deferred.countdown);
            }
            // The encounter may have moved on while the countdown ran.
            if let Some(combat) = directory.scene().combat().filter(CombatState::is_active) {
                self.apply_turn(&combat, now, ctx.keypads(), directory);
            }
        }

        while !self.events_closed {
            match self.events.try_recv() {
                Ok(CombatEvent::Updated {
                    combat,
                    round,
                    turn,
                }) => self.handle_update(combat, round, turn, now, ctx.keypads(), directory),
                Ok(CombatEvent::Ended) => {
                    info!("Combat ended, restoring keypad colours");
                    self.reset(ctx.keypads(), directory);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Combat event stream closed");
                    self.events_closed = true;
                }
            }
        }
        Ok(())
    }
}
