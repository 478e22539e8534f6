use super::{FlagStore, Player, SceneHost};
use crate::error::AppError;
use crate::protocol::PlayerSummary;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const SELECTED_TOKEN_FLAG: &str = "selectedToken_";

/// Shared handles to the scene collaborators plus the player mappings.
#[derive(Clone)]
pub struct Directory {
    scene: Arc<dyn SceneHost>,
    flags: Arc<dyn FlagStore>,
    /// player id -> controller id
    mappings: Arc<HashMap<String, String>>,
}

impl Directory {
    pub fn new(
        scene: Arc<dyn SceneHost>,
        flags: Arc<dyn FlagStore>,
        mappings: HashMap<String, String>,
    ) -> Self {
        Self {
            scene,
            flags,
            mappings: Arc::new(mappings),
        }
    }

    pub fn scene(&self) -> &dyn SceneHost {
        self.scene.as_ref()
    }

    pub fn flags(&self) -> &dyn FlagStore {
        self.flags.as_ref()
    }

    /// The player mapped to `controller_id`, if that player exists in the scene.
    pub fn player_for_controller(&self, controller_id: &str) -> Option<Player> {
        let player_id = self
            .mappings
            .iter()
            .find(|(_, controller)| controller.as_str() == controller_id)
            .map(|(player, _)| player)?;
        self.scene
            .players()
            .into_iter()
            .find(|p| &p.id == player_id)
    }

    /// Players announced to the hub.
    pub fn roster(&self) -> Vec<PlayerSummary> {
        self.scene
            .players()
            .into_iter()
            .map(|p| PlayerSummary {
                id: p.id,
                name: p.name,
            })
            .collect()
    }

    /// Raw flag value, even if the token no longer exists.
    pub fn selected_token_flag(&self, player_id: &str) -> Option<String> {
        match self.flags.get_flag(&format!("{SELECTED_TOKEN_FLAG}{player_id}"))? {
            Value::String(id) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn set_selected_token(&self, player_id: &str, token_id: Option<&str>) -> Result<(), AppError> {
        let value = token_id.map_or(Value::Null, |t| Value::String(t.to_string()));
        self.flags
            .set_flag(&format!("{SELECTED_TOKEN_FLAG}{player_id}"), value)
    }

    /// The token a player's keypad acts on: the selected one while it exists,
    /// otherwise the first token the player owns.
    pub fn token_for(&self, player_id: &str) -> Option<String> {
        if let Some(selected) = self.selected_token_flag(player_id) {
            if self.scene.token_exists(&selected) {
                return Some(selected);
            }
        }
        self.scene.find_tokens_for(player_id).into_iter().next()
    }

    /// The character's token if the player has one, else the first owned token.
    pub fn default_token(&self, player_id: &str) -> Option<String> {
        let tokens = self.scene.find_tokens_for(player_id);
        match self.scene.character_token(player_id) {
            Some(character) => tokens.into_iter().find(|t| *t == character),
            None => tokens.into_iter().next(),
        }
    }

    pub fn select_default_token(&self, player: &Player) -> Result<Option<String>, AppError> {
        let token = self.default_token(&player.id);
        self.set_selected_token(&player.id, token.as_deref())?;
        debug!(player = %player.name, token = ?token, "Selected default token");
        Ok(token)
    }

    /// Preselect default tokens for every player in the scene.
    pub fn select_default_tokens(&self) -> Result<(), AppError> {
        for player in self.scene.players() {
            self.select_default_token(&player)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("mappings", &self.mappings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::memory::tests::sample_scene;
    use crate::scene::MemoryFlags;

    fn directory() -> Directory {
        let mut mappings = HashMap::new();
        mappings.insert("p1".to_string(), "C1".to_string());
        mappings.insert("ghost".to_string(), "C9".to_string());
        Directory::new(Arc::new(sample_scene()), Arc::new(MemoryFlags::new()), mappings)
    }

    #[test]
    fn test_player_resolution() {
        let dir = directory();
        assert_eq!(dir.player_for_controller("C1").unwrap().id, "p1");
        assert!(dir.player_for_controller("C2").is_none());
        // mapped to a player who is not in the scene
        assert!(dir.player_for_controller("C9").is_none());
    }

    #[test]
    fn test_token_falls_back_to_first_owned() {
        let dir = directory();
        assert_eq!(dir.token_for("p1").as_deref(), Some("t1"));
        dir.set_selected_token("p1", Some("t2")).unwrap();
        assert_eq!(dir.token_for("p1").as_deref(), Some("t2"));
        dir.set_selected_token("p1", Some("vanished")).unwrap();
        assert_eq!(dir.token_for("p1").as_deref(), Some("t1"));
        assert!(dir.token_for("p3").is_none());
    }

    #[test]
    fn test_default_token_prefers_character() {
        let dir = directory();
        assert_eq!(dir.default_token("p1").as_deref(), Some("t2"));
        assert_eq!(dir.default_token("p2").as_deref(), Some("t3"));
        dir.select_default_tokens().unwrap();
        assert_eq!(dir.selected_token_flag("p1").as_deref(), Some("t2"));
    }
}
