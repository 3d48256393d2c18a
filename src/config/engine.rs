use serde::Deserialize;

use crate::constants::DEFAULT_KINDS;

/// Engine-level behavior knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Resource kinds shown under each namespace folder of the tree.
    #[serde(default = "default_kinds")]
    pub kinds: Vec<String>,

    /// Whether silent auto-refreshes additionally emit an Info
    /// notification. The refresh itself is never interactive either way.
    #[serde(default = "default_notify_auto_refresh")]
    pub notify_auto_refresh: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.kinds.is_empty() {
            return Err("engine.kinds must name at least one resource kind".to_string());
        }
        if let Some(blank) = self.kinds.iter().find(|k| k.trim().is_empty()) {
            return Err(format!("engine.kinds contains a blank entry: {blank:?}"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            kinds: default_kinds(),
            notify_auto_refresh: default_notify_auto_refresh(),
        }
    }
}

fn default_kinds() -> Vec<String> {
    DEFAULT_KINDS.iter().map(|k| k.to_string()).collect()
}
fn default_notify_auto_refresh() -> bool {
    true
}
