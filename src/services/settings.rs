use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;

/// Runtime-mutable OpenRouter settings. Environment config supplies the
/// defaults; the web UI overwrites them through `/api/config` and the
/// overlay is persisted so it survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: i64,
}

impl AgentSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_key: cfg.openrouter_api_key.clone(),
            base_url: cfg.openrouter_base_url.clone(),
            model: cfg.openrouter_model.clone(),
            temperature: cfg.agent_temperature,
            max_tokens: cfg.agent_max_tokens,
        }
    }
}

static STORE: OnceCell<RwLock<AgentSettings>> = OnceCell::new();

pub fn init_global() {
    let cfg = Config::get();
    let settings = match load(Path::new(&cfg.settings_path)) {
        Some(persisted) => {
            info!("[SETTINGS] loaded persisted settings from {}", cfg.settings_path);
            persisted
        }
        None => AgentSettings::from_config(cfg),
    };
    let _ = STORE.set(RwLock::new(settings));
}

pub fn current() -> AgentSettings {
    STORE
        .get()
        .map(|store| store.read().clone())
        .unwrap_or_else(|| AgentSettings::from_config(Config::get()))
}

pub fn update(settings: AgentSettings) -> Result<(), String> {
    let cfg = Config::get();
    persist(Path::new(&cfg.settings_path), &settings)?;
    if let Some(store) = STORE.get() {
        *store.write() = settings;
    } else {
        let _ = STORE.set(RwLock::new(settings));
    }
    Ok(())
}

fn load(path: &Path) -> Option<AgentSettings> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(err) => {
            warn!("[SETTINGS] ignoring malformed settings file {}: {}", path.display(), err);
            None
        }
    }
}

fn persist(path: &Path, settings: &AgentSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| format!("create settings dir failed: {e}"))?;
        }
    }
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("serialize settings failed: {e}"))?;
    fs::write(path, raw).map_err(|e| format!("write settings failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::{load, persist, AgentSettings};

    fn sample() -> AgentSettings {
        AgentSettings {
            api_key: "sk-or-test".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    #[test]
    fn settings_round_trip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        persist(&path, &sample()).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.model, "openai/gpt-4o-mini");
        assert_eq!(loaded.max_tokens, 2000);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).is_none());
    }
}
