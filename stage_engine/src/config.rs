use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::lua_host::Vec2;

/// Game configuration loaded from JSON. Relative paths resolve against the
/// directory that holds the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(skip)]
    root: PathBuf,
    pub start_scene: String,
    #[serde(default = "default_inventory_skin")]
    pub inventar_default_skin: String,
    #[serde(default = "default_animation")]
    pub spine_default_animation: String,
    #[serde(default, rename = "supportedLanguages")]
    pub supported_languages: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Dialog file handed to the dialog presenter.
    #[serde(default)]
    pub dialog: Option<String>,
    #[serde(default = "default_player_spine")]
    pub player_spine: String,
    #[serde(default)]
    pub player_start: Vec2,
    #[serde(default = "default_player_speed")]
    pub player_max_speed: f32,
    #[serde(default = "default_main_script")]
    pub main_script: String,
    #[serde(default = "default_scene_dir")]
    pub scene_dir: String,
    #[serde(default = "default_skeletons")]
    pub skeletons: String,
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
    #[serde(default = "default_save_roots")]
    pub save_roots: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_inventory_skin() -> String {
    "inventory".to_string()
}

fn default_animation() -> String {
    "idle".to_string()
}

fn default_player_spine() -> String {
    "player".to_string()
}

fn default_player_speed() -> f32 {
    300.0
}

fn default_main_script() -> String {
    "scripts/main.lua".to_string()
}

fn default_scene_dir() -> String {
    "scenes".to_string()
}

fn default_skeletons() -> String {
    "skeletons.json".to_string()
}

fn default_save_dir() -> String {
    "saves".to_string()
}

fn default_save_roots() -> Vec<String> {
    ["game", "player", "inventory_items", "scenes", "inactivLayerBorder"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl EngineConfig {
    /// Minimal configuration rooted at `root`; everything else takes defaults.
    pub fn new(root: impl Into<PathBuf>, start_scene: &str) -> Result<Self> {
        Self::from_value(json!({ "start_scene": start_scene }), root.into())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading game configuration {}", path.display()))?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_json_str(&text, root)
            .with_context(|| format!("parsing game configuration {}", path.display()))
    }

    pub fn from_json_str(text: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value, root.into())
    }

    fn from_value(value: serde_json::Value, root: PathBuf) -> Result<Self> {
        let mut config: EngineConfig = serde_json::from_value(value)?;
        config.root = root;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.start_scene.is_empty() {
            bail!("start_scene must not be empty");
        }
        for root in &self.save_roots {
            if !stage_save::is_identifier(root.as_bytes()) {
                bail!("save root '{root}' is not a plain identifier");
            }
        }
        if let Some(language) = &self.language {
            if !self.supported_languages.is_empty() && !self.supports_language(language) {
                bail!("language '{language}' is not listed in supportedLanguages");
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    pub fn main_script_path(&self) -> PathBuf {
        self.resolve(&self.main_script)
    }

    pub fn scene_dir_path(&self) -> PathBuf {
        self.resolve(&self.scene_dir)
    }

    pub fn skeletons_path(&self) -> PathBuf {
        self.resolve(&self.skeletons)
    }

    pub fn save_dir_path(&self) -> PathBuf {
        self.resolve(&self.save_dir)
    }

    pub fn dialog_path(&self) -> Option<PathBuf> {
        self.dialog.as_ref().map(|dialog| self.resolve(dialog))
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.supported_languages.iter().any(|l| l == language)
    }

    /// Configured language, falling back to the first supported one.
    pub fn initial_language(&self) -> Option<&str> {
        self.language
            .as_deref()
            .or_else(|| self.supported_languages.first().map(String::as_str))
    }

    pub fn lookup(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}
