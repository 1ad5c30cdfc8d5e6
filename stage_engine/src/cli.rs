use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Headless host that boots a game and drives it for a number of frames", version)]
pub struct Args {
    /// Game configuration JSON
    #[arg(long, default_value = "demos/cabin/game.json")]
    pub config: PathBuf,

    /// Frames to simulate after all actions ran
    #[arg(long, default_value_t = 60)]
    pub frames: u32,

    /// Seconds per simulated frame
    #[arg(long, default_value_t = 1.0 / 60.0)]
    pub dt: f32,

    /// Script action to run, as OBJECT:FUNCTION (repeatable)
    #[arg(long = "action", value_name = "OBJECT:FUNCTION")]
    pub actions: Vec<String>,

    /// Frames to simulate after each action
    #[arg(long, default_value_t = 120)]
    pub frames_per_action: u32,

    /// Save file to load right after boot
    #[arg(long)]
    pub load: Option<PathBuf>,

    /// Path to write a save file once the run finishes
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Path to write the audio event log as JSON
    #[arg(long)]
    pub audio_log_json: Option<PathBuf>,

    /// Path to write the session event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub object: String,
    pub function: String,
}

impl ActionSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((object, function)) = raw.split_once(':') else {
            bail!("action '{raw}' must look like OBJECT:FUNCTION");
        };
        let (object, function) = (object.trim(), function.trim());
        if object.is_empty() || function.is_empty() {
            bail!("action '{raw}' names an empty object or function");
        }
        Ok(Self {
            object: object.to_string(),
            function: function.to_string(),
        })
    }
}

impl Args {
    pub fn action_specs(&self) -> Result<Vec<ActionSpec>> {
        self.actions.iter().map(|raw| ActionSpec::parse(raw)).collect()
    }
}
