mod cli;

use std::fs;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use stage_engine::audio_bridge::RecordingAudioSink;
use stage_engine::{Collaborators, EngineConfig, Session};

use cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    let actions = args.action_specs()?;
    let config = EngineConfig::from_json_file(&args.config)?;
    let mut collaborators = Collaborators::from_config(&config)?;
    let recorder = args
        .audio_log_json
        .as_ref()
        .map(|_| RecordingAudioSink::new());
    if let Some(recorder) = recorder.as_ref() {
        collaborators = collaborators.with_audio(Rc::new(recorder.clone()));
    }

    let mut session = Session::new(config, collaborators)?;
    session.boot()?;
    if let Some(path) = args.load.as_ref() {
        let count = session
            .load_from(path)
            .with_context(|| format!("loading save {}", path.display()))?;
        info!("loaded {count} statements from {}", path.display());
    }

    let mut callbacks_fired = 0;
    for action in &actions {
        session
            .run_action(&action.function, &action.object)
            .with_context(|| format!("running {}:{}", action.object, action.function))?;
        for _ in 0..args.frames_per_action {
            callbacks_fired += session.step(args.dt)?.callbacks_fired;
        }
    }
    for _ in 0..args.frames {
        callbacks_fired += session.step(args.dt)?.callbacks_fired;
    }

    if let Some(path) = args.save.as_ref() {
        let count = session.save_to(path)?;
        println!("Saved {count} statements to {}", path.display());
    }

    if let (Some(path), Some(recorder)) = (args.audio_log_json.as_ref(), recorder) {
        let json = serde_json::to_string_pretty(&recorder.events())
            .context("serializing audio event log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing audio event log to {}", path.display()))?;
    }

    if let Some(path) = args.event_log_json.as_ref() {
        let json = serde_json::to_string_pretty(&session.events())
            .context("serializing session event log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing session event log to {}", path.display()))?;
        println!("Saved session event log to {}", path.display());
    }

    println!(
        "scene: {}",
        session.current_scene().unwrap_or_else(|| "-".to_string())
    );
    println!("frames: {}", session.frame());
    println!("live objects: {}", session.live_ids().join(", "));
    println!("callbacks fired: {callbacks_fired}");
    println!("pending callbacks: {}", session.pending_callbacks());
    Ok(())
}
