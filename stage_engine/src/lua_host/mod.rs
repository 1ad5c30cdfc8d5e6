mod context;
mod error;
mod types;

pub use context::{
    AudioSink, DialogPresenter, DialogTicket, LifecycleState, ObjectKind, ObjectSnapshot,
    PersistenceError, QueuedDialogPresenter,
};
pub use error::BridgeError;
pub use types::Vec2;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use mlua::{Lua, LuaOptions, StdLib};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::skeleton::{SkeletonLibrary, SkeletonLoader};
use context::EngineContext;

/// External runtimes the session talks to.
#[derive(Debug)]
pub struct Collaborators {
    pub skeletons: Rc<dyn SkeletonLoader>,
    pub audio: Option<Rc<dyn AudioSink>>,
    pub dialogs: Box<dyn DialogPresenter>,
}

impl Collaborators {
    /// Skeleton manifest named by the configuration, no audio output and the
    /// headless dialog presenter.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let skeletons = SkeletonLibrary::from_json_file(&config.skeletons_path())?;
        debug!("skeletons: {}", skeletons.names().collect::<Vec<_>>().join(", "));
        Ok(Self {
            skeletons: Rc::new(skeletons),
            audio: None,
            dialogs: Box::new(QueuedDialogPresenter::new()),
        })
    }

    pub fn with_audio(mut self, audio: Rc<dyn AudioSink>) -> Self {
        self.audio = Some(audio);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub callbacks_fired: usize,
}

/// A running game: the Lua state, its mirror tables and the native objects
/// they describe.
pub struct Session {
    lua: Lua,
    context: Rc<RefCell<EngineContext>>,
}

impl Session {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .context("initialising Lua runtime with standard libraries")?;
        let config = Rc::new(config);
        let context = Rc::new(RefCell::new(EngineContext::new(
            config.clone(),
            collaborators.skeletons,
            collaborators.audio,
            collaborators.dialogs,
        )?));
        if let Some(scripts) = config.main_script_path().parent() {
            context::install_package_path(&lua, scripts)?;
        }
        context::install_globals(&lua, context.clone())?;
        Ok(Self { lua, context })
    }

    /// Loads the main script, spawns the player and enters the start scene
    /// (or the scene the mirror already names).
    pub fn boot(&mut self) -> Result<()> {
        let main_script = self.context.borrow().config().main_script_path();
        context::load_script(&self.lua, &main_script)?;
        let scene = {
            let mut ctx = self.context.borrow_mut();
            ctx.seed_mirror(&self.lua)?;
            ctx.spawn_player(&self.lua)?;
            let current = self
                .lua
                .globals()
                .get::<_, Option<mlua::Table>>("game")?
                .map(|game| game.raw_get::<_, Option<String>>("scene"))
                .transpose()?
                .flatten();
            current.unwrap_or_else(|| ctx.config().start_scene.clone())
        };
        context::enter_scene(&self.lua, &self.context, &scene)?;
        self.context.borrow_mut().commit(&self.lua)?;
        info!("booted into scene {scene}");
        Ok(())
    }

    /// Executes a chunk of script code outside any callback.
    pub fn exec(&self, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name("exec")
            .exec()
            .context("executing script chunk")
    }

    pub fn step(&mut self, dt: f32) -> Result<FrameReport> {
        context::step_frame(&self.lua, &self.context, dt)
    }

    /// Runs the global script function `function` with `object_id` as the
    /// current object.
    pub fn run_action(&mut self, function: &str, object_id: &str) -> Result<()> {
        let Some(key) = self.context.borrow().find(object_id) else {
            bail!("no object '{object_id}' to run {function} on");
        };
        context::invoke(&self.lua, &self.context, function, Some(key))
    }

    /// Like [`Session::run_action`], but refuses hidden objects and objects
    /// below the inactive layer border. Returns whether the action ran.
    pub fn interact(&mut self, object_id: &str, function: &str) -> Result<bool> {
        let key = {
            let ctx = self.context.borrow();
            match ctx.find(object_id) {
                Some(key) if ctx.is_interactable(key) => key,
                _ => {
                    debug!("{object_id} is not interactable");
                    return Ok(false);
                }
            }
        };
        context::invoke(&self.lua, &self.context, function, Some(key))?;
        Ok(true)
    }

    /// Host walk request; ignored while the player is not interruptible.
    pub fn request_walk(&mut self, target: Vec2) -> Result<bool> {
        let started = self
            .context
            .borrow_mut()
            .walk_to(&self.lua, target, None, "walk", None, true)?;
        Ok(started)
    }

    pub fn set_pointer_position(&mut self, position: Vec2) {
        self.context.borrow_mut().set_pointer_position(position);
    }

    pub fn set_camera_position(&mut self, position: Vec2) {
        self.context.borrow_mut().set_camera_position(position);
    }

    pub fn save_to(&self, path: &Path) -> Result<usize> {
        context::save_to(&self.lua, &self.context, path)
    }

    /// Loads a save file and rebuilds the world from it straight away. On
    /// error the previous state is kept.
    pub fn load_from(&mut self, path: &Path) -> Result<usize> {
        let count = context::load_from(&self.lua, &self.context, path)?;
        self.context.borrow_mut().commit(&self.lua)?;
        Ok(count)
    }

    /// Save file path for a script-level save name.
    pub fn save_path(&self, name: &str) -> Result<std::path::PathBuf> {
        Ok(self.context.borrow().save_path(name)?)
    }

    pub fn object(&self, id: &str) -> Option<ObjectSnapshot> {
        self.context.borrow().snapshot(id)
    }

    pub fn live_ids(&self) -> Vec<String> {
        self.context.borrow().live_ids()
    }

    pub fn lua_path(&self, id: &str) -> Result<Option<String>> {
        Ok(self.context.borrow().lua_path(&self.lua, id)?)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn events(&self) -> Vec<String> {
        self.context.borrow().events().to_vec()
    }

    pub fn current_scene(&self) -> Option<String> {
        self.context.borrow().current_scene().map(str::to_string)
    }

    pub fn frame(&self) -> u64 {
        self.context.borrow().frame()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.context.borrow().pending_callbacks()
    }

    pub fn audio_history(&self) -> Vec<String> {
        self.context.borrow().audio_history().to_vec()
    }
}
