use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

mod audio;
mod bindings;
mod dialog;
mod inventory;
mod lifecycle;
mod mirror;
mod movement;
mod objects;
mod persistence;
mod pointer;
mod scenes;
mod scripts;

pub use audio::AudioSink;
pub use dialog::{DialogPresenter, DialogTicket, QueuedDialogPresenter};
pub use lifecycle::{LifecycleState, Removal};
pub use objects::{ObjectKey, ObjectKind, ObjectSnapshot};
pub use persistence::PersistenceError;

pub(super) use bindings::{install_globals, install_package_path, load_script};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use mlua::{Function, Lua, RegistryKey, Result as LuaResult, Value};
use regex::Regex;

use super::error::BridgeError;
use super::types::Vec2;
use super::FrameReport;
use crate::config::EngineConfig;
use crate::skeleton::{SkeletonLoader, TrackEntryId, TrackEventKind};
use audio::AudioRuntime;
use inventory::InventoryMove;
use mirror::{MirrorPath, MirrorValue, INACTIVE_LAYER_GLOBAL, PLAYER_ID, PLAYER_ROOT};
use movement::{PlayerState, Walk};
use objects::{ObjectStore, ParentRef, WorldObject};
use pointer::PointerState;
use scenes::{ObjectSpec, SceneRuntime};
use scripts::{CallbackOrigin, CallbackRecord, CallbackRuntime};

const SAVE_NAME_PATTERN: &str = "^[A-Za-z0-9_-]+$";

/// Native half of a dual write. `apply` is the only place object state
/// that has a mirror projection is changed.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Mutation {
    PlayAnimation {
        track: usize,
        name: String,
        looped: bool,
    },
    AddAnimation {
        track: usize,
        name: String,
        looped: bool,
        delay: f32,
    },
    Skin(String),
    Visible(bool),
    Layer(i64),
    Rotation(f32),
    Position(Vec2),
    ScaleX(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Outcome {
    Applied,
    Started(TrackEntryId),
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PersistenceRequest {
    Save(String),
    Load(String),
}

/// A callback whose trigger fired this frame.
#[derive(Debug)]
pub(super) struct Due {
    label: String,
    function: RegistryKey,
    subject: Option<ObjectKey>,
}

#[derive(Debug, Default)]
pub(super) struct CommitSummary {
    pub(super) added: Vec<String>,
    pub(super) removed: Vec<String>,
}

#[derive(Debug)]
pub(super) struct EngineContext {
    config: Rc<EngineConfig>,
    skeletons: Rc<dyn SkeletonLoader>,
    audio: AudioRuntime,
    dialogs: Box<dyn DialogPresenter>,
    objects: ObjectStore,
    /// Mirror entries to purge when a queued deletion commits, resolved
    /// while the owning scene was still current.
    deleted_paths: HashMap<ObjectKey, MirrorPath>,
    callbacks: CallbackRuntime,
    /// Innermost entry is the current object of the running callback.
    subjects: Vec<Option<ObjectKey>>,
    player: PlayerState,
    pointer: PointerState,
    scenes: SceneRuntime,
    persistence: Option<PersistenceRequest>,
    inactive_layer_border: i64,
    language: Option<String>,
    camera: Vec2,
    elapsed: f64,
    frame: u64,
    events: Vec<String>,
    save_name: Regex,
}

impl EngineContext {
    pub(super) fn new(
        config: Rc<EngineConfig>,
        skeletons: Rc<dyn SkeletonLoader>,
        audio: Option<Rc<dyn AudioSink>>,
        dialogs: Box<dyn DialogPresenter>,
    ) -> Result<Self> {
        let save_name = Regex::new(SAVE_NAME_PATTERN).context("compiling save name pattern")?;
        let language = config.initial_language().map(str::to_string);
        Ok(Self {
            player: PlayerState::new(config.player_max_speed),
            config,
            skeletons,
            audio: AudioRuntime::new(audio),
            dialogs,
            objects: ObjectStore::new(),
            deleted_paths: HashMap::new(),
            callbacks: CallbackRuntime::new(),
            subjects: Vec::new(),
            pointer: PointerState::new(),
            scenes: SceneRuntime::default(),
            persistence: None,
            inactive_layer_border: 0,
            language,
            camera: Vec2::ZERO,
            elapsed: 0.0,
            frame: 0,
            events: Vec::new(),
            save_name,
        })
    }

    pub(super) fn log_event(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    pub(super) fn events(&self) -> &[String] {
        &self.events
    }

    pub(super) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn audio_history(&self) -> &[String] {
        self.audio.history()
    }

    pub(super) fn current_scene(&self) -> Option<&str> {
        self.scenes.current.as_deref()
    }

    pub(super) fn frame(&self) -> u64 {
        self.frame
    }

    pub(super) fn set_camera_position(&mut self, position: Vec2) {
        self.camera = position;
    }

    pub(super) fn set_pointer_position(&mut self, position: Vec2) {
        self.pointer.position = position;
    }

    pub(super) fn find(&self, id: &str) -> Option<ObjectKey> {
        self.objects.find_by_id(id)
    }

    pub(super) fn snapshot(&self, id: &str) -> Option<ObjectSnapshot> {
        self.objects
            .find_by_id(id)
            .and_then(|key| self.objects.snapshot(key))
    }

    pub(super) fn live_ids(&self) -> Vec<String> {
        self.objects
            .live()
            .iter()
            .filter_map(|key| self.objects.id_of(*key).map(str::to_string))
            .collect()
    }

    pub(super) fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// Hidden objects and objects below the inactive layer border do not
    /// accept interaction.
    pub(super) fn is_interactable(&self, key: ObjectKey) -> bool {
        self.objects
            .get(key)
            .map(|object| object.visible && object.layer >= self.inactive_layer_border)
            .unwrap_or(false)
    }

    pub(super) fn push_subject(&mut self, subject: Option<ObjectKey>) -> Option<String> {
        self.subjects.push(subject);
        subject.and_then(|key| self.objects.id_of(key).map(str::to_string))
    }

    pub(super) fn pop_subject(&mut self) {
        self.subjects.pop();
    }

    fn current_subject(&self) -> Option<ObjectKey> {
        self.subjects.last().copied().flatten()
    }

    /// The object an implicit-subject operation acts on.
    pub(super) fn subject(&self, operation: &'static str) -> Result<ObjectKey, BridgeError> {
        let Some(key) = self.current_subject() else {
            error!("{operation} called with no current object");
            return Err(BridgeError::NoCurrentObject(operation));
        };
        if self.objects.get(key).is_none() {
            error!("{operation} called after its object was released");
            return Err(BridgeError::StaleSubject(operation));
        }
        Ok(key)
    }

    /// Resolves the target of an `...On` operation; unresolved targets are
    /// not an error.
    pub(super) fn target(&self, operation: &str, id: &str) -> Option<ObjectKey> {
        let key = self.objects.find_by_id(id);
        if key.is_none() {
            debug!("{operation}On: no object '{id}'");
        }
        key
    }

    /// Applies `mutation` natively, then mirrors it at the object's path.
    /// Native state wins when the mirror entry cannot be resolved.
    pub(super) fn apply(&mut self, lua: &Lua, key: ObjectKey, mutation: Mutation) -> LuaResult<Outcome> {
        let Some(object) = self.objects.get_mut(key) else {
            return Ok(Outcome::Rejected);
        };
        let result = match mutation {
            Mutation::PlayAnimation {
                track,
                name,
                looped,
            } => object
                .play_animation(track, &name, looped)
                .map(|entry| (Outcome::Started(entry), animation_fields(name, looped))),
            Mutation::AddAnimation {
                track,
                name,
                looped,
                delay,
            } => object
                .add_animation(track, &name, looped, delay)
                .map(|entry| (Outcome::Started(entry), animation_fields(name, looped))),
            Mutation::Skin(skin) => object
                .set_skin(&skin)
                .map(|()| (Outcome::Applied, vec![("skin", MirrorValue::Str(skin))])),
            Mutation::Visible(visible) => {
                object.visible = visible;
                Ok((Outcome::Applied, vec![("visible", MirrorValue::Bool(visible))]))
            }
            Mutation::Layer(layer) => {
                object.layer = layer;
                Ok((Outcome::Applied, vec![("layer", MirrorValue::Integer(layer))]))
            }
            Mutation::Rotation(degrees) => {
                object.rotation = degrees;
                Ok((
                    Outcome::Applied,
                    vec![("rotation", MirrorValue::Number(f64::from(degrees)))],
                ))
            }
            Mutation::Position(position) => {
                object.position = position;
                Ok((
                    Outcome::Applied,
                    vec![
                        ("x", MirrorValue::Number(f64::from(position.x))),
                        ("y", MirrorValue::Number(f64::from(position.y))),
                    ],
                ))
            }
            Mutation::ScaleX(scale) => {
                object.set_scale_x(scale);
                Ok((
                    Outcome::Applied,
                    vec![("scale_x", MirrorValue::Number(f64::from(scale)))],
                ))
            }
        };
        let id = object.id.clone();
        match result {
            Ok((outcome, fields)) => {
                self.mirror_write(lua, &id, fields)?;
                Ok(outcome)
            }
            Err(err) => {
                warn!("{id}: {err}");
                Ok(Outcome::Rejected)
            }
        }
    }

    fn mirror_write(&mut self, lua: &Lua, id: &str, fields: Vec<(&str, MirrorValue)>) -> LuaResult<()> {
        match mirror::resolve(lua, id)? {
            Some(path) => {
                if !mirror::write_fields(lua, &path, fields)? {
                    warn!("{id}: mirror entry {} vanished", path.dotted());
                }
            }
            None => warn!("{id}: no mirror path; native state kept without mirror"),
        }
        Ok(())
    }

    fn label(&self, key: Option<ObjectKey>, what: &str) -> String {
        let owner = key
            .and_then(|key| self.objects.id_of(key))
            .unwrap_or("global");
        format!("{owner}:{what}")
    }

    fn register_callback<'lua>(
        &mut self,
        lua: &'lua Lua,
        owner: Option<ObjectKey>,
        origin: CallbackOrigin,
        label: String,
        function: Function<'lua>,
    ) -> LuaResult<u32> {
        let function = lua.create_registry_value(function)?;
        Ok(self.callbacks.register(owner, origin, label, function))
    }

    fn drop_record(&mut self, record: CallbackRecord) {
        debug!("dropping callback {}", record.label);
        self.log_event(format!("callback.drop {}", record.label));
    }

    fn drop_handle(&mut self, handle: u32) {
        if let Some(record) = self.callbacks.take(handle) {
            self.drop_record(record);
        }
    }

    /// Callbacks of objects that are leaving or gone are dropped instead.
    fn queue_due(&mut self, record: CallbackRecord, due: &mut Vec<Due>) {
        let leaving = record.owner.is_some_and(|owner| {
            !matches!(
                self.objects.state(owner),
                Some(LifecycleState::Live | LifecycleState::PendingAdd)
            )
        });
        if leaving {
            self.drop_record(record);
            return;
        }
        due.push(Due {
            label: record.label,
            function: record.function,
            subject: record.owner,
        });
    }

    pub(super) fn animate<'lua>(
        &mut self,
        lua: &'lua Lua,
        key: ObjectKey,
        mutation: Mutation,
        callback: Option<Function<'lua>>,
    ) -> LuaResult<()> {
        let name = match &mutation {
            Mutation::PlayAnimation { name, .. } | Mutation::AddAnimation { name, .. } => name.clone(),
            _ => String::new(),
        };
        let Outcome::Started(entry) = self.apply(lua, key, mutation)? else {
            return Ok(());
        };
        if let Some(callback) = callback {
            let label = self.label(Some(key), &name);
            self.register_callback(lua, Some(key), CallbackOrigin::Animation(entry), label, callback)?;
        }
        Ok(())
    }

    pub(super) fn set_skin(&mut self, lua: &Lua, key: ObjectKey, skin: String) -> LuaResult<()> {
        self.apply(lua, key, Mutation::Skin(skin)).map(drop)
    }

    pub(super) fn set_visible(&mut self, lua: &Lua, key: ObjectKey, visible: bool) -> LuaResult<()> {
        self.apply(lua, key, Mutation::Visible(visible)).map(drop)
    }

    pub(super) fn set_layer(&mut self, lua: &Lua, key: ObjectKey, layer: i64) -> LuaResult<()> {
        self.apply(lua, key, Mutation::Layer(layer)).map(drop)
    }

    pub(super) fn set_rotation(&mut self, lua: &Lua, key: ObjectKey, degrees: f32) -> LuaResult<()> {
        self.apply(lua, key, Mutation::Rotation(degrees)).map(drop)
    }

    /// Moves the object's mirror entry into the inventory. The native flags
    /// are set first.
    pub(super) fn add_to_inventory(&mut self, lua: &Lua, key: ObjectKey, skin: Option<String>) -> LuaResult<()> {
        let skin = skin.unwrap_or_else(|| self.config.inventar_default_skin.clone());
        let Some(object) = self.objects.get_mut(key) else {
            return Ok(());
        };
        object.cross_scene = true;
        object.visible = false;
        if let Err(err) = object.set_skin(&skin) {
            warn!("{}: {err}", object.id);
        }
        let mirrored_skin = object.skin.clone().unwrap_or(skin);
        let id = object.id.clone();
        let scene = mirror::current_scene(lua)?;
        match inventory::move_to_inventory(lua, scene.as_deref(), &id, &mirrored_skin)? {
            InventoryMove::Moved => {
                info!("{id} moved to inventory");
                self.log_event(format!("inventory.add {id}"));
            }
            InventoryMove::AlreadyInInventory => debug!("{id} already in inventory"),
            InventoryMove::Missing => warn!("{id}: no mirror entry to move into the inventory"),
        }
        Ok(())
    }

    pub(super) fn remove_from_inventory(&mut self, lua: &Lua, key: ObjectKey) -> LuaResult<()> {
        let Some(object) = self.objects.get_mut(key) else {
            return Ok(());
        };
        object.cross_scene = false;
        let id = object.id.clone();
        if inventory::leave_inventory(lua, &id)? {
            self.log_event(format!("inventory.remove {id}"));
        }
        Ok(())
    }

    pub(super) fn delete(&mut self, lua: &Lua, key: ObjectKey) -> LuaResult<()> {
        if !self.objects.request_remove(key, Removal::Deleted) {
            return Ok(());
        }
        debug!("{} queued for deletion", self.label(Some(key), "delete"));
        let Some(id) = self.objects.id_of(key) else {
            return Ok(());
        };
        match mirror::resolve(lua, id)? {
            Some(path) => {
                self.deleted_paths.insert(key, path);
            }
            None => debug!("{id}: deleted without a mirror entry"),
        }
        Ok(())
    }

    pub(super) fn point_names(&self, key: ObjectKey) -> Vec<String> {
        self.objects
            .get(key)
            .map(WorldObject::point_names)
            .unwrap_or_default()
    }

    /// Named point looked up on `first`, then the player, then the scene
    /// background.
    pub(super) fn point_position(&self, first: Option<ObjectKey>, name: &str) -> Option<Vec2> {
        [first, self.player.key, self.scenes.background]
            .into_iter()
            .flatten()
            .find_map(|key| self.objects.get(key).and_then(|object| object.point(name)))
    }

    /// Walks to a point of `key` itself; the player and background points
    /// are not consulted.
    pub(super) fn go_to_point<'lua>(
        &mut self,
        lua: &'lua Lua,
        key: ObjectKey,
        point: &str,
        callback: Option<Function<'lua>>,
    ) -> LuaResult<()> {
        let Some(target) = self.objects.get(key).and_then(|object| object.point(point)) else {
            debug!("{} has no point '{point}'", self.label(Some(key), "walk"));
            return Ok(());
        };
        self.walk_to(lua, target, Some(key), point, callback, false)?;
        Ok(())
    }

    /// Sends the player towards `target`. Host walks respect the
    /// interruptible flag; script walks always start.
    pub(super) fn walk_to<'lua>(
        &mut self,
        lua: &'lua Lua,
        target: Vec2,
        subject: Option<ObjectKey>,
        what: &str,
        callback: Option<Function<'lua>>,
        from_host: bool,
    ) -> LuaResult<bool> {
        if from_host && !self.player.interruptible {
            debug!("player is not interruptible; walk to {target:?} ignored");
            return Ok(false);
        }
        if self.player.key.is_none() {
            warn!("no player to walk to {target:?}");
            return Ok(false);
        }
        let callback = match callback {
            Some(function) => {
                let label = self.label(subject, what);
                Some(self.register_callback(lua, subject, CallbackOrigin::Arrival, label, function)?)
            }
            None => None,
        };
        let walk = Walk {
            target,
            callback,
            subject,
        };
        if let Some(previous) = self.player.start_walk(walk) {
            self.drop_handle(previous);
        }
        Ok(true)
    }

    pub(super) fn stop_walking(&mut self) {
        if let Some(handle) = self.player.stop_walking() {
            self.drop_handle(handle);
        }
    }

    pub(super) fn set_interruptible(&mut self, interruptible: bool) {
        self.player.interruptible = interruptible;
    }

    pub(super) fn set_position_to_point(&mut self, lua: &Lua, key: ObjectKey, point: &str) -> LuaResult<()> {
        match self.point_position(Some(key), point) {
            Some(position) => self.apply(lua, key, Mutation::Position(position)).map(drop),
            None => {
                debug!("no point '{point}' for {}", self.label(Some(key), "position"));
                Ok(())
            }
        }
    }

    /// Places `object` on a point of `from`; screen-space points are shifted
    /// by the camera.
    pub(super) fn set_on_to_point_from(&mut self, lua: &Lua, object: &str, from: &str, point: &str) -> LuaResult<()> {
        let Some(source) = self.target("SetOnToPointFrom", from) else {
            return Ok(());
        };
        let Some(source) = self.objects.get(source) else {
            return Ok(());
        };
        let Some(mut position) = source.point(point) else {
            return Ok(());
        };
        if source.abs_position {
            position = position + self.camera;
        }
        match self.target("SetOnToPointFrom", object) {
            Some(key) => self.apply(lua, key, Mutation::Position(position)).map(drop),
            None => Ok(()),
        }
    }

    pub(super) fn set_speech_bubble_to_point(&mut self, lua: &Lua, key: ObjectKey, point: &str) -> LuaResult<()> {
        let Some(position) = self.point_position(Some(key), point) else {
            return Ok(());
        };
        self.dialogs.set_speech_bubble_position(position);
        mirror::set_global(lua, "speech_bubble_position_x", MirrorValue::Number(f64::from(position.x)))?;
        mirror::set_global(lua, "speech_bubble_position_y", MirrorValue::Number(f64::from(position.y)))
    }

    pub(super) fn attach_to_pointer(&mut self, key: ObjectKey) {
        if let Some(object) = self.objects.get_mut(key) {
            object.parent = Some(ParentRef::Pointer);
            self.pointer.attach(key);
        }
    }

    pub(super) fn detach_from_pointer(&mut self, key: ObjectKey) {
        if let Some(object) = self.objects.get_mut(key) {
            object.parent = None;
        }
        let objects = &self.objects;
        self.pointer.detach(key, |attached| objects.get(attached).is_none());
    }

    pub(super) fn is_attached_to_pointer(&self, key: ObjectKey) -> bool {
        self.objects
            .get(key)
            .is_some_and(|object| object.parent == Some(ParentRef::Pointer))
    }

    /// Hides and unparents every attached object.
    pub(super) fn detach_all_from_pointer(&mut self, lua: &Lua) -> LuaResult<()> {
        for key in self.pointer.take_all() {
            let Some(object) = self.objects.get_mut(key) else {
                continue;
            };
            object.parent = None;
            self.apply(lua, key, Mutation::Visible(false))?;
        }
        Ok(())
    }

    pub(super) fn something_attached(&self) -> bool {
        self.pointer.has_attachments()
    }

    pub(super) fn request_scene(&mut self, scene: String) {
        debug!("scene {scene} requested");
        self.scenes.requested = Some(scene);
    }

    pub(super) fn play_dialog<'lua>(
        &mut self,
        lua: &'lua Lua,
        dialog: &str,
        callback: Option<Function<'lua>>,
    ) -> LuaResult<()> {
        let owner = self.current_subject();
        let ticket = self.dialogs.play(dialog, None);
        self.log_event(format!("dialog.play {dialog}"));
        if let Some(callback) = callback {
            let label = self.label(owner, dialog);
            self.register_callback(lua, owner, CallbackOrigin::Dialog(ticket), label, callback)?;
        }
        Ok(())
    }

    pub(super) fn set_inactive_layer_border(&mut self, lua: &Lua, layer: i64) -> LuaResult<()> {
        self.inactive_layer_border = layer;
        mirror::set_global(lua, INACTIVE_LAYER_GLOBAL, MirrorValue::Integer(layer))
    }

    pub(super) fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub(super) fn set_player_max_speed(&mut self, lua: &Lua, speed: f32) -> LuaResult<()> {
        self.player.max_speed = speed;
        mirror::write_global(lua, PLAYER_ROOT, "max_speed", MirrorValue::Number(f64::from(speed)))
    }

    pub(super) fn set_player_scale_x(&mut self, lua: &Lua, scale: f32) -> LuaResult<()> {
        match self.player.key {
            Some(key) => self.apply(lua, key, Mutation::ScaleX(scale)).map(drop),
            None => Ok(()),
        }
    }

    /// Creates an object in the current scene. The object is registered
    /// straight away and becomes live at the next commit.
    pub(super) fn create_object(&mut self, lua: &Lua, spine: String, id: String, scale: f32) -> LuaResult<bool> {
        let spec = ObjectSpec {
            id,
            spine,
            position: Vec2::ZERO,
            animation: None,
            loop_animation: true,
            skin: None,
            visible: true,
            layer: 1,
            scale,
            rotation: 0.0,
            abs_position: false,
        };
        if self.spawn(&spec, ObjectKind::Item).is_none() {
            return Ok(false);
        }
        let items = match mirror::current_scene(lua)? {
            Some(scene) => {
                mirror::ensure_roots(lua)?;
                let scenes = lua.globals().raw_get::<_, mlua::Table>(mirror::SCENES_ROOT)?;
                let scene_table = match mirror::child_table(&scenes, &scene)? {
                    Some(table) => table,
                    None => {
                        let table = lua.create_table()?;
                        scenes.raw_set(scene.as_str(), table.clone())?;
                        table
                    }
                };
                match mirror::child_table(&scene_table, "items")? {
                    Some(items) => Some(items),
                    None => {
                        let items = lua.create_table()?;
                        scene_table.raw_set("items", items.clone())?;
                        Some(items)
                    }
                }
            }
            None => None,
        };
        match items {
            Some(items) => {
                let entry = lua.create_table()?;
                entry.raw_set("spine", spec.spine.as_str())?;
                entry.raw_set("x", 0.0)?;
                entry.raw_set("y", 0.0)?;
                entry.raw_set("scale", f64::from(scale))?;
                entry.raw_set("visible", true)?;
                entry.raw_set("layer", 1)?;
                items.raw_set(spec.id.as_str(), entry)?;
            }
            None => warn!("{}: no current scene to mirror into", spec.id),
        }
        Ok(true)
    }

    pub(super) fn play_audio(&mut self, file: &str) {
        let routed = self.audio.play(file);
        self.log_event(format!("audio.play {routed}"));
    }

    pub(super) fn subject_id(&self, operation: &'static str) -> Result<String, BridgeError> {
        let key = self.subject(operation)?;
        Ok(self.objects.id_of(key).unwrap_or_default().to_string())
    }

    /// Switches the dialog language. Unsupported languages are ignored.
    pub(super) fn set_language(&mut self, lua: &Lua, language: String) -> LuaResult<bool> {
        if !self.config.supports_language(&language) {
            warn!("{}", BridgeError::UnsupportedLanguage(language));
            return Ok(false);
        }
        mirror::write_global(lua, mirror::GAME_ROOT, "language", MirrorValue::Str(language.clone()))?;
        self.reload_dialogs(&language);
        self.language = Some(language);
        Ok(true)
    }

    fn reload_dialogs(&mut self, language: &str) {
        let Some(path) = self.config.dialog_path() else {
            return;
        };
        if let Err(err) = self.dialogs.load_dialogs(&path, language) {
            warn!("loading dialogs from {}: {err:#}", path.display());
        }
    }

    pub(super) fn lua_path(&self, lua: &Lua, id: &str) -> LuaResult<Option<String>> {
        Ok(mirror::resolve(lua, id)?.map(|path| path.dotted()))
    }

    fn check_save_name(&self, name: &str) -> Result<(), BridgeError> {
        if self.save_name.is_match(name) {
            Ok(())
        } else {
            Err(BridgeError::InvalidSaveName(name.to_string()))
        }
    }

    pub(super) fn save_path(&self, name: &str) -> Result<PathBuf, BridgeError> {
        self.check_save_name(name)?;
        Ok(self.config.save_dir_path().join(format!("{name}.lua")))
    }

    pub(super) fn request_save(&mut self, name: String) -> Result<(), BridgeError> {
        self.check_save_name(&name)?;
        self.persistence = Some(PersistenceRequest::Save(name));
        Ok(())
    }

    pub(super) fn request_load(&mut self, name: String) -> Result<(), BridgeError> {
        self.check_save_name(&name)?;
        self.persistence = Some(PersistenceRequest::Load(name));
        Ok(())
    }

    /// Queues creation of the object described by `spec`. Spawning never
    /// touches the mirror; the entry already describes the object.
    fn spawn(&mut self, spec: &ObjectSpec, kind: ObjectKind) -> Option<ObjectKey> {
        let skeleton = match self.skeletons.load(&spec.spine, spec.scale) {
            Ok(skeleton) => skeleton,
            Err(err) => {
                warn!("{}: {err}", spec.id);
                return None;
            }
        };
        let mut object = WorldObject::new(&spec.id, kind, &spec.spine, spec.scale, skeleton);
        object.position = spec.position;
        object.rotation = spec.rotation;
        object.visible = spec.visible;
        object.layer = spec.layer;
        object.abs_position = spec.abs_position;
        if let Some(skin) = &spec.skin {
            if let Err(err) = object.set_skin(skin) {
                warn!("{}: {err}", spec.id);
            }
        }
        let animation = spec
            .animation
            .clone()
            .unwrap_or_else(|| self.config.spine_default_animation.clone());
        if let Err(err) = object.play_animation(0, &animation, spec.loop_animation) {
            debug!("{}: {err}", spec.id);
        }
        match self.objects.request_add(object) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }

    /// Spawns the player from the player root, seeding missing fields from
    /// the configuration.
    pub(super) fn spawn_player(&mut self, lua: &Lua) -> LuaResult<()> {
        mirror::ensure_roots(lua)?;
        let Some(root) = mirror::root_table(lua, PLAYER_ROOT)? else {
            return Ok(());
        };
        let start = self.config.player_start;
        let position = Vec2::new(
            root.raw_get::<_, Option<f32>>("x")?.unwrap_or(start.x),
            root.raw_get::<_, Option<f32>>("y")?.unwrap_or(start.y),
        );
        let spec = ObjectSpec {
            id: PLAYER_ID.to_string(),
            spine: self.config.player_spine.clone(),
            position,
            animation: None,
            loop_animation: true,
            skin: root.raw_get("skin")?,
            visible: root.raw_get::<_, Option<bool>>("visible")?.unwrap_or(true),
            layer: root.raw_get::<_, Option<i64>>("layer")?.unwrap_or(1),
            scale: root.raw_get::<_, Option<f32>>("scale")?.unwrap_or(1.0),
            rotation: 0.0,
            abs_position: false,
        };
        let max_speed = root
            .raw_get::<_, Option<f32>>("max_speed")?
            .unwrap_or(self.config.player_max_speed);
        let scale_x = root.raw_get::<_, Option<f32>>("scale_x")?;

        self.player.key = self.spawn(&spec, ObjectKind::Player);
        self.player.max_speed = max_speed;
        root.raw_set("x", f64::from(position.x))?;
        root.raw_set("y", f64::from(position.y))?;
        root.raw_set("max_speed", f64::from(max_speed))?;
        if let (Some(key), Some(scale_x)) = (self.player.key, scale_x) {
            if let Some(object) = self.objects.get_mut(key) {
                object.set_scale_x(scale_x);
            }
        }
        Ok(())
    }

    /// Recreates inventory objects: hidden and kept across scenes.
    fn spawn_inventory(&mut self, lua: &Lua) -> LuaResult<()> {
        let Some(inventory) = mirror::root_table(lua, mirror::INVENTORY_ROOT)? else {
            return Ok(());
        };
        for spec in scenes::read_entries(&inventory)? {
            let Some(key) = self.spawn(&spec, ObjectKind::Item) else {
                continue;
            };
            if let Some(object) = self.objects.get_mut(key) {
                object.cross_scene = true;
                object.visible = false;
            }
        }
        Ok(())
    }

    /// Queues the scene switch. The scene table must already exist.
    fn enter_scene(&mut self, lua: &Lua, scene: &str) -> LuaResult<()> {
        mirror::set_current_scene(lua, scene)?;
        self.scenes.current = Some(scene.to_string());
        for key in self
            .objects
            .keys_in(&[LifecycleState::PendingAdd, LifecycleState::Live])
        {
            let stays = self
                .objects
                .get(key)
                .is_some_and(|object| object.cross_scene || object.kind == ObjectKind::Player);
            if !stays {
                self.objects.request_remove(key, Removal::Unloaded);
            }
        }
        let layout = scenes::read_scene(lua, scene)?;
        self.scenes.background = layout
            .background
            .as_ref()
            .and_then(|background| self.spawn(background, ObjectKind::Background));
        for item in &layout.items {
            self.spawn(item, ObjectKind::Item);
        }
        info!("entering scene {scene} ({} items)", layout.items.len());
        self.log_event(format!("scene.load {scene}"));
        Ok(())
    }

    /// Queues removal of every object ahead of a rebuild from the mirror.
    fn unload_all(&mut self) {
        self.stop_walking();
        for key in self.pointer.take_all() {
            if let Some(object) = self.objects.get_mut(key) {
                object.parent = None;
            }
        }
        for key in self
            .objects
            .keys_in(&[LifecycleState::PendingAdd, LifecycleState::Live])
        {
            self.objects.request_remove(key, Removal::Unloaded);
        }
        self.player.key = None;
        self.scenes.background = None;
    }

    /// Picks up host-side state that lives in mirror globals.
    fn restore_globals(&mut self, lua: &Lua) -> LuaResult<()> {
        self.inactive_layer_border = lua
            .globals()
            .raw_get::<_, Option<i64>>(INACTIVE_LAYER_GLOBAL)?
            .unwrap_or(0);
        let language = mirror::root_table(lua, mirror::GAME_ROOT)?
            .map(|game| game.raw_get::<_, Option<String>>("language"))
            .transpose()?
            .flatten();
        if let Some(language) = language {
            if self.config.supports_language(&language) && self.language.as_deref() != Some(language.as_str()) {
                self.reload_dialogs(&language);
                self.language = Some(language);
            }
        }
        Ok(())
    }

    /// Seeds the mirror globals a fresh game starts with.
    pub(super) fn seed_mirror(&mut self, lua: &Lua) -> LuaResult<()> {
        mirror::ensure_roots(lua)?;
        if lua.globals().raw_get::<_, Value>(INACTIVE_LAYER_GLOBAL)?.is_nil() {
            mirror::set_global(lua, INACTIVE_LAYER_GLOBAL, MirrorValue::Integer(self.inactive_layer_border))?;
        }
        if let Some(language) = self.language.clone() {
            mirror::write_global(lua, mirror::GAME_ROOT, "language", MirrorValue::Str(language.clone()))?;
            self.reload_dialogs(&language);
        }
        Ok(())
    }

    fn follow_pointer(&mut self, lua: &Lua) -> LuaResult<()> {
        let position = self.pointer.position;
        for key in self.pointer.attached().to_vec() {
            let moved = self
                .objects
                .get(key)
                .is_some_and(|object| object.position != position);
            if moved {
                self.apply(lua, key, Mutation::Position(position))?;
            }
        }
        Ok(())
    }

    fn advance_walk(&mut self, lua: &Lua, dt: f32, due: &mut Vec<Due>) -> LuaResult<()> {
        let Some(walk) = self.player.walk.clone() else {
            return Ok(());
        };
        let player = self
            .player
            .key
            .and_then(|key| self.objects.get(key).map(|object| (key, object.position)));
        let Some((key, position)) = player else {
            self.stop_walking();
            return Ok(());
        };
        let (next, arrived) = movement::advance(position, walk.target, self.player.max_speed, dt);
        if next != position {
            self.apply(lua, key, Mutation::Position(next))?;
        }
        if arrived {
            self.player.walk = None;
            if let Some(record) = walk.callback.and_then(|handle| self.callbacks.take(handle)) {
                self.queue_due(record, due);
            }
        }
        Ok(())
    }

    /// Frame steps 1 to 3: time, walk, skeletons and dialogs. Returns the
    /// callbacks to dispatch.
    fn collect_due(&mut self, lua: &Lua, dt: f32) -> LuaResult<Vec<Due>> {
        self.frame += 1;
        self.elapsed += f64::from(dt);
        let mut due = Vec::new();
        self.follow_pointer(lua)?;
        self.advance_walk(lua, dt, &mut due)?;

        for key in self
            .objects
            .keys_in(&[LifecycleState::Live, LifecycleState::PendingRemove])
        {
            let Some(object) = self.objects.get_mut(key) else {
                continue;
            };
            for event in object.skeleton.step(dt) {
                let origin = CallbackOrigin::Animation(event.entry);
                let Some(record) = self.callbacks.take_origin(Some(key), origin) else {
                    continue;
                };
                match event.kind {
                    TrackEventKind::Complete => self.queue_due(record, &mut due),
                    TrackEventKind::Discarded => self.drop_record(record),
                }
            }
        }

        for ticket in self.dialogs.poll_finished() {
            if let Some(record) = self.callbacks.take_dialog(ticket) {
                self.queue_due(record, &mut due);
            }
        }
        Ok(due)
    }

    /// Applies the queued lifecycle requests and cleans up after removed
    /// objects.
    pub(super) fn commit(&mut self, lua: &Lua) -> LuaResult<CommitSummary> {
        let report = self.objects.commit();
        let mut summary = CommitSummary::default();
        for key in report.added {
            if let Some(id) = self.objects.id_of(key) {
                summary.added.push(id.to_string());
            }
        }
        for (key, object, reason) in report.removed {
            for record in self.callbacks.drop_owner(key) {
                self.drop_record(record);
            }
            self.pointer.forget(key);
            let orphaned_walk = self
                .player
                .walk
                .as_mut()
                .filter(|walk| walk.subject == Some(key))
                .and_then(|walk| walk.callback.take());
            if let Some(handle) = orphaned_walk {
                self.drop_handle(handle);
            }
            if self.player.key == Some(key) {
                self.player.key = None;
            }
            if self.scenes.background == Some(key) {
                self.scenes.background = None;
            }
            if let Some(path) = self.deleted_paths.remove(&key) {
                if reason == Removal::Deleted {
                    mirror::remove_entry(lua, &path)?;
                }
            }
            summary.removed.push(object.id);
        }
        for id in &summary.added {
            self.log_event(format!("object.add {id}"));
        }
        for id in &summary.removed {
            self.log_event(format!("object.remove {id}"));
        }
        lua.expire_registry_values();
        Ok(summary)
    }
}

fn animation_fields(name: String, looped: bool) -> Vec<(&'static str, MirrorValue)> {
    vec![
        ("animation", MirrorValue::Str(name)),
        ("loop_animation", MirrorValue::Bool(looped)),
    ]
}

/// Calls `function` with `subject` bound as the current object. No context
/// borrow is held while script code runs.
fn call_with_subject(
    context: &Rc<RefCell<EngineContext>>,
    subject: Option<ObjectKey>,
    function: &Function,
) -> LuaResult<()> {
    let subject_id = context.borrow_mut().push_subject(subject);
    let result = function.call::<_, ()>(subject_id);
    context.borrow_mut().pop_subject();
    result
}

fn dispatch(lua: &Lua, context: &Rc<RefCell<EngineContext>>, due: Vec<Due>) -> LuaResult<usize> {
    let mut fired = 0;
    for due in due {
        let function: Function = lua.registry_value(&due.function)?;
        lua.remove_registry_value(due.function)?;
        context
            .borrow_mut()
            .log_event(format!("callback.fire {}", due.label));
        if let Err(err) = call_with_subject(context, due.subject, &function) {
            error!("callback {} failed: {err}", due.label);
            context
                .borrow_mut()
                .log_event(format!("callback.error {}", due.label));
        }
        fired += 1;
    }
    Ok(fired)
}

/// Runs the global script function `name` with `subject` as current object.
pub(super) fn invoke(
    lua: &Lua,
    context: &Rc<RefCell<EngineContext>>,
    name: &str,
    subject: Option<ObjectKey>,
) -> Result<()> {
    let function: Function = lua
        .globals()
        .get(name)
        .with_context(|| format!("script function {name} is not defined"))?;
    call_with_subject(context, subject, &function).with_context(|| format!("running {name}"))
}

/// Switches to `scene`, running its script first when the mirror has no
/// table for it yet.
pub(super) fn enter_scene(lua: &Lua, context: &Rc<RefCell<EngineContext>>, scene: &str) -> Result<()> {
    let scene_dir = context.borrow().config.scene_dir_path();
    scenes::ensure_scene_table(lua, &scene_dir, scene)?;
    context
        .borrow_mut()
        .enter_scene(lua, scene)
        .with_context(|| format!("entering scene {scene}"))
}

/// Rebuilds every native object from the mirror.
fn rebuild_world(lua: &Lua, context: &Rc<RefCell<EngineContext>>) -> Result<()> {
    let scene = {
        let mut ctx = context.borrow_mut();
        ctx.unload_all();
        ctx.restore_globals(lua)?;
        ctx.spawn_player(lua)?;
        ctx.spawn_inventory(lua)?;
        match mirror::current_scene(lua)? {
            Some(scene) => scene,
            None => ctx.config.start_scene.clone(),
        }
    };
    enter_scene(lua, context, &scene)
}

pub(super) fn save_to(lua: &Lua, context: &Rc<RefCell<EngineContext>>, path: &Path) -> Result<usize> {
    let roots = context.borrow().config.save_roots.clone();
    let count = persistence::write_save(lua, path, &roots)?;
    info!("saved {count} statements to {}", path.display());
    context
        .borrow_mut()
        .log_event(format!("save.write {}", path.display()));
    Ok(count)
}

/// Replaces the mirror with the save at `path` and rebuilds the world. A
/// rejected file, or one whose current scene cannot be entered, leaves
/// both untouched.
pub(super) fn load_from(lua: &Lua, context: &Rc<RefCell<EngineContext>>, path: &Path) -> Result<usize> {
    let (roots, scene_dir, start_scene) = {
        let ctx = context.borrow();
        (
            ctx.config.save_roots.clone(),
            ctx.config.scene_dir_path(),
            ctx.config.start_scene.clone(),
        )
    };
    let previous = persistence::snapshot_roots(lua, &roots)?;
    let count = persistence::read_save(lua, path, &roots)?;
    let scene = mirror::current_scene(lua)?.unwrap_or(start_scene);
    if let Err(err) = scenes::ensure_scene_table(lua, &scene_dir, &scene) {
        persistence::install_staging(lua, &previous, &roots)?;
        return Err(err.context(format!("{} names scene {scene}", path.display())));
    }
    info!("loaded {count} statements from {}", path.display());
    context
        .borrow_mut()
        .log_event(format!("save.load {}", path.display()));
    rebuild_world(lua, context)?;
    Ok(count)
}

fn process_persistence(lua: &Lua, context: &Rc<RefCell<EngineContext>>) {
    let Some(request) = context.borrow_mut().persistence.take() else {
        return;
    };
    let (name, loading) = match request {
        PersistenceRequest::Save(name) => (name, false),
        PersistenceRequest::Load(name) => (name, true),
    };
    let path = context.borrow().save_path(&name);
    let result = match path {
        Ok(path) if loading => load_from(lua, context, &path).map(drop),
        Ok(path) => save_to(lua, context, &path).map(drop),
        Err(err) => Err(err.into()),
    };
    if let Err(err) = result {
        error!("save game {name}: {err:#}");
        context
            .borrow_mut()
            .log_event(format!("save.error {name}"));
    }
}

/// Runs one frame: walk, skeletons, dialogs, callbacks, scene loads, the
/// single commit and finally persistence.
pub(super) fn step_frame(lua: &Lua, context: &Rc<RefCell<EngineContext>>, dt: f32) -> Result<FrameReport> {
    let due = context
        .borrow_mut()
        .collect_due(lua, dt)
        .context("advancing frame")?;
    let callbacks_fired = dispatch(lua, context, due).context("dispatching callbacks")?;

    let requested = context.borrow_mut().scenes.requested.take();
    if let Some(scene) = requested {
        if let Err(err) = enter_scene(lua, context, &scene) {
            error!("loading scene {scene}: {err:#}");
            context
                .borrow_mut()
                .log_event(format!("scene.error {scene}"));
        }
    }

    let summary = context.borrow_mut().commit(lua).context("committing objects")?;
    process_persistence(lua, context);

    let frame = context.borrow().frame;
    Ok(FrameReport {
        frame,
        added: summary.added,
        removed: summary.removed,
        callbacks_fired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{SkeletonLibrary, SkeletonManifest};

    fn library() -> SkeletonLibrary {
        let mut library = SkeletonLibrary::new();
        let mut player = SkeletonManifest::default();
        player.animations.insert("idle".into(), 1.0);
        library.insert("player", player);
        let mut door = SkeletonManifest::default();
        door.animations.insert("idle".into(), 1.0);
        door.animations.insert("open".into(), 0.5);
        door.points.insert("entry".into(), Vec2::new(-20.0, 40.0));
        library.insert("door", door);
        let mut key = SkeletonManifest::default();
        key.animations.insert("idle".into(), 1.0);
        key.skins = vec!["default".into(), "inventory".into()];
        library.insert("key", key);
        library
    }

    fn world() -> (Lua, Rc<RefCell<EngineContext>>) {
        let lua = Lua::new();
        let dir = std::env::temp_dir();
        let config = Rc::new(EngineConfig::new(dir, "cabin").unwrap());
        let context = EngineContext::new(
            config,
            Rc::new(library()),
            None,
            Box::new(QueuedDialogPresenter::new()),
        )
        .unwrap();
        let context = Rc::new(RefCell::new(context));
        lua.load(
            r#"
            scenes = { cabin = { items = {
                door = { spine = "door", x = 480, y = 280 },
                key1 = { spine = "key", x = 220, y = 310, skin = "default" },
            } } }
            "#,
        )
        .exec()
        .unwrap();
        {
            let mut ctx = context.borrow_mut();
            ctx.seed_mirror(&lua).unwrap();
            ctx.spawn_player(&lua).unwrap();
        }
        enter_scene(&lua, &context, "cabin").unwrap();
        context.borrow_mut().commit(&lua).unwrap();
        (lua, context)
    }

    fn counter(lua: &Lua) -> Function<'_> {
        lua.load("return function() fired = (fired or 0) + 1 end")
            .eval()
            .unwrap()
    }

    fn fired(lua: &Lua) -> i64 {
        lua.globals().get::<_, Option<i64>>("fired").unwrap().unwrap_or(0)
    }

    #[test]
    fn scene_objects_become_live_after_commit() {
        let (_lua, context) = world();
        let ids = context.borrow().live_ids();
        assert_eq!(ids, vec!["player", "door", "key1"]);
    }

    #[test]
    fn dual_write_keeps_mirror_in_step() {
        let (lua, context) = world();
        let key = context.borrow().find("key1").unwrap();
        {
            let mut ctx = context.borrow_mut();
            ctx.set_layer(&lua, key, 3).unwrap();
            ctx.set_visible(&lua, key, false).unwrap();
            ctx.apply(&lua, key, Mutation::Position(Vec2::new(5.0, 6.5)))
                .unwrap();
        }
        let (layer, visible, x, y): (i64, bool, f32, f32) = lua
            .load("local e = scenes.cabin.items.key1; return e.layer, e.visible, e.x, e.y")
            .eval()
            .unwrap();
        let snapshot = context.borrow().snapshot("key1").unwrap();
        assert_eq!(layer, snapshot.layer);
        assert_eq!(visible, snapshot.visible);
        assert_eq!(Vec2::new(x, y), snapshot.position);
    }

    #[test]
    fn rejected_skin_leaves_both_sides_alone() {
        let (lua, context) = world();
        let key = context.borrow().find("key1").unwrap();
        let outcome = context
            .borrow_mut()
            .apply(&lua, key, Mutation::Skin("gold".into()))
            .unwrap();
        assert_eq!(outcome, Outcome::Rejected);
        let skin: String = lua.load("return scenes.cabin.items.key1.skin").eval().unwrap();
        assert_eq!(skin, "default");
        assert_eq!(context.borrow().snapshot("key1").unwrap().skin.as_deref(), Some("default"));
    }

    #[test]
    fn animation_callback_fires_once() {
        let (lua, context) = world();
        let key = context.borrow().find("door").unwrap();
        let mutation = Mutation::AddAnimation {
            track: 0,
            name: "open".into(),
            looped: false,
            delay: 0.0,
        };
        context
            .borrow_mut()
            .animate(&lua, key, mutation, Some(counter(&lua)))
            .unwrap();
        for _ in 0..120 {
            step_frame(&lua, &context, 1.0 / 60.0).unwrap();
        }
        assert_eq!(fired(&lua), 1);
        assert!(context
            .borrow()
            .events()
            .contains(&"callback.fire door:open".to_string()));
    }

    #[test]
    fn deletion_purges_the_scene_it_was_requested_in() {
        let (lua, context) = world();
        lua.load(
            r#"
            scenes.forest = { items = { key1 = { spine = "key", x = 90, y = 300 } } }
            "#,
        )
        .exec()
        .unwrap();
        let key = context.borrow().find("key1").unwrap();
        {
            let mut ctx = context.borrow_mut();
            ctx.delete(&lua, key).unwrap();
            ctx.request_scene("forest".into());
        }
        step_frame(&lua, &context, 1.0 / 60.0).unwrap();
        let (cabin_gone, forest_kept): (bool, bool) = lua
            .load("return scenes.cabin.items.key1 == nil, scenes.forest.items.key1 ~= nil")
            .eval()
            .unwrap();
        assert!(cabin_gone);
        assert!(forest_kept);
        let snapshot = context.borrow().snapshot("key1").unwrap();
        assert_eq!(snapshot.position.x, 90.0);
    }

    #[test]
    fn deletion_survives_switch_to_scene_without_the_id() {
        let (lua, context) = world();
        lua.load("scenes.meadow = { items = {} }").exec().unwrap();
        let key = context.borrow().find("key1").unwrap();
        {
            let mut ctx = context.borrow_mut();
            ctx.delete(&lua, key).unwrap();
            ctx.request_scene("meadow".into());
        }
        step_frame(&lua, &context, 1.0 / 60.0).unwrap();
        let gone: bool = lua.load("return scenes.cabin.items.key1 == nil").eval().unwrap();
        assert!(gone);
        assert!(context.borrow().find("key1").is_none());
        assert!(context.borrow().events().contains(&"object.remove key1".to_string()));
    }

    #[test]
    fn deleted_owner_never_fires() {
        let (lua, context) = world();
        let key = context.borrow().find("door").unwrap();
        let mutation = Mutation::PlayAnimation {
            track: 0,
            name: "open".into(),
            looped: false,
        };
        {
            let mut ctx = context.borrow_mut();
            ctx.animate(&lua, key, mutation, Some(counter(&lua))).unwrap();
            ctx.delete(&lua, key).unwrap();
        }
        for _ in 0..60 {
            step_frame(&lua, &context, 1.0 / 60.0).unwrap();
        }
        assert_eq!(fired(&lua), 0);
        assert_eq!(context.borrow().pending_callbacks(), 0);
        let gone: bool = lua.load("return scenes.cabin.items.door == nil").eval().unwrap();
        assert!(gone);
        assert!(context
            .borrow()
            .events()
            .contains(&"callback.drop door:open".to_string()));
    }

    #[test]
    fn walking_moves_player_and_fires_on_arrival() {
        let (lua, context) = world();
        let door = context.borrow().find("door").unwrap();
        context
            .borrow_mut()
            .go_to_point(&lua, door, "entry", Some(counter(&lua)))
            .unwrap();
        for _ in 0..240 {
            step_frame(&lua, &context, 1.0 / 60.0).unwrap();
        }
        assert_eq!(fired(&lua), 1);
        let snapshot = context.borrow().snapshot("player").unwrap();
        assert_eq!(snapshot.position, Vec2::new(460.0, 320.0));
        let (x, y): (f32, f32) = lua.load("return player.x, player.y").eval().unwrap();
        assert_eq!(Vec2::new(x, y), snapshot.position);
    }

    #[test]
    fn replaced_walk_drops_previous_callback() {
        let (lua, context) = world();
        let door = context.borrow().find("door").unwrap();
        {
            let mut ctx = context.borrow_mut();
            ctx.go_to_point(&lua, door, "entry", Some(counter(&lua))).unwrap();
            ctx.walk_to(&lua, Vec2::new(0.0, 0.0), None, "floor", None, false)
                .unwrap();
        }
        assert_eq!(context.borrow().pending_callbacks(), 0);
        context.borrow_mut().set_interruptible(false);
        let started = context
            .borrow_mut()
            .walk_to(&lua, Vec2::new(9.0, 9.0), None, "floor", None, true)
            .unwrap();
        assert!(!started);
    }

    #[test]
    fn pointer_detach_all_hides_objects() {
        let (lua, context) = world();
        let key = context.borrow().find("key1").unwrap();
        {
            let mut ctx = context.borrow_mut();
            ctx.attach_to_pointer(key);
            ctx.attach_to_pointer(key);
            assert!(ctx.is_attached_to_pointer(key));
            ctx.set_pointer_position(Vec2::new(30.0, 40.0));
        }
        step_frame(&lua, &context, 1.0 / 60.0).unwrap();
        let x: f32 = lua.load("return scenes.cabin.items.key1.x").eval().unwrap();
        assert_eq!(x, 30.0);

        context.borrow_mut().detach_all_from_pointer(&lua).unwrap();
        let ctx = context.borrow();
        assert!(!ctx.something_attached());
        assert!(!ctx.is_attached_to_pointer(key));
        assert!(!ctx.snapshot("key1").unwrap().visible);
    }

    #[test]
    fn save_names_are_restricted() {
        let (_lua, context) = world();
        let mut ctx = context.borrow_mut();
        assert!(ctx.request_save("slot_1-a".into()).is_ok());
        assert!(matches!(
            ctx.request_save("../etc".into()),
            Err(BridgeError::InvalidSaveName(_))
        ));
    }
}
