use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use mlua::{Lua, Result as LuaResult, Table, Value};

use crate::lua_host::types::Vec2;

use super::mirror::{self, SCENES_ROOT};
use super::objects::ObjectKey;

/// Authored description of one object, read from a mirror entry.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ObjectSpec {
    pub(super) id: String,
    pub(super) spine: String,
    pub(super) position: Vec2,
    pub(super) animation: Option<String>,
    pub(super) loop_animation: bool,
    pub(super) skin: Option<String>,
    pub(super) visible: bool,
    pub(super) layer: i64,
    pub(super) scale: f32,
    pub(super) rotation: f32,
    pub(super) abs_position: bool,
}

impl ObjectSpec {
    /// Returns `None` when the entry names no skeleton.
    pub(super) fn from_table(id: &str, table: &Table) -> LuaResult<Option<Self>> {
        let Some(spine) = table.raw_get::<_, Option<String>>("spine")? else {
            return Ok(None);
        };
        Ok(Some(Self {
            id: id.to_string(),
            spine,
            position: Vec2::new(
                table.raw_get::<_, Option<f32>>("x")?.unwrap_or(0.0),
                table.raw_get::<_, Option<f32>>("y")?.unwrap_or(0.0),
            ),
            animation: table.raw_get("animation")?,
            loop_animation: table.raw_get::<_, Option<bool>>("loop_animation")?.unwrap_or(true),
            skin: table.raw_get("skin")?,
            visible: table.raw_get::<_, Option<bool>>("visible")?.unwrap_or(true),
            layer: table.raw_get::<_, Option<i64>>("layer")?.unwrap_or(1),
            scale: table.raw_get::<_, Option<f32>>("scale")?.unwrap_or(1.0),
            rotation: table.raw_get::<_, Option<f32>>("rotation")?.unwrap_or(0.0),
            abs_position: table.raw_get::<_, Option<bool>>("abs_position")?.unwrap_or(false),
        }))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(super) struct SceneLayout {
    pub(super) background: Option<ObjectSpec>,
    pub(super) items: Vec<ObjectSpec>,
}

#[derive(Debug, Default)]
pub(super) struct SceneRuntime {
    pub(super) current: Option<String>,
    pub(super) background: Option<ObjectKey>,
    /// Scene requested by script, entered after this frame's callbacks.
    pub(super) requested: Option<String>,
}

/// Runs `<scene_dir>/<name>.lua` unless `scenes.<name>` already exists.
/// Returns true when the script ran.
pub(super) fn ensure_scene_table(lua: &Lua, scene_dir: &Path, name: &str) -> Result<bool> {
    if mirror::scene_table(lua, name)?.is_some() {
        debug!("scene {name} restored from mirror");
        return Ok(false);
    }
    mirror::ensure_roots(lua)?;
    let path = scene_dir.join(format!("{name}.lua"));
    let source = fs::read_to_string(&path)
        .with_context(|| format!("reading scene script {}", path.display()))?;
    lua.load(&source)
        .set_name(format!("{name}.lua"))
        .exec()
        .with_context(|| format!("executing scene script {}", path.display()))?;
    if mirror::scene_table(lua, name)?.is_none() {
        bail!("{} did not define {SCENES_ROOT}.{name}", path.display());
    }
    Ok(true)
}

/// Objects a scene table describes, items sorted by id.
pub(super) fn read_scene(lua: &Lua, name: &str) -> LuaResult<SceneLayout> {
    let Some(scene) = mirror::scene_table(lua, name)? else {
        return Ok(SceneLayout::default());
    };
    let background = match mirror::child_table(&scene, "background")? {
        Some(table) => {
            let id = table
                .raw_get::<_, Option<String>>("id")?
                .unwrap_or_else(|| format!("{name}_background"));
            ObjectSpec::from_table(&id, &table)?
        }
        None => None,
    };
    let items = match mirror::child_table(&scene, "items")? {
        Some(items) => read_entries(&items)?,
        None => Vec::new(),
    };
    Ok(SceneLayout { background, items })
}

/// Reads every `id = { spine = ... }` entry of `table`, sorted by id.
pub(super) fn read_entries(table: &Table) -> LuaResult<Vec<ObjectSpec>> {
    let mut specs = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        let (Value::String(id), Value::Table(entry)) = (key, value) else {
            continue;
        };
        let id = id.to_str()?.to_string();
        match ObjectSpec::from_table(&id, &entry)? {
            Some(spec) => specs.push(spec),
            None => warn!("mirror entry {id} has no spine; skipped"),
        }
    }
    specs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(specs)
}
