//! Raw access to the script-visible mirror tables.
//!
//! Everything here uses raw table access so that a script-installed
//! metatable can never run host code in the middle of a write.

use std::ffi::c_void;

use mlua::{Lua, Result as LuaResult, Table, Value};
use stage_save::{PathKey, SavePath};

pub(super) const GAME_ROOT: &str = "game";
pub(super) const SCENES_ROOT: &str = "scenes";
pub(super) const INVENTORY_ROOT: &str = "inventory_items";
pub(super) const PLAYER_ROOT: &str = "player";
pub(super) const PLAYER_ID: &str = "player";
pub(super) const INACTIVE_LAYER_GLOBAL: &str = "inactivLayerBorder";

const TABLE_ROOTS: [&str; 4] = [GAME_ROOT, PLAYER_ROOT, INVENTORY_ROOT, SCENES_ROOT];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum MirrorPath {
    SceneItem { scene: String, id: String },
    Inventory { id: String },
    Player,
}

impl MirrorPath {
    pub(super) fn to_save_path(&self) -> SavePath {
        match self {
            MirrorPath::SceneItem { scene, id } => SavePath::new(SCENES_ROOT)
                .child(PathKey::name(scene))
                .child(PathKey::name("items"))
                .child(PathKey::name(id)),
            MirrorPath::Inventory { id } => SavePath::new(INVENTORY_ROOT).child(PathKey::name(id)),
            MirrorPath::Player => SavePath::new(PLAYER_ROOT),
        }
    }

    pub(super) fn dotted(&self) -> String {
        self.to_save_path().to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum MirrorValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Str(String),
}

impl MirrorValue {
    fn into_lua(self, lua: &Lua) -> LuaResult<Value<'_>> {
        Ok(match self {
            MirrorValue::Bool(flag) => Value::Boolean(flag),
            MirrorValue::Integer(value) => Value::Integer(value as mlua::Integer),
            MirrorValue::Number(value) => Value::Number(value),
            MirrorValue::Str(text) => Value::String(lua.create_string(&text)?),
        })
    }
}

pub(super) fn child_table<'lua>(table: &Table<'lua>, key: &str) -> LuaResult<Option<Table<'lua>>> {
    match table.raw_get::<_, Value>(key)? {
        Value::Table(child) => Ok(Some(child)),
        _ => Ok(None),
    }
}

pub(super) fn root_table<'lua>(lua: &'lua Lua, name: &str) -> LuaResult<Option<Table<'lua>>> {
    child_table(&lua.globals(), name)
}

/// Creates any missing table root.
pub(super) fn ensure_roots(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for root in TABLE_ROOTS {
        if child_table(&globals, root)?.is_none() {
            globals.raw_set(root, lua.create_table()?)?;
        }
    }
    Ok(())
}

pub(super) fn current_scene(lua: &Lua) -> LuaResult<Option<String>> {
    let Some(game) = root_table(lua, GAME_ROOT)? else {
        return Ok(None);
    };
    match game.raw_get::<_, Value>("scene")? {
        Value::String(name) => Ok(Some(name.to_str()?.to_string())),
        _ => Ok(None),
    }
}

pub(super) fn set_current_scene(lua: &Lua, scene: &str) -> LuaResult<()> {
    write_global(lua, GAME_ROOT, "scene", MirrorValue::Str(scene.to_string()))
}

pub(super) fn scene_table<'lua>(lua: &'lua Lua, scene: &str) -> LuaResult<Option<Table<'lua>>> {
    match root_table(lua, SCENES_ROOT)? {
        Some(scenes) => child_table(&scenes, scene),
        None => Ok(None),
    }
}

pub(super) fn scene_items<'lua>(lua: &'lua Lua, scene: &str) -> LuaResult<Option<Table<'lua>>> {
    match scene_table(lua, scene)? {
        Some(table) => child_table(&table, "items"),
        None => Ok(None),
    }
}

/// Resolves the mirror entry for `id`: current scene items first, then the
/// inventory, then the player root.
pub(super) fn resolve(lua: &Lua, id: &str) -> LuaResult<Option<MirrorPath>> {
    if let Some(scene) = current_scene(lua)? {
        if let Some(items) = scene_items(lua, &scene)? {
            if child_table(&items, id)?.is_some() {
                return Ok(Some(MirrorPath::SceneItem {
                    scene,
                    id: id.to_string(),
                }));
            }
        }
    }
    if let Some(inventory) = root_table(lua, INVENTORY_ROOT)? {
        if child_table(&inventory, id)?.is_some() {
            return Ok(Some(MirrorPath::Inventory { id: id.to_string() }));
        }
    }
    if id == PLAYER_ID && root_table(lua, PLAYER_ROOT)?.is_some() {
        return Ok(Some(MirrorPath::Player));
    }
    Ok(None)
}

pub(super) fn entry_table<'lua>(lua: &'lua Lua, path: &MirrorPath) -> LuaResult<Option<Table<'lua>>> {
    match path {
        MirrorPath::SceneItem { scene, id } => match scene_items(lua, scene)? {
            Some(items) => child_table(&items, id),
            None => Ok(None),
        },
        MirrorPath::Inventory { id } => match root_table(lua, INVENTORY_ROOT)? {
            Some(inventory) => child_table(&inventory, id),
            None => Ok(None),
        },
        MirrorPath::Player => root_table(lua, PLAYER_ROOT),
    }
}

/// Writes every field into the entry at `path`. Returns false, writing
/// nothing, when the entry does not exist.
pub(super) fn write_fields(
    lua: &Lua,
    path: &MirrorPath,
    fields: Vec<(&str, MirrorValue)>,
) -> LuaResult<bool> {
    let Some(entry) = entry_table(lua, path)? else {
        return Ok(false);
    };
    for (key, value) in fields {
        entry.raw_set(key, value.into_lua(lua)?)?;
    }
    Ok(true)
}

/// Sets `root.key`, creating the root table when needed.
pub(super) fn write_global(lua: &Lua, root: &str, key: &str, value: MirrorValue) -> LuaResult<()> {
    let table = match root_table(lua, root)? {
        Some(table) => table,
        None => {
            let table = lua.create_table()?;
            lua.globals().raw_set(root, table.clone())?;
            table
        }
    };
    table.raw_set(key, value.into_lua(lua)?)
}

pub(super) fn set_global(lua: &Lua, name: &str, value: MirrorValue) -> LuaResult<()> {
    lua.globals().raw_set(name, value.into_lua(lua)?)
}

/// Deletes the entry at `path`. The player root is never removed.
pub(super) fn remove_entry(lua: &Lua, path: &MirrorPath) -> LuaResult<bool> {
    let (parent, id) = match path {
        MirrorPath::SceneItem { scene, id } => (scene_items(lua, scene)?, id),
        MirrorPath::Inventory { id } => (root_table(lua, INVENTORY_ROOT)?, id),
        MirrorPath::Player => return Ok(false),
    };
    let Some(parent) = parent else {
        return Ok(false);
    };
    if child_table(&parent, id)?.is_none() {
        return Ok(false);
    }
    parent.raw_set(id.as_str(), Value::Nil)?;
    Ok(true)
}

/// Copies a table tree. Shared subtables stay shared and cycles are preserved.
pub(super) fn deep_copy<'lua>(lua: &'lua Lua, source: &Table<'lua>) -> LuaResult<Table<'lua>> {
    let mut seen = Vec::new();
    copy_table(lua, source, &mut seen)
}

fn copy_table<'lua>(
    lua: &'lua Lua,
    source: &Table<'lua>,
    seen: &mut Vec<(*const c_void, Table<'lua>)>,
) -> LuaResult<Table<'lua>> {
    let pointer = source.to_pointer();
    if let Some((_, copy)) = seen.iter().find(|(seen_pointer, _)| *seen_pointer == pointer) {
        return Ok(copy.clone());
    }
    let copy = lua.create_table()?;
    seen.push((pointer, copy.clone()));
    for pair in source.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        let value = match value {
            Value::Table(child) => Value::Table(copy_table(lua, &child, seen)?),
            other => other,
        };
        copy.raw_set(key, value)?;
    }
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror() -> Lua {
        let lua = Lua::new();
        lua.load(
            r#"
            game = { scene = "cabin" }
            player = { x = 1 }
            inventory_items = { lamp = { skin = "inventory" } }
            scenes = { cabin = { items = { key1 = { x = 4 }, lamp = { x = 9 } } } }
            "#,
        )
        .exec()
        .unwrap();
        lua
    }

    #[test]
    fn resolution_prefers_scene_items() {
        let lua = mirror();
        assert_eq!(
            resolve(&lua, "lamp").unwrap(),
            Some(MirrorPath::SceneItem {
                scene: "cabin".into(),
                id: "lamp".into()
            })
        );
        set_current_scene(&lua, "forest").unwrap();
        assert_eq!(
            resolve(&lua, "lamp").unwrap(),
            Some(MirrorPath::Inventory { id: "lamp".into() })
        );
        assert_eq!(resolve(&lua, "player").unwrap(), Some(MirrorPath::Player));
        assert_eq!(resolve(&lua, "ghost").unwrap(), None);
    }

    #[test]
    fn dotted_paths_match_save_paths() {
        let path = MirrorPath::SceneItem {
            scene: "cabin".into(),
            id: "key1".into(),
        };
        assert_eq!(path.dotted(), "scenes.cabin.items.key1");
        assert_eq!(
            MirrorPath::Inventory { id: "odd id".into() }.dotted(),
            r#"inventory_items["odd id"]"#
        );
    }

    #[test]
    fn writes_skip_missing_entries() {
        let lua = mirror();
        let key = MirrorPath::SceneItem {
            scene: "cabin".into(),
            id: "key1".into(),
        };
        assert!(write_fields(&lua, &key, vec![("visible", MirrorValue::Bool(false))]).unwrap());
        let visible: bool = lua.load("return scenes.cabin.items.key1.visible").eval().unwrap();
        assert!(!visible);

        let ghost = MirrorPath::Inventory { id: "ghost".into() };
        assert!(!write_fields(&lua, &ghost, vec![("x", MirrorValue::Integer(3))]).unwrap());
        let ghost_exists: bool = lua.load("return inventory_items.ghost ~= nil").eval().unwrap();
        assert!(!ghost_exists);
    }

    #[test]
    fn deep_copy_detaches_nested_tables() {
        let lua = mirror();
        lua.load("scenes.cabin.items.key1.tags = { 'shiny' }; scenes.cabin.items.key1.me = scenes.cabin.items.key1")
            .exec()
            .unwrap();
        let items = scene_items(&lua, "cabin").unwrap().unwrap();
        let key = child_table(&items, "key1").unwrap().unwrap();
        let copy = deep_copy(&lua, &key).unwrap();
        lua.globals().set("copy", copy).unwrap();
        let (detached, cyclic): (bool, bool) = lua
            .load("scenes.cabin.items.key1.tags[1] = 'dull'; return copy.tags[1] == 'shiny', copy.me == copy")
            .eval()
            .unwrap();
        assert!(detached);
        assert!(cyclic);
    }

    #[test]
    fn ensure_roots_keeps_existing_tables() {
        let lua = mirror();
        lua.load("inventory_items = nil").exec().unwrap();
        ensure_roots(&lua).unwrap();
        let (x, empty): (i64, bool) = lua
            .load("return player.x, next(inventory_items) == nil")
            .eval()
            .unwrap();
        assert_eq!(x, 1);
        assert!(empty);
    }
}
