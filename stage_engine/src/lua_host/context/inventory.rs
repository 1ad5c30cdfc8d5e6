use mlua::{Lua, Result as LuaResult, Value};

use super::mirror::{self, MirrorPath, MirrorValue, INVENTORY_ROOT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InventoryMove {
    Moved,
    AlreadyInInventory,
    Missing,
}

/// Moves `scenes.<scene>.items.<id>` to `inventory_items.<id>` with the
/// inventory skin applied. No script code runs between the copy and the
/// delete, so exactly one of the two roots holds the entry afterwards.
pub(super) fn move_to_inventory(
    lua: &Lua,
    scene: Option<&str>,
    id: &str,
    skin: &str,
) -> LuaResult<InventoryMove> {
    mirror::ensure_roots(lua)?;
    let inventory_fields = || {
        vec![
            ("skin", MirrorValue::Str(skin.to_string())),
            ("cross_scene", MirrorValue::Bool(true)),
            ("visible", MirrorValue::Bool(false)),
        ]
    };
    let inventory_path = MirrorPath::Inventory { id: id.to_string() };

    let items = match scene {
        Some(scene) => mirror::scene_items(lua, scene)?,
        None => None,
    };
    let entry = match &items {
        Some(items) => mirror::child_table(items, id)?,
        None => None,
    };
    let Some(entry) = entry else {
        if mirror::write_fields(lua, &inventory_path, inventory_fields())? {
            return Ok(InventoryMove::AlreadyInInventory);
        }
        return Ok(InventoryMove::Missing);
    };

    let copy = mirror::deep_copy(lua, &entry)?;
    let Some(inventory) = mirror::root_table(lua, INVENTORY_ROOT)? else {
        return Ok(InventoryMove::Missing);
    };
    inventory.raw_set(id, copy)?;
    mirror::write_fields(lua, &inventory_path, inventory_fields())?;
    if let Some(items) = items {
        items.raw_set(id, Value::Nil)?;
    }
    Ok(InventoryMove::Moved)
}

/// Drops the inventory entry. Returns false when there was none.
pub(super) fn leave_inventory(lua: &Lua, id: &str) -> LuaResult<bool> {
    mirror::remove_entry(lua, &MirrorPath::Inventory { id: id.to_string() })
}
