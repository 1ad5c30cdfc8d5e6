use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::{debug, warn};
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, Result as LuaResult, Table, Variadic};

use super::{EngineContext, Mutation, ObjectKey};
use crate::lua_host::error::BridgeError;

pub(crate) fn install_package_path(lua: &Lua, scripts_root: &Path) -> Result<()> {
    let globals = lua.globals();
    let package: Table = globals
        .get("package")
        .context("package table missing from Lua state")?;
    let current_path: String = package.get("path")?;
    let new_path = format!("{}/?.lua;{current_path}", scripts_root.display());
    package.set("path", new_path)?;
    Ok(())
}

pub(crate) fn load_script(lua: &Lua, path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("script");
    lua.load(&source)
        .set_name(name)
        .exec()
        .with_context(|| format!("executing script {}", path.display()))?;
    debug!("loaded {}", path.display());
    Ok(())
}

pub(crate) fn install_globals(lua: &Lua, context: Rc<RefCell<EngineContext>>) -> Result<()> {
    install_object_operations(lua, &context).context("installing object operations")?;
    install_pointer_operations(lua, &context).context("installing pointer operations")?;
    install_world_operations(lua, &context).context("installing world operations")?;
    install_persistence_operations(lua, &context).context("installing persistence operations")?;
    Ok(())
}

/// Installs `name` acting on the current object and `nameOn` acting on the
/// object named by its first argument. An unresolved `nameOn` target makes
/// the call a no-op returning the default value.
fn install_pair<'lua, A, R, F>(
    lua: &'lua Lua,
    context: &Rc<RefCell<EngineContext>>,
    name: &'static str,
    operation: F,
) -> LuaResult<()>
where
    A: FromLuaMulti<'lua>,
    R: IntoLuaMulti<'lua> + Default,
    F: Fn(&mut EngineContext, &'lua Lua, ObjectKey, A) -> LuaResult<R> + Clone + 'static,
{
    let globals = lua.globals();

    let implicit_context = context.clone();
    let implicit = operation.clone();
    globals.set(
        name,
        lua.create_function(move |lua, args: A| {
            let mut ctx = implicit_context.borrow_mut();
            let key = ctx.subject(name)?;
            implicit(&mut *ctx, lua, key, args)
        })?,
    )?;

    let targeted_context = context.clone();
    globals.set(
        format!("{name}On"),
        lua.create_function(move |lua, (id, args): (String, A)| {
            let mut ctx = targeted_context.borrow_mut();
            match ctx.target(name, &id) {
                Some(key) => operation(&mut *ctx, lua, key, args),
                None => Ok(R::default()),
            }
        })?,
    )?;
    Ok(())
}

fn install_global<'lua, A, R, F>(
    lua: &'lua Lua,
    context: &Rc<RefCell<EngineContext>>,
    name: &str,
    operation: F,
) -> LuaResult<()>
where
    A: FromLuaMulti<'lua>,
    R: IntoLuaMulti<'lua>,
    F: Fn(&mut EngineContext, &'lua Lua, A) -> LuaResult<R> + 'static,
{
    let context = context.clone();
    lua.globals().set(
        name,
        lua.create_function(move |lua, args: A| operation(&mut *context.borrow_mut(), lua, args))?,
    )
}

fn install_object_operations<'lua>(lua: &'lua Lua, context: &Rc<RefCell<EngineContext>>) -> LuaResult<()> {
    install_pair(
        lua,
        context,
        "PlayAnimation",
        |ctx, lua, key, (track, name, looped, callback): (usize, String, Option<bool>, Option<Function<'lua>>)| {
            let mutation = Mutation::PlayAnimation {
                track,
                name,
                looped: looped.unwrap_or(false),
            };
            ctx.animate(lua, key, mutation, callback)
        },
    )?;
    install_pair(
        lua,
        context,
        "AddAnimation",
        |ctx,
         lua,
         key,
         (track, name, looped, delay, callback): (
            usize,
            String,
            Option<bool>,
            Option<f32>,
            Option<Function<'lua>>,
        )| {
            let mutation = Mutation::AddAnimation {
                track,
                name,
                looped: looped.unwrap_or(false),
                delay: delay.unwrap_or(0.0),
            };
            ctx.animate(lua, key, mutation, callback)
        },
    )?;
    install_pair(lua, context, "SetSkin", |ctx, lua, key, skin: String| {
        ctx.set_skin(lua, key, skin)
    })?;
    install_pair(lua, context, "AddToInventory", |ctx, lua, key, (): ()| {
        ctx.add_to_inventory(lua, key, None)
    })?;
    install_pair(
        lua,
        context,
        "AddToInventoryWithSkin",
        |ctx, lua, key, skin: String| ctx.add_to_inventory(lua, key, Some(skin)),
    )?;
    install_pair(lua, context, "RemoveFromInventory", |ctx, lua, key, (): ()| {
        warn!("RemoveFromInventory is deprecated; use SetDeleted");
        ctx.remove_from_inventory(lua, key)
    })?;
    install_pair(lua, context, "SetDeleted", |ctx, lua, key, (): ()| ctx.delete(lua, key))?;
    install_pair(
        lua,
        context,
        "GoToPoint",
        |ctx, lua, key, (point, callback): (String, Option<Function<'lua>>)| {
            ctx.go_to_point(lua, key, &point, callback)
        },
    )?;
    install_pair(
        lua,
        context,
        "SetPositionToPoint",
        |ctx, lua, key, point: String| ctx.set_position_to_point(lua, key, &point),
    )?;
    install_pair(lua, context, "SetHidden", |ctx, lua, key, (): ()| {
        ctx.set_visible(lua, key, false)
    })?;
    install_pair(lua, context, "SetVisible", |ctx, lua, key, (): ()| {
        ctx.set_visible(lua, key, true)
    })?;
    install_pair(lua, context, "SetLayer", |ctx, lua, key, layer: i64| {
        ctx.set_layer(lua, key, layer)
    })?;
    install_pair(lua, context, "SetRotation", |ctx, lua, key, degrees: f32| {
        ctx.set_rotation(lua, key, degrees)
    })?;
    install_pair(
        lua,
        context,
        "SetSpeechBubbleToPoint",
        |ctx, lua, key, point: String| ctx.set_speech_bubble_to_point(lua, key, &point),
    )?;

    // GetPointNamesOn fails on a missing target
    let names_context = context.clone();
    lua.globals().set(
        "GetPointNames",
        lua.create_function(move |_, ()| {
            let ctx = names_context.borrow();
            let key = ctx.subject("GetPointNames")?;
            Ok(ctx.point_names(key))
        })?,
    )?;
    let names_on_context = context.clone();
    lua.globals().set(
        "GetPointNamesOn",
        lua.create_function(move |_, id: String| {
            let ctx = names_on_context.borrow();
            let key = ctx
                .find(&id)
                .ok_or_else(|| BridgeError::ObjectNotFound(id.clone()))?;
            Ok(ctx.point_names(key))
        })?,
    )?;
    Ok(())
}

fn install_pointer_operations(lua: &Lua, context: &Rc<RefCell<EngineContext>>) -> LuaResult<()> {
    install_pair(lua, context, "AttatchToPointer", |ctx, _, key, (): ()| {
        ctx.attach_to_pointer(key);
        Ok(())
    })?;
    install_pair(lua, context, "DeattatchFromPointer", |ctx, _, key, (): ()| {
        ctx.detach_from_pointer(key);
        Ok(())
    })?;
    install_pair(lua, context, "IsAttatchedToPointer", |ctx, _, key, (): ()| {
        Ok(ctx.is_attached_to_pointer(key))
    })?;
    install_global(lua, context, "DeattatchAllFromPointer", |ctx, lua, (): ()| {
        ctx.detach_all_from_pointer(lua)
    })?;
    install_global(lua, context, "IsSomethingAttatchedToPointer", |ctx, _, (): ()| {
        Ok(ctx.something_attached())
    })?;
    Ok(())
}

fn install_world_operations<'lua>(lua: &'lua Lua, context: &Rc<RefCell<EngineContext>>) -> LuaResult<()> {
    lua.globals()
        .set("pass", lua.create_function(|_, _: Variadic<mlua::Value>| Ok(()))?)?;
    install_global(lua, context, "LoadScene", |ctx, _, scene: String| {
        ctx.request_scene(scene);
        Ok(())
    })?;
    install_global(lua, context, "InterruptibleOff", |ctx, _, (): ()| {
        ctx.set_interruptible(false);
        Ok(())
    })?;
    install_global(lua, context, "InterruptibleOn", |ctx, _, (): ()| {
        ctx.set_interruptible(true);
        Ok(())
    })?;
    install_global(
        lua,
        context,
        "PlayDialog",
        |ctx, lua, (dialog, callback): (String, Option<Function<'lua>>)| ctx.play_dialog(lua, &dialog, callback),
    )?;
    install_global(lua, context, "StopWalking", |ctx, _, (): ()| {
        ctx.stop_walking();
        Ok(())
    })?;
    install_global(lua, context, "GetPointPosition", |ctx, _, point: String| {
        let position = ctx.point_position(ctx.current_subject(), &point);
        Ok((position.map(|p| p.x), position.map(|p| p.y)))
    })?;
    install_global(
        lua,
        context,
        "SetOnToPointFrom",
        |ctx, lua, (object, from, point): (String, String, String)| {
            ctx.set_on_to_point_from(lua, &object, &from, &point)
        },
    )?;
    install_global(lua, context, "SetInactivLayerBorder", |ctx, lua, layer: i64| {
        ctx.set_inactive_layer_border(lua, layer)
    })?;
    install_global(lua, context, "GetTime", |ctx, _, (): ()| Ok(ctx.elapsed()))?;
    install_global(lua, context, "SetPlayerMaxSpeed", |ctx, lua, speed: f32| {
        ctx.set_player_max_speed(lua, speed)
    })?;
    install_global(lua, context, "SetPlayerScaleX", |ctx, lua, scale: f32| {
        ctx.set_player_scale_x(lua, scale)
    })?;
    install_global(
        lua,
        context,
        "CreateObject",
        |ctx, lua, (spine, id, scale): (String, String, Option<f32>)| {
            ctx.create_object(lua, spine, id, scale.unwrap_or(1.0))
        },
    )?;
    install_global(lua, context, "PlayAudio", |ctx, _, file: String| {
        ctx.play_audio(&file);
        Ok(())
    })?;
    install_global(lua, context, "GetID", |ctx, _, (): ()| {
        Ok(ctx.subject_id("GetID")?)
    })?;
    install_global(lua, context, "SetLanguage", |ctx, lua, language: String| {
        ctx.set_language(lua, language)
    })?;
    install_global(lua, context, "GetLUAPath", |ctx, lua, id: String| {
        ctx.lua_path(lua, &id)
    })?;
    Ok(())
}

fn install_persistence_operations(lua: &Lua, context: &Rc<RefCell<EngineContext>>) -> LuaResult<()> {
    install_global(lua, context, "SaveGame", |ctx, _, name: String| {
        Ok(ctx.request_save(name)?)
    })?;
    install_global(lua, context, "LoadGame", |ctx, _, name: String| {
        Ok(ctx.request_load(name)?)
    })?;
    Ok(())
}
