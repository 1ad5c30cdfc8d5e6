use std::ffi::c_void;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use mlua::{Lua, Result as LuaResult, Table, Value};
use stage_save::{encode_save, parse_save, PathKey, SaveError, SavePath, SaveValue, Statement};
use thiserror::Error;

use super::mirror;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("reading save file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing save file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Format(#[from] SaveError),
    #[error("line {line}: '{root}' is not a saved root")]
    ForeignRoot { line: usize, root: String },
    #[error("line {line}: parent of {path} was never assigned")]
    MissingParent { line: usize, path: String },
    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

impl PersistenceError {
    /// Save-file line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            PersistenceError::Format(err) => Some(err.line()),
            PersistenceError::ForeignRoot { line, .. }
            | PersistenceError::MissingParent { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Flattens the configured roots into statements. Tables are emitted before
/// their contents, sibling keys sorted. Values with no literal form and
/// references back to an enclosing table are skipped.
pub(super) fn encode_mirror(lua: &Lua, roots: &[String]) -> LuaResult<Vec<Statement>> {
    let globals = lua.globals();
    let mut statements = Vec::new();
    for root in roots {
        let path = SavePath::new(root.as_str());
        match globals.raw_get::<_, Value>(root.as_str())? {
            Value::Table(table) => {
                statements.push(Statement::new(path.clone(), SaveValue::Table));
                let mut ancestors = vec![table.to_pointer()];
                encode_table(&table, &path, &mut ancestors, &mut statements)?;
            }
            other => {
                if let Some(value) = literal(&other) {
                    statements.push(Statement::new(path, value));
                }
            }
        }
    }
    Ok(statements)
}

fn literal(value: &Value) -> Option<SaveValue> {
    match value {
        Value::Boolean(flag) => Some(SaveValue::Bool(*flag)),
        Value::Integer(number) => Some(SaveValue::Integer(*number as i64)),
        Value::Number(number) => Some(SaveValue::Number(*number)),
        Value::String(text) => Some(SaveValue::Str(text.as_bytes().to_vec())),
        _ => None,
    }
}

fn path_key(key: &Value) -> Option<PathKey> {
    match key {
        Value::Integer(index) => Some(PathKey::Index(*index as i64)),
        Value::Number(number) if number.is_finite() && number.fract() == 0.0 => {
            Some(PathKey::Index(*number as i64))
        }
        Value::String(text) => Some(PathKey::Str(text.as_bytes().to_vec())),
        _ => None,
    }
}

fn encode_table(
    table: &Table,
    path: &SavePath,
    ancestors: &mut Vec<*const c_void>,
    statements: &mut Vec<Statement>,
) -> LuaResult<()> {
    let mut entries = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        match path_key(&key) {
            Some(key) => entries.push((key, value)),
            None => debug!("skipping non-literal key under {path}"),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (key, value) in entries {
        let child = path.child(key);
        match value {
            Value::Table(nested) => {
                let pointer = nested.to_pointer();
                if ancestors.contains(&pointer) {
                    warn!("skipping cyclic reference at {child}");
                    continue;
                }
                statements.push(Statement::new(child.clone(), SaveValue::Table));
                ancestors.push(pointer);
                encode_table(&nested, &child, ancestors, statements)?;
                ancestors.pop();
            }
            other => match literal(&other) {
                Some(value) => statements.push(Statement::new(child, value)),
                None => debug!("skipping {} at {child}", other.type_name()),
            },
        }
    }
    Ok(())
}

fn key_value<'lua>(lua: &'lua Lua, key: &PathKey) -> LuaResult<Value<'lua>> {
    Ok(match key {
        PathKey::Index(index) => Value::Integer(*index as mlua::Integer),
        PathKey::Str(bytes) => Value::String(lua.create_string(bytes)?),
    })
}

fn save_value<'lua>(lua: &'lua Lua, value: &SaveValue) -> LuaResult<Value<'lua>> {
    Ok(match value {
        SaveValue::Table => Value::Table(lua.create_table()?),
        SaveValue::Bool(flag) => Value::Boolean(*flag),
        SaveValue::Integer(number) => Value::Integer(*number as mlua::Integer),
        SaveValue::Number(number) => Value::Number(*number),
        SaveValue::Str(bytes) => Value::String(lua.create_string(bytes)?),
    })
}

/// Replays statements into a fresh table keyed by root name. Nothing
/// outside the returned table is touched.
pub(super) fn stage_statements<'lua>(
    lua: &'lua Lua,
    statements: &[(usize, Statement)],
    roots: &[String],
) -> Result<Table<'lua>, PersistenceError> {
    let staging = lua.create_table()?;
    for (line, statement) in statements {
        let root = statement.path.root();
        if !roots.iter().any(|allowed| allowed == root) {
            return Err(PersistenceError::ForeignRoot {
                line: *line,
                root: root.to_string(),
            });
        }
        let missing_parent = || PersistenceError::MissingParent {
            line: *line,
            path: statement.path.to_string(),
        };
        let value = save_value(lua, &statement.value)?;
        let Some((last, parents)) = statement.path.keys().split_last() else {
            staging.raw_set(root, value)?;
            continue;
        };
        let mut parent = match staging.raw_get::<_, Value>(root)? {
            Value::Table(table) => table,
            _ => return Err(missing_parent()),
        };
        for key in parents {
            parent = match parent.raw_get::<_, Value>(key_value(lua, key)?)? {
                Value::Table(table) => table,
                _ => return Err(missing_parent()),
            };
        }
        parent.raw_set(key_value(lua, last)?, value)?;
    }
    Ok(staging)
}

/// Swaps every configured root for its staged value. Roots missing from the
/// save are cleared before the table roots are recreated.
pub(super) fn install_staging(lua: &Lua, staging: &Table, roots: &[String]) -> LuaResult<()> {
    let globals = lua.globals();
    for root in roots {
        let value: Value = staging.raw_get(root.as_str())?;
        globals.raw_set(root.as_str(), value)?;
    }
    mirror::ensure_roots(lua)
}

/// Current values of `roots`, shaped like a staging table so that
/// `install_staging` can put them back.
pub(super) fn snapshot_roots<'lua>(lua: &'lua Lua, roots: &[String]) -> LuaResult<Table<'lua>> {
    let globals = lua.globals();
    let snapshot = lua.create_table()?;
    for root in roots {
        let value: Value = globals.raw_get(root.as_str())?;
        snapshot.raw_set(root.as_str(), value)?;
    }
    Ok(snapshot)
}

/// Writes the mirror to `path` through a temporary file. Returns the number
/// of statements written.
pub(super) fn write_save(lua: &Lua, path: &Path, roots: &[String]) -> Result<usize, PersistenceError> {
    let statements = encode_mirror(lua, roots)?;
    let text = encode_save(&statements);
    let write_error = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let staging_path = path.with_extension("tmp");
    fs::write(&staging_path, text).map_err(write_error)?;
    fs::rename(&staging_path, path).map_err(write_error)?;
    Ok(statements.len())
}

/// Loads `path` into the mirror. The live mirror is only replaced once the
/// whole file has parsed and replayed cleanly.
pub(super) fn read_save(lua: &Lua, path: &Path, roots: &[String]) -> Result<usize, PersistenceError> {
    let text = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let statements = parse_save(&text)?;
    let staging = stage_statements(lua, &statements, roots)?;
    install_staging(lua, &staging, roots)?;
    Ok(statements.len())
}
