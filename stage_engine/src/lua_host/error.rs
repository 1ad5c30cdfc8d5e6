use mlua::Error as LuaError;
use thiserror::Error;

use crate::skeleton::SkeletonError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}: no current object")]
    NoCurrentObject(&'static str),
    #[error("{0}: current object was removed")]
    StaleSubject(&'static str),
    #[error("no object '{0}'")]
    ObjectNotFound(String),
    #[error("no mirror path for '{0}'")]
    PathNotFound(String),
    #[error("object id '{0}' is already in use")]
    DuplicateId(String),
    #[error("save name '{0}' may only contain letters, digits, '_' and '-'")]
    InvalidSaveName(String),
    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),
    #[error(transparent)]
    Skeleton(#[from] SkeletonError),
    #[error(transparent)]
    Lua(#[from] LuaError),
}

impl From<BridgeError> for LuaError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Lua(inner) => inner,
            other => LuaError::external(other),
        }
    }
}
