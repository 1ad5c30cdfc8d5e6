pub mod audio_bridge;
pub mod config;
pub mod lua_host;
pub mod skeleton;

pub use config::EngineConfig;
pub use lua_host::{Collaborators, FrameReport, Session};
