use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, info};
use serde::Serialize;

use crate::lua_host::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DialogTicket(pub u64);

impl fmt::Display for DialogTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dialog#{}", self.0)
    }
}

/// Presents dialogs and reports which of them have finished.
pub trait DialogPresenter {
    fn play(&mut self, dialog: &str, anchor: Option<Vec2>) -> DialogTicket;
    fn set_speech_bubble_position(&mut self, _position: Vec2) {}
    fn load_dialogs(&mut self, _path: &Path, _language: &str) -> Result<()> {
        Ok(())
    }
    fn poll_finished(&mut self) -> Vec<DialogTicket>;
}

impl fmt::Debug for dyn DialogPresenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DialogPresenter")
    }
}

/// Headless presenter: every dialog finishes on the next poll.
#[derive(Debug, Default)]
pub struct QueuedDialogPresenter {
    next_ticket: u64,
    playing: Vec<(DialogTicket, String)>,
    bubble: Option<Vec2>,
    loaded: Option<(PathBuf, String)>,
}

impl QueuedDialogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speech_bubble(&self) -> Option<Vec2> {
        self.bubble
    }

    pub fn loaded(&self) -> Option<(&Path, &str)> {
        self.loaded
            .as_ref()
            .map(|(path, language)| (path.as_path(), language.as_str()))
    }
}

impl DialogPresenter for QueuedDialogPresenter {
    fn play(&mut self, dialog: &str, anchor: Option<Vec2>) -> DialogTicket {
        self.next_ticket += 1;
        let ticket = DialogTicket(self.next_ticket);
        let anchor = anchor.or(self.bubble);
        info!("dialog {dialog} ({ticket}) at {anchor:?}");
        self.playing.push((ticket, dialog.to_string()));
        ticket
    }

    fn set_speech_bubble_position(&mut self, position: Vec2) {
        self.bubble = Some(position);
    }

    fn load_dialogs(&mut self, path: &Path, language: &str) -> Result<()> {
        debug!("dialogs {} [{language}]", path.display());
        self.loaded = Some((path.to_path_buf(), language.to_string()));
        Ok(())
    }

    fn poll_finished(&mut self) -> Vec<DialogTicket> {
        self.playing
            .drain(..)
            .map(|(ticket, dialog)| {
                debug!("dialog {dialog} ({ticket}) finished");
                ticket
            })
            .collect()
    }
}
