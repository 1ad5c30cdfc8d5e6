use std::{cell::RefCell, rc::Rc};

use serde::Serialize;

use crate::lua_host::AudioSink;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioEvent {
    Play { file: String },
}

#[derive(Clone, Default)]
pub struct RecordingAudioSink {
    events: Rc<RefCell<Vec<AudioEvent>>>,
}

impl RecordingAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AudioEvent> {
        self.events.borrow().clone()
    }
}

impl AudioSink for RecordingAudioSink {
    fn play(&self, file: &str) {
        self.events.borrow_mut().push(AudioEvent::Play {
            file: file.to_string(),
        });
    }
}
