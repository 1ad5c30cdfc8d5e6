use std::fmt;
use std::rc::Rc;

/// Minimal adapter for routing audio playback to interested observers.
pub trait AudioSink {
    fn play(&self, _file: &str) {}
}

impl fmt::Debug for dyn AudioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AudioSink")
    }
}

const AUDIO_DIR: &str = "audio";

#[derive(Debug, Default)]
pub(super) struct AudioRuntime {
    sink: Option<Rc<dyn AudioSink>>,
    history: Vec<String>,
}

impl AudioRuntime {
    pub(super) fn new(sink: Option<Rc<dyn AudioSink>>) -> Self {
        Self {
            sink,
            history: Vec::new(),
        }
    }

    /// Plays `file` from the audio directory and returns the routed path.
    pub(super) fn play(&mut self, file: &str) -> String {
        let routed = format!("{AUDIO_DIR}/{file}");
        if let Some(sink) = &self.sink {
            sink.play(&routed);
        }
        self.history.push(routed.clone());
        routed
    }

    pub(super) fn history(&self) -> &[String] {
        &self.history
    }
}
