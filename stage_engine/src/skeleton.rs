use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::lua_host::Vec2;

pub type TrackEntryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEventKind {
    /// The entry reached its end (once per loop for looping entries).
    Complete,
    /// The entry was replaced before it completed.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    pub entry: TrackEntryId,
    pub track: usize,
    pub animation: String,
    pub kind: TrackEventKind,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SkeletonError {
    #[error("unknown skeleton '{0}'")]
    UnknownSkeleton(String),
    #[error("skeleton '{skeleton}' has no animation '{animation}'")]
    UnknownAnimation { skeleton: String, animation: String },
    #[error("skeleton '{skeleton}' has no skin '{skin}'")]
    UnknownSkin { skeleton: String, skin: String },
}

/// Per-object view of the animation runtime.
pub trait Skeleton {
    fn play_animation(
        &mut self,
        track: usize,
        name: &str,
        looped: bool,
    ) -> Result<TrackEntryId, SkeletonError>;
    fn add_animation(
        &mut self,
        track: usize,
        name: &str,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryId, SkeletonError>;
    fn set_skin(&mut self, name: &str) -> Result<(), SkeletonError>;
    /// Offset of a named point relative to the object origin.
    fn point(&self, name: &str) -> Option<Vec2>;
    fn point_names(&self) -> Vec<String>;
    fn set_scale_x(&mut self, scale: f32);
    fn step(&mut self, dt: f32) -> Vec<TrackEvent>;
}

impl fmt::Debug for dyn Skeleton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Skeleton")
    }
}

pub trait SkeletonLoader {
    fn load(&self, spine_file: &str, scale: f32) -> Result<Box<dyn Skeleton>, SkeletonError>;
}

impl fmt::Debug for dyn SkeletonLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SkeletonLoader")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkeletonManifest {
    /// Animation name to duration in seconds.
    #[serde(default)]
    pub animations: BTreeMap<String, f32>,
    /// Accepted skins; empty accepts any skin.
    #[serde(default)]
    pub skins: Vec<String>,
    #[serde(default)]
    pub points: BTreeMap<String, Vec2>,
}

#[derive(Debug, Default, Clone)]
pub struct SkeletonLibrary {
    manifests: BTreeMap<String, Rc<SkeletonManifest>>,
}

impl SkeletonLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading skeleton manifest {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("parsing skeleton manifest {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let manifests: BTreeMap<String, SkeletonManifest> = serde_json::from_str(text)?;
        Ok(Self {
            manifests: manifests
                .into_iter()
                .map(|(name, manifest)| (name, Rc::new(manifest)))
                .collect(),
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, manifest: SkeletonManifest) {
        self.manifests.insert(name.into(), Rc::new(manifest));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.manifests.keys().map(String::as_str)
    }
}

impl SkeletonLoader for SkeletonLibrary {
    fn load(&self, spine_file: &str, scale: f32) -> Result<Box<dyn Skeleton>, SkeletonError> {
        let manifest = self
            .manifests
            .get(spine_file)
            .ok_or_else(|| SkeletonError::UnknownSkeleton(spine_file.to_string()))?;
        Ok(Box::new(TimelineSkeleton::new(
            spine_file,
            manifest.clone(),
            scale,
        )))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: TrackEntryId,
    animation: String,
    duration: f32,
    looped: bool,
    /// Negative while a queued delay is still running.
    elapsed: f32,
}

#[derive(Debug, Default)]
struct Track {
    current: Option<Entry>,
    queue: VecDeque<Entry>,
}

/// Skeleton driven purely by manifest durations.
#[derive(Debug)]
pub struct TimelineSkeleton {
    name: String,
    manifest: Rc<SkeletonManifest>,
    scale: f32,
    scale_x: f32,
    skin: Option<String>,
    next_entry: TrackEntryId,
    tracks: BTreeMap<usize, Track>,
    pending: Vec<TrackEvent>,
}

impl TimelineSkeleton {
    pub fn new(name: &str, manifest: Rc<SkeletonManifest>, scale: f32) -> Self {
        Self {
            name: name.to_string(),
            manifest,
            scale,
            scale_x: 1.0,
            skin: None,
            next_entry: 1,
            tracks: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn skin(&self) -> Option<&str> {
        self.skin.as_deref()
    }

    pub fn current_animation(&self, track: usize) -> Option<&str> {
        self.tracks
            .get(&track)
            .and_then(|track| track.current.as_ref())
            .map(|entry| entry.animation.as_str())
    }

    fn entry(&mut self, name: &str, looped: bool, delay: f32) -> Result<Entry, SkeletonError> {
        let duration = *self.manifest.animations.get(name).ok_or_else(|| {
            SkeletonError::UnknownAnimation {
                skeleton: self.name.clone(),
                animation: name.to_string(),
            }
        })?;
        let id = self.next_entry;
        self.next_entry += 1;
        Ok(Entry {
            id,
            animation: name.to_string(),
            duration: duration.max(0.0),
            looped,
            elapsed: -delay.max(0.0),
        })
    }
}

fn track_event(track: usize, entry: &Entry, kind: TrackEventKind) -> TrackEvent {
    TrackEvent {
        entry: entry.id,
        track,
        animation: entry.animation.clone(),
        kind,
    }
}

impl Skeleton for TimelineSkeleton {
    fn play_animation(
        &mut self,
        track: usize,
        name: &str,
        looped: bool,
    ) -> Result<TrackEntryId, SkeletonError> {
        let entry = self.entry(name, looped, 0.0)?;
        let id = entry.id;
        let slot = self.tracks.entry(track).or_default();
        if let Some(previous) = slot.current.take() {
            self.pending
                .push(track_event(track, &previous, TrackEventKind::Discarded));
        }
        for queued in slot.queue.drain(..) {
            self.pending
                .push(track_event(track, &queued, TrackEventKind::Discarded));
        }
        slot.current = Some(entry);
        Ok(id)
    }

    fn add_animation(
        &mut self,
        track: usize,
        name: &str,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryId, SkeletonError> {
        let entry = self.entry(name, looped, delay)?;
        let id = entry.id;
        let slot = self.tracks.entry(track).or_default();
        if slot.current.is_none() {
            slot.current = Some(entry);
        } else {
            slot.queue.push_back(entry);
        }
        Ok(id)
    }

    fn set_skin(&mut self, name: &str) -> Result<(), SkeletonError> {
        if !self.manifest.skins.is_empty() && !self.manifest.skins.iter().any(|s| s == name) {
            return Err(SkeletonError::UnknownSkin {
                skeleton: self.name.clone(),
                skin: name.to_string(),
            });
        }
        self.skin = Some(name.to_string());
        Ok(())
    }

    fn point(&self, name: &str) -> Option<Vec2> {
        self.manifest
            .points
            .get(name)
            .map(|point| Vec2::new(point.x * self.scale * self.scale_x, point.y * self.scale))
    }

    fn point_names(&self) -> Vec<String> {
        self.manifest.points.keys().cloned().collect()
    }

    fn set_scale_x(&mut self, scale: f32) {
        self.scale_x = scale;
    }

    fn step(&mut self, dt: f32) -> Vec<TrackEvent> {
        let mut events = std::mem::take(&mut self.pending);
        for (&index, track) in self.tracks.iter_mut() {
            let finished = match track.current.as_mut() {
                None => continue,
                Some(entry) => {
                    entry.elapsed += dt;
                    if entry.elapsed < entry.duration {
                        continue;
                    }
                    events.push(track_event(index, entry, TrackEventKind::Complete));
                    if entry.looped && track.queue.is_empty() {
                        // zero-length loops complete once per step
                        entry.elapsed = if entry.duration > 0.0 {
                            entry.elapsed % entry.duration
                        } else {
                            0.0
                        };
                        false
                    } else {
                        true
                    }
                }
            };
            if finished {
                track.current = track.queue.pop_front();
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn door() -> TimelineSkeleton {
        let mut manifest = SkeletonManifest::default();
        manifest.animations.insert("idle".into(), 1.0);
        manifest.animations.insert("open".into(), 0.5);
        manifest.points.insert("entry".into(), Vec2::new(-20.0, 40.0));
        TimelineSkeleton::new("door", Rc::new(manifest), 2.0)
    }

    fn completions(events: &[TrackEvent]) -> Vec<&str> {
        events
            .iter()
            .filter(|event| event.kind == TrackEventKind::Complete)
            .map(|event| event.animation.as_str())
            .collect()
    }

    #[test]
    fn one_shot_entry_completes_once() {
        let mut skeleton = door();
        let entry = skeleton.play_animation(0, "open", false).unwrap();
        assert!(skeleton.step(0.25).is_empty());
        let events = skeleton.step(0.25);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entry, entry);
        assert_eq!(events[0].kind, TrackEventKind::Complete);
        assert!(skeleton.step(1.0).is_empty());
        assert_eq!(skeleton.current_animation(0), None);
    }

    #[test]
    fn queued_entry_waits_for_current_loop() {
        let mut skeleton = door();
        skeleton.play_animation(0, "idle", true).unwrap();
        let open = skeleton.add_animation(0, "open", false, 0.0).unwrap();
        assert_eq!(completions(&skeleton.step(1.0)), vec!["idle"]);
        assert_eq!(skeleton.current_animation(0), Some("open"));
        let events = skeleton.step(0.5);
        assert_eq!(events[0].entry, open);
        assert_eq!(completions(&events), vec!["open"]);
    }

    #[test]
    fn play_discards_current_and_queued_entries() {
        let mut skeleton = door();
        let idle = skeleton.play_animation(0, "idle", true).unwrap();
        let queued = skeleton.add_animation(0, "open", false, 0.0).unwrap();
        skeleton.play_animation(0, "open", false).unwrap();
        let events = skeleton.step(0.0);
        let discarded: Vec<_> = events
            .iter()
            .filter(|event| event.kind == TrackEventKind::Discarded)
            .map(|event| event.entry)
            .collect();
        assert_eq!(discarded, vec![idle, queued]);
    }

    #[test]
    fn add_on_idle_track_honours_delay() {
        let mut skeleton = door();
        skeleton.add_animation(1, "open", false, 0.5).unwrap();
        assert!(skeleton.step(0.75).is_empty());
        assert_eq!(completions(&skeleton.step(0.25)), vec!["open"]);
    }

    #[test]
    fn looping_entry_reports_every_loop() {
        let mut skeleton = door();
        skeleton.play_animation(0, "idle", true).unwrap();
        assert_eq!(completions(&skeleton.step(1.0)).len(), 1);
        assert_eq!(completions(&skeleton.step(1.0)).len(), 1);
        assert_eq!(skeleton.current_animation(0), Some("idle"));
    }

    #[test]
    fn rejects_unknown_animation_and_skin() {
        let mut skeleton = door();
        assert!(matches!(
            skeleton.play_animation(0, "fly", false),
            Err(SkeletonError::UnknownAnimation { .. })
        ));
        assert!(skeleton.set_skin("anything").is_ok());

        let mut manifest = SkeletonManifest::default();
        manifest.skins = vec!["default".into(), "inventory".into()];
        let mut key = TimelineSkeleton::new("key", Rc::new(manifest), 1.0);
        assert!(key.set_skin("inventory").is_ok());
        assert_eq!(
            key.set_skin("gold"),
            Err(SkeletonError::UnknownSkin {
                skeleton: "key".into(),
                skin: "gold".into()
            })
        );
    }

    #[test]
    fn points_follow_scale_and_flip() {
        let mut skeleton = door();
        assert_eq!(skeleton.point("entry"), Some(Vec2::new(-40.0, 80.0)));
        skeleton.set_scale_x(-1.0);
        assert_eq!(skeleton.point("entry"), Some(Vec2::new(40.0, 80.0)));
        assert_eq!(skeleton.point("missing"), None);
        assert_eq!(skeleton.point_names(), vec!["entry".to_string()]);
    }

    #[test]
    fn library_loads_manifest_json() {
        let library = SkeletonLibrary::from_json_str(
            r#"{ "key": { "animations": { "idle": 1.0 }, "points": { "base": { "x": 0, "y": 10 } } } }"#,
        )
        .unwrap();
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["key"]);
        let skeleton = library.load("key", 1.0).unwrap();
        assert_eq!(skeleton.point("base"), Some(Vec2::new(0.0, 10.0)));
        assert!(matches!(
            library.load("ghost", 1.0),
            Err(SkeletonError::UnknownSkeleton(_))
        ));
    }
}
