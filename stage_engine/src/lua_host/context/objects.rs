use std::fmt;

use serde::Serialize;

use crate::lua_host::types::Vec2;
use crate::skeleton::{Skeleton, SkeletonError, TrackEntryId};

use super::lifecycle::{LifecycleState, Removal};

/// Stable handle into the object arena. A key whose slot has been reused
/// no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    index: u32,
    generation: u32,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Player,
    Background,
    Item,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ParentRef {
    Pointer,
}

#[derive(Debug)]
pub(super) struct WorldObject {
    pub(super) id: String,
    pub(super) kind: ObjectKind,
    pub(super) spine_file: String,
    pub(super) position: Vec2,
    pub(super) rotation: f32,
    pub(super) visible: bool,
    pub(super) layer: i64,
    pub(super) scale: f32,
    pub(super) scale_x: f32,
    pub(super) parent: Option<ParentRef>,
    pub(super) cross_scene: bool,
    /// Positioned in screen space; points are offset by the camera.
    pub(super) abs_position: bool,
    pub(super) animation: Option<String>,
    pub(super) loop_animation: bool,
    pub(super) skin: Option<String>,
    pub(super) skeleton: Box<dyn Skeleton>,
}

impl WorldObject {
    pub(super) fn new(
        id: impl Into<String>,
        kind: ObjectKind,
        spine_file: impl Into<String>,
        scale: f32,
        skeleton: Box<dyn Skeleton>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            spine_file: spine_file.into(),
            position: Vec2::ZERO,
            rotation: 0.0,
            visible: true,
            layer: 1,
            scale,
            scale_x: 1.0,
            parent: None,
            cross_scene: kind == ObjectKind::Player,
            abs_position: false,
            animation: None,
            loop_animation: false,
            skin: None,
            skeleton,
        }
    }

    /// World position of a named skeleton point.
    pub(super) fn point(&self, name: &str) -> Option<Vec2> {
        self.skeleton
            .point(name)
            .map(|offset| self.position + offset)
    }

    pub(super) fn point_names(&self) -> Vec<String> {
        self.skeleton.point_names()
    }

    pub(super) fn play_animation(
        &mut self,
        track: usize,
        name: &str,
        looped: bool,
    ) -> Result<TrackEntryId, SkeletonError> {
        let entry = self.skeleton.play_animation(track, name, looped)?;
        self.animation = Some(name.to_string());
        self.loop_animation = looped;
        Ok(entry)
    }

    pub(super) fn add_animation(
        &mut self,
        track: usize,
        name: &str,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryId, SkeletonError> {
        let entry = self.skeleton.add_animation(track, name, looped, delay)?;
        self.animation = Some(name.to_string());
        self.loop_animation = looped;
        Ok(entry)
    }

    pub(super) fn set_skin(&mut self, skin: &str) -> Result<(), SkeletonError> {
        self.skeleton.set_skin(skin)?;
        self.skin = Some(skin.to_string());
        Ok(())
    }

    pub(super) fn set_scale_x(&mut self, scale: f32) {
        self.skeleton.set_scale_x(scale);
        self.scale_x = scale;
    }
}

/// Read-only copy of an object's native state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSnapshot {
    pub id: String,
    pub kind: ObjectKind,
    pub state: LifecycleState,
    pub spine_file: String,
    pub position: Vec2,
    pub rotation: f32,
    pub visible: bool,
    pub layer: i64,
    pub scale: f32,
    pub scale_x: f32,
    pub attached_to_pointer: bool,
    pub cross_scene: bool,
    pub animation: Option<String>,
    pub loop_animation: bool,
    pub skin: Option<String>,
}

#[derive(Debug)]
pub(super) struct Occupant {
    pub(super) state: LifecycleState,
    pub(super) object: WorldObject,
}

#[derive(Debug, Default)]
pub(super) struct Slot {
    pub(super) generation: u32,
    pub(super) occupant: Option<Occupant>,
}

/// Generational arena holding every object the engine knows about.
#[derive(Debug, Default)]
pub(super) struct ObjectStore {
    pub(super) slots: Vec<Slot>,
    pub(super) free: Vec<u32>,
    /// Draw and step order of committed objects.
    pub(super) live: Vec<ObjectKey>,
    pub(super) pending_add: Vec<ObjectKey>,
    pub(super) pending_remove: Vec<(ObjectKey, Removal)>,
}

impl ObjectStore {
    pub(super) fn new() -> Self {
        Self::default()
    }

    fn occupant(&self, key: ObjectKey) -> Option<&Occupant> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.occupant.as_ref()
    }

    pub(super) fn occupant_mut(&mut self, key: ObjectKey) -> Option<&mut Occupant> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.occupant.as_mut()
    }

    pub(super) fn get(&self, key: ObjectKey) -> Option<&WorldObject> {
        self.occupant(key).map(|occupant| &occupant.object)
    }

    pub(super) fn get_mut(&mut self, key: ObjectKey) -> Option<&mut WorldObject> {
        self.occupant_mut(key).map(|occupant| &mut occupant.object)
    }

    pub(super) fn state(&self, key: ObjectKey) -> Option<LifecycleState> {
        self.occupant(key).map(|occupant| occupant.state)
    }

    pub(super) fn id_of(&self, key: ObjectKey) -> Option<&str> {
        self.get(key).map(|object| object.id.as_str())
    }

    pub(super) fn live(&self) -> &[ObjectKey] {
        &self.live
    }

    /// Every occupied slot in one of `states`, in slot order.
    pub(super) fn keys_in(&self, states: &[LifecycleState]) -> Vec<ObjectKey> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let occupant = slot.occupant.as_ref()?;
                states.contains(&occupant.state).then_some(ObjectKey {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect()
    }

    /// Looks an object up by id across every slot. An object queued for
    /// removal only matches when nothing else carries the id.
    pub(super) fn find_by_id(&self, id: &str) -> Option<ObjectKey> {
        let mut fallback = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(occupant) = slot.occupant.as_ref() else {
                continue;
            };
            if occupant.object.id != id {
                continue;
            }
            let key = ObjectKey {
                index: index as u32,
                generation: slot.generation,
            };
            if occupant.state != LifecycleState::PendingRemove {
                return Some(key);
            }
            fallback.get_or_insert(key);
        }
        fallback
    }

    pub(super) fn snapshot(&self, key: ObjectKey) -> Option<ObjectSnapshot> {
        let occupant = self.occupant(key)?;
        let object = &occupant.object;
        Some(ObjectSnapshot {
            id: object.id.clone(),
            kind: object.kind,
            state: occupant.state,
            spine_file: object.spine_file.clone(),
            position: object.position,
            rotation: object.rotation,
            visible: object.visible,
            layer: object.layer,
            scale: object.scale,
            scale_x: object.scale_x,
            attached_to_pointer: object.parent == Some(ParentRef::Pointer),
            cross_scene: object.cross_scene,
            animation: object.animation.clone(),
            loop_animation: object.loop_animation,
            skin: object.skin.clone(),
        })
    }

    pub(super) fn allocate(&mut self, object: WorldObject, state: LifecycleState) -> ObjectKey {
        let occupant = Some(Occupant { state, object });
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.occupant = occupant;
            return ObjectKey {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            occupant,
        });
        ObjectKey {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Frees the slot; the key and any copies of it stop resolving.
    pub(super) fn release(&mut self, key: ObjectKey) -> Option<WorldObject> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let occupant = slot.occupant.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.live.retain(|live| *live != key);
        Some(occupant.object)
    }
}

#[cfg(test)]
pub(in crate::lua_host::context) mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::skeleton::{SkeletonManifest, TimelineSkeleton};

    pub(in crate::lua_host::context) fn test_object(id: &str) -> WorldObject {
        let mut manifest = SkeletonManifest::default();
        manifest.animations.insert("idle".into(), 1.0);
        manifest.points.insert("base".into(), Vec2::new(0.0, 10.0));
        let skeleton = TimelineSkeleton::new("test", Rc::new(manifest), 1.0);
        WorldObject::new(id, ObjectKind::Item, "test", 1.0, Box::new(skeleton))
    }

    #[test]
    fn released_keys_stop_resolving() {
        let mut store = ObjectStore::new();
        let key = store.allocate(test_object("key1"), LifecycleState::Live);
        assert_eq!(store.id_of(key), Some("key1"));
        assert!(store.release(key).is_some());
        assert!(store.get(key).is_none());

        let reused = store.allocate(test_object("door"), LifecycleState::Live);
        assert_ne!(reused, key);
        assert!(store.get(key).is_none());
        assert_eq!(store.id_of(reused), Some("door"));
    }

    #[test]
    fn find_prefers_objects_not_being_removed() {
        let mut store = ObjectStore::new();
        let old = store.allocate(test_object("lamp"), LifecycleState::PendingRemove);
        assert_eq!(store.find_by_id("lamp"), Some(old));
        let new = store.allocate(test_object("lamp"), LifecycleState::PendingAdd);
        assert_eq!(store.find_by_id("lamp"), Some(new));
        assert_eq!(store.find_by_id("ghost"), None);
    }

    #[test]
    fn points_are_offset_by_position() {
        let mut object = test_object("key1");
        object.position = Vec2::new(100.0, 50.0);
        assert_eq!(object.point("base"), Some(Vec2::new(100.0, 60.0)));
        assert_eq!(object.point("missing"), None);
    }
}
