use crate::lua_host::types::Vec2;

use super::objects::ObjectKey;

/// Mouse pointer and the objects currently hanging off it.
#[derive(Debug, Default)]
pub(super) struct PointerState {
    pub(super) position: Vec2,
    attached: Vec<ObjectKey>,
}

impl PointerState {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Appends without deduplication.
    pub(super) fn attach(&mut self, key: ObjectKey) {
        self.attached.push(key);
    }

    /// Drops every entry equal to `key` plus any entry `is_stale` rejects.
    pub(super) fn detach(&mut self, key: ObjectKey, is_stale: impl Fn(ObjectKey) -> bool) -> usize {
        let before = self.attached.len();
        self.attached
            .retain(|attached| *attached != key && !is_stale(*attached));
        before - self.attached.len()
    }

    pub(super) fn take_all(&mut self) -> Vec<ObjectKey> {
        std::mem::take(&mut self.attached)
    }

    pub(super) fn forget(&mut self, key: ObjectKey) {
        self.attached.retain(|attached| *attached != key);
    }

    pub(super) fn has_attachments(&self) -> bool {
        !self.attached.is_empty()
    }

    pub(super) fn attached(&self) -> &[ObjectKey] {
        &self.attached
    }
}
