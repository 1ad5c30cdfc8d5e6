use serde::Serialize;

use crate::lua_host::error::BridgeError;

use super::objects::{ObjectKey, ObjectStore, WorldObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    PendingAdd,
    Live,
    PendingRemove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Removed by script; the mirror entry goes with it.
    Deleted,
    /// Dropped by a scene change; the mirror entry stays for the next visit.
    Unloaded,
}

#[derive(Debug, Default)]
pub(super) struct CommitReport {
    pub(super) added: Vec<ObjectKey>,
    pub(super) removed: Vec<(ObjectKey, WorldObject, Removal)>,
}

impl ObjectStore {
    /// Queues a new object. It can be found by id straight away but is only
    /// stepped once the next commit makes it live.
    pub(super) fn request_add(&mut self, object: WorldObject) -> Result<ObjectKey, BridgeError> {
        if let Some(existing) = self.find_by_id(&object.id) {
            if self.state(existing) != Some(LifecycleState::PendingRemove) {
                return Err(BridgeError::DuplicateId(object.id));
            }
        }
        let key = self.allocate(object, LifecycleState::PendingAdd);
        self.pending_add.push(key);
        Ok(key)
    }

    /// Queues a removal. Returns false when the key is stale or already queued.
    pub(super) fn request_remove(&mut self, key: ObjectKey, reason: Removal) -> bool {
        let Some(occupant) = self.occupant_mut(key) else {
            return false;
        };
        if occupant.state == LifecycleState::PendingRemove {
            return false;
        }
        occupant.state = LifecycleState::PendingRemove;
        self.pending_remove.push((key, reason));
        true
    }

    /// Applies every request queued before this call: additions first, then
    /// removals. An object added and removed since the last commit never
    /// becomes live.
    pub(super) fn commit(&mut self) -> CommitReport {
        let additions = std::mem::take(&mut self.pending_add);
        let removals = std::mem::take(&mut self.pending_remove);
        let mut report = CommitReport::default();

        for key in additions {
            let Some(occupant) = self.occupant_mut(key) else {
                continue;
            };
            if occupant.state != LifecycleState::PendingAdd {
                continue;
            }
            occupant.state = LifecycleState::Live;
            self.live.push(key);
            report.added.push(key);
        }

        for (key, reason) in removals {
            if let Some(object) = self.release(key) {
                report.removed.push((key, object, reason));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::objects::tests::test_object;
    use super::*;

    #[test]
    fn commit_promotes_additions() {
        let mut store = ObjectStore::new();
        let key = store.request_add(test_object("key1")).unwrap();
        assert_eq!(store.state(key), Some(LifecycleState::PendingAdd));
        assert!(store.live().is_empty());

        let report = store.commit();
        assert_eq!(report.added, vec![key]);
        assert_eq!(store.state(key), Some(LifecycleState::Live));
        assert_eq!(store.live(), &[key]);
    }

    #[test]
    fn live_count_changes_by_net_additions() {
        let mut store = ObjectStore::new();
        let keys: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|id| store.request_add(test_object(id)).unwrap())
            .collect();
        assert!(store.request_remove(keys[1], Removal::Deleted));
        assert!(store.request_remove(keys[3], Removal::Deleted));
        // a second request for the same object is absorbed
        assert!(!store.request_remove(keys[3], Removal::Deleted));

        let before = store.live().len();
        let report = store.commit();
        assert_eq!(store.live().len() - before, 4 - 2);
        assert_eq!(report.added, vec![keys[0], keys[2]]);
        assert_eq!(report.removed.len(), 2);
        assert!(store.get(keys[1]).is_none());
    }

    #[test]
    fn removal_waits_for_commit() {
        let mut store = ObjectStore::new();
        let key = store.request_add(test_object("door")).unwrap();
        store.commit();

        assert!(store.request_remove(key, Removal::Unloaded));
        assert_eq!(store.live(), &[key]);
        assert_eq!(store.state(key), Some(LifecycleState::PendingRemove));

        let report = store.commit();
        assert!(store.live().is_empty());
        assert_eq!(report.removed[0].0, key);
        assert_eq!(report.removed[0].2, Removal::Unloaded);
        assert!(!store.request_remove(key, Removal::Deleted));
    }

    #[test]
    fn requests_after_commit_start_wait_for_next_commit() {
        let mut store = ObjectStore::new();
        store.request_add(test_object("lamp")).unwrap();
        store.commit();
        let late = store.request_add(test_object("note")).unwrap();
        assert_eq!(store.state(late), Some(LifecycleState::PendingAdd));
        assert_eq!(store.commit().added, vec![late]);
    }

    #[test]
    fn duplicate_ids_are_rejected_unless_leaving() {
        let mut store = ObjectStore::new();
        let key = store.request_add(test_object("key1")).unwrap();
        assert!(matches!(
            store.request_add(test_object("key1")),
            Err(BridgeError::DuplicateId(id)) if id == "key1"
        ));
        store.request_remove(key, Removal::Unloaded);
        assert!(store.request_add(test_object("key1")).is_ok());
    }
}
