use std::collections::BTreeMap;

use mlua::RegistryKey;

use crate::skeleton::TrackEntryId;

use super::dialog::DialogTicket;
use super::objects::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CallbackOrigin {
    Animation(TrackEntryId),
    Arrival,
    Dialog(DialogTicket),
}

/// A script function waiting for a native event. Dropping the record
/// releases the function; the registry slot is reclaimed on the next expire.
#[derive(Debug)]
pub(super) struct CallbackRecord {
    pub(super) owner: Option<ObjectKey>,
    pub(super) origin: CallbackOrigin,
    pub(super) label: String,
    pub(super) function: RegistryKey,
}

#[derive(Debug)]
pub(super) struct CallbackRuntime {
    next_handle: u32,
    records: BTreeMap<u32, CallbackRecord>,
}

impl CallbackRuntime {
    pub(super) fn new() -> Self {
        CallbackRuntime {
            next_handle: 1,
            records: BTreeMap::new(),
        }
    }

    pub(super) fn register(
        &mut self,
        owner: Option<ObjectKey>,
        origin: CallbackOrigin,
        label: String,
        function: RegistryKey,
    ) -> u32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.records.insert(
            handle,
            CallbackRecord {
                owner,
                origin,
                label,
                function,
            },
        );
        handle
    }

    pub(super) fn take(&mut self, handle: u32) -> Option<CallbackRecord> {
        self.records.remove(&handle)
    }

    /// Removes the record waiting on `origin` for `owner`, if any.
    pub(super) fn take_origin(
        &mut self,
        owner: Option<ObjectKey>,
        origin: CallbackOrigin,
    ) -> Option<CallbackRecord> {
        let handle = self
            .records
            .iter()
            .find_map(|(handle, record)| {
                (record.owner == owner && record.origin == origin).then_some(*handle)
            })?;
        self.records.remove(&handle)
    }

    pub(super) fn take_dialog(&mut self, ticket: DialogTicket) -> Option<CallbackRecord> {
        let handle = self.records.iter().find_map(|(handle, record)| {
            (record.origin == CallbackOrigin::Dialog(ticket)).then_some(*handle)
        })?;
        self.records.remove(&handle)
    }

    /// Removes every record owned by `owner` except arrival callbacks, which
    /// belong to the walk that holds their handle.
    pub(super) fn drop_owner(&mut self, owner: ObjectKey) -> Vec<CallbackRecord> {
        let handles: Vec<u32> = self
            .records
            .iter()
            .filter(|(_, record)| {
                record.owner == Some(owner) && record.origin != CallbackOrigin::Arrival
            })
            .map(|(handle, _)| *handle)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| self.records.remove(&handle))
            .collect()
    }

    pub(super) fn len(&self) -> usize {
        self.records.len()
    }
}
