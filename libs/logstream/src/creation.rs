//! First-writer-wins creation processor.
//!
//! Accepts the first create request for an entity and rejects every later
//! duplicate. The duplicate check consults the externally-owned materialized
//! view through the `entity_exists` predicate, not the log so far; under
//! replay against a diverged view the predicate wins.

use tracing::warn;

use crate::entry::{EntryState, TypedEntry};
use crate::error::Result;
use crate::processor::EntryProcessor;
use crate::writer::{LogStreamWriter, ResponseWriter};

/// Generic create processor wired to externally-owned state through three
/// callbacks: the duplicate predicate, the listener notification, and the
/// state update.
pub struct CreationProcessor<V, Exists, Notify, Update>
where
    Exists: FnMut(&V) -> bool + Send,
    Notify: FnMut(&V) + Send,
    Update: FnMut(u64, &V) + Send,
{
    entity_exists: Exists,
    notify_listeners: Notify,
    apply_to_state: Update,
    accepted: bool,
    _value: std::marker::PhantomData<fn() -> V>,
}

impl<V, Exists, Notify, Update> CreationProcessor<V, Exists, Notify, Update>
where
    Exists: FnMut(&V) -> bool + Send,
    Notify: FnMut(&V) + Send,
    Update: FnMut(u64, &V) + Send,
{
    pub fn new(entity_exists: Exists, notify_listeners: Notify, apply_to_state: Update) -> Self {
        Self {
            entity_exists,
            notify_listeners,
            apply_to_state,
            accepted: false,
            _value: std::marker::PhantomData,
        }
    }
}

impl<V, Exists, Notify, Update> EntryProcessor<V> for CreationProcessor<V, Exists, Notify, Update>
where
    V: serde::Serialize + std::fmt::Debug + Send,
    Exists: FnMut(&V) -> bool + Send,
    Notify: FnMut(&V) + Send,
    Update: FnMut(u64, &V) + Send,
{
    fn process(&mut self, entry: &mut TypedEntry<V>) {
        self.accepted = !(self.entity_exists)(&entry.value);

        if self.accepted {
            entry.state = EntryState::Created;
        } else {
            warn!(
                value = ?entry.value,
                "rejecting create complete, entity already exists"
            );
            entry.state = EntryState::CreateCompleteRejected;
        }
    }

    fn execute_side_effects(
        &mut self,
        entry: &TypedEntry<V>,
        _responder: &mut ResponseWriter,
    ) -> bool {
        if self.accepted {
            (self.notify_listeners)(&entry.value);
        }
        true
    }

    fn write_follow_up(&mut self, entry: &TypedEntry<V>, writer: &LogStreamWriter) -> Result<u64> {
        writer.append_follow_up(entry.key, entry.kind, entry.state, &entry.value)
    }

    fn update_state(&mut self, entry: &TypedEntry<V>) {
        // A rejected duplicate never mutates state.
        if self.accepted {
            (self.apply_to_state)(entry.key, &entry.value);
        }
    }
}
