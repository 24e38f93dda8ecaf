//! The four-phase processor protocol and its per-kind registry.

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::entry::{EntryKind, EntryState, RawEntry, TypedEntry};
use crate::error::Result;
use crate::writer::{LogStreamWriter, ResponseWriter};

/// A per-entry-kind state machine applied in strict log order.
///
/// The four phases run 1→2→3→4 per entry:
///
/// 1. `process` — pure decision step: inspect externally-owned state and set
///    the entry's resulting lifecycle state. Must not mutate shared state.
/// 2. `execute_side_effects` — observable effects outside the log, strictly
///    conditioned on the decision; returning `false` retries this phase alone
///    without re-deciding.
/// 3. `write_follow_up` — append the follow-up entry recording the outcome;
///    backpressure retries this phase alone.
/// 4. `update_state` — apply the outcome to the externally-owned state store,
///    only when the decision was an acceptance.
///
/// Processors are never shared concurrently across two in-flight entries for
/// the same partition; log ordering makes each one single-writer.
pub trait EntryProcessor<V>: Send {
    fn process(&mut self, entry: &mut TypedEntry<V>);

    fn execute_side_effects(&mut self, entry: &TypedEntry<V>, responder: &mut ResponseWriter)
        -> bool;

    fn write_follow_up(&mut self, entry: &TypedEntry<V>, writer: &LogStreamWriter) -> Result<u64>;

    fn update_state(&mut self, entry: &TypedEntry<V>);
}

/// Type-erased processor driven by the controller's stage machine. The typed
/// adapter keeps the decided entry in flight so retried phases never
/// re-decide.
pub(crate) trait RawProcessor: Send {
    fn begin(&mut self, raw: &RawEntry) -> Result<()>;
    fn side_effects(&mut self, responder: &mut ResponseWriter) -> bool;
    fn write_follow_up(&mut self, writer: &LogStreamWriter) -> Result<u64>;
    fn update_state(&mut self);
}

struct TypedAdapter<V, P> {
    processor: P,
    in_flight: Option<TypedEntry<V>>,
    _value: PhantomData<fn() -> V>,
}

impl<V, P> RawProcessor for TypedAdapter<V, P>
where
    V: DeserializeOwned + Send + 'static,
    P: EntryProcessor<V>,
{
    fn begin(&mut self, raw: &RawEntry) -> Result<()> {
        let mut entry = raw.typed::<V>()?;
        self.processor.process(&mut entry);
        self.in_flight = Some(entry);
        Ok(())
    }

    fn side_effects(&mut self, responder: &mut ResponseWriter) -> bool {
        match self.in_flight.as_ref() {
            Some(entry) => self.processor.execute_side_effects(entry, responder),
            None => true,
        }
    }

    fn write_follow_up(&mut self, writer: &LogStreamWriter) -> Result<u64> {
        match self.in_flight.as_ref() {
            Some(entry) => self.processor.write_follow_up(entry, writer),
            None => Ok(0),
        }
    }

    fn update_state(&mut self) {
        if let Some(entry) = self.in_flight.take() {
            self.processor.update_state(&entry);
        }
    }
}

/// Lookup table from (kind, lifecycle state) to a four-phase callback set.
///
/// Follow-up entries re-enter the log with a terminal state no processor is
/// registered for, which is what keeps replay from cascading.
pub struct ProcessorRegistry {
    processors: HashMap<(EntryKind, EntryState), Box<dyn RawProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registers a processor for entries of `kind` in `state`.
    pub fn register<V, P>(&mut self, kind: EntryKind, state: EntryState, processor: P)
    where
        V: DeserializeOwned + Send + 'static,
        P: EntryProcessor<V> + 'static,
    {
        if self
            .processors
            .insert(
                (kind, state),
                Box::new(TypedAdapter {
                    processor,
                    in_flight: None,
                    _value: PhantomData,
                }),
            )
            .is_some()
        {
            debug!(?kind, ?state, "replaced registered processor");
        }
    }

    pub(crate) fn get_mut(
        &mut self,
        kind: EntryKind,
        state: EntryState,
    ) -> Option<&mut Box<dyn RawProcessor>> {
        self.processors.get_mut(&(kind, state))
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
