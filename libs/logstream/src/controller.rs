//! Stream processor controller: a scheduler task driving the four-phase
//! pipeline over one partition's log subscription.
//!
//! The controller is an explicit resumable-state machine: each pipeline
//! phase is a stage, one stage advances per quantum, and a stage that cannot
//! complete (side effects reporting failure, follow-up write backpressure)
//! is retried alone on the next quantum without re-running earlier phases.
//! One controller per partition keeps processors single-writer.

use std::time::Duration;

use dispatch::{Fragment, Subscription};
use runtime::{Task, TaskContext, Transition};
use tracing::{debug, trace, warn};

use crate::entry::{EntryKind, EntryState, RawEntry};
use crate::processor::ProcessorRegistry;
use crate::writer::{LogStreamWriter, ResponseWriter};

/// Resumption points of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitEntry,
    SideEffects { key: (EntryKind, EntryState) },
    WriteFollowUp { key: (EntryKind, EntryState) },
    UpdateState { key: (EntryKind, EntryState) },
}

pub struct StreamProcessorController {
    name: String,
    subscription: Subscription,
    registry: ProcessorRegistry,
    writer: LogStreamWriter,
    responder: ResponseWriter,
    poll_interval: Duration,
    stage: Stage,
}

impl StreamProcessorController {
    pub fn new(
        name: impl Into<String>,
        subscription: Subscription,
        registry: ProcessorRegistry,
        writer: LogStreamWriter,
        responder: ResponseWriter,
    ) -> Self {
        Self {
            name: name.into(),
            subscription,
            registry,
            writer,
            responder,
            poll_interval: Duration::from_millis(1),
            stage: Stage::AwaitEntry,
        }
    }

    /// Reads the next committed entry off the log, if any.
    fn next_entry(&mut self) -> Option<RawEntry> {
        let mut raw = None;
        self.subscription.poll(
            &mut |fragment: Fragment<'_>| {
                match RawEntry::decode(fragment.position, fragment.stream_id, fragment.payload) {
                    Ok(entry) => raw = Some(entry),
                    Err(err) => {
                        warn!(processor = %self.name, %err, "skipping undecodable entry");
                    }
                }
            },
            1,
        );
        raw
    }

    fn await_entry(&mut self) -> Transition {
        let Some(raw) = self.next_entry() else {
            return Transition::Sleep(self.poll_interval);
        };

        let key = (raw.kind, raw.state);
        let Some(processor) = self.registry.get_mut(raw.kind, raw.state) else {
            // Terminal states (follow-ups) have no processor; that is what
            // keeps replayed outcomes from cascading.
            trace!(
                processor = %self.name,
                kind = raw.kind.0,
                state = ?raw.state,
                "no processor registered, skipping entry"
            );
            return Transition::Yield;
        };

        match processor.begin(&raw) {
            Ok(()) => {
                debug!(
                    processor = %self.name,
                    position = raw.position,
                    key = raw.key,
                    "entry decided"
                );
                self.stage = Stage::SideEffects { key };
            }
            Err(err) => {
                warn!(processor = %self.name, %err, "entry decode failed, skipping");
            }
        }
        Transition::Yield
    }

    fn side_effects(&mut self, key: (EntryKind, EntryState)) -> Transition {
        let Some(processor) = self.registry.get_mut(key.0, key.1) else {
            self.stage = Stage::AwaitEntry;
            return Transition::Yield;
        };
        if processor.side_effects(&mut self.responder) {
            self.stage = Stage::WriteFollowUp { key };
        }
        // A failed side-effect pass retries this phase alone, without
        // re-deciding.
        Transition::Yield
    }

    fn write_follow_up(&mut self, key: (EntryKind, EntryState)) -> Transition {
        let Some(processor) = self.registry.get_mut(key.0, key.1) else {
            self.stage = Stage::AwaitEntry;
            return Transition::Yield;
        };
        match processor.write_follow_up(&self.writer) {
            Ok(position) => {
                trace!(processor = %self.name, position, "follow-up written");
                self.stage = Stage::UpdateState { key };
                Transition::Yield
            }
            Err(err) if err.is_backpressure() => {
                // The log buffer is full; retry this phase alone once
                // consumers made progress.
                Transition::Sleep(self.poll_interval)
            }
            Err(err) => {
                warn!(processor = %self.name, %err, "follow-up write failed");
                self.stage = Stage::UpdateState { key };
                Transition::Yield
            }
        }
    }

    fn update_state(&mut self, key: (EntryKind, EntryState)) -> Transition {
        if let Some(processor) = self.registry.get_mut(key.0, key.1) {
            processor.update_state();
        }
        self.stage = Stage::AwaitEntry;
        Transition::Yield
    }
}

impl Task for StreamProcessorController {
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Transition {
        if ctx.is_cancelled() {
            debug!(processor = %self.name, "controller stopped");
            return Transition::Done;
        }

        match self.stage {
            Stage::AwaitEntry => self.await_entry(),
            Stage::SideEffects { key } => self.side_effects(key),
            Stage::WriteFollowUp { key } => self.write_follow_up(key),
            Stage::UpdateState { key } => self.update_state(key),
        }
    }
}
