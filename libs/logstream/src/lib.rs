//! Event-Sourced Processor Protocol
//!
//! ## Purpose
//!
//! Turns a stream of log entries into deterministic state transitions with
//! idempotency and side-effect ordering guarantees. Every entry read off a
//! ring-buffer backed log runs the same four-phase pipeline, in strict log
//! order, single-writer per partition:
//!
//! ```text
//! [ log buffer ] ──poll──→ process → side effects → follow-up → state
//!                             │            │             │         │
//!                          decide     notify world   record    apply iff
//!                          outcome    (retryable)    outcome   accepted
//! ```
//!
//! Phase 2's effects are always attempted before phase 3's follow-up entry
//! becomes visible to other readers, and a rejected duplicate is a terminal
//! entry state reported through the response path, never an error.

pub mod controller;
pub mod creation;
pub mod entry;
pub mod error;
pub mod processor;
pub mod writer;

pub use controller::StreamProcessorController;
pub use creation::CreationProcessor;
pub use entry::{EntryKind, EntryState, RawEntry, TypedEntry};
pub use error::{LogStreamError, Result};
pub use processor::{EntryProcessor, ProcessorRegistry};
pub use writer::{LogStreamWriter, Response, ResponseWriter};
