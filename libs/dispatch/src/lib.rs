//! Ring-Buffer Dispatcher
//!
//! ## Purpose
//!
//! The dispatcher is the byte transport every other component rides on: a
//! bounded circular buffer supporting concurrent claim/commit by producers and
//! independent cursor-based consumption by any number of subscriptions.
//!
//! ## Architecture Role
//!
//! ```text
//! Producer A ──claim/commit──┐
//! Producer B ──claim/commit──┤→ [ Ring Buffer ] ──poll──→ Subscription "net"
//! Producer C ──claim/commit──┘                  ──poll──→ Subscription "log"
//! ```
//!
//! Producers reserve frames with a single compare-and-advance on the shared
//! tail; commits publish frames with release semantics so a consumer that
//! observes a header never sees a partially written payload. Backpressure is
//! an ordinary return value, not a fault.
//!
//! ## Guarantees
//!
//! - A subscription observes one producer's frames in exactly commit order.
//! - Aborted claims contribute zero payload bytes to any subscription.
//! - A claim crossing the physical wrap point is preceded by exactly one
//!   skip-only padding frame and lands at offset zero.
//! - A rejected claim advances no position and writes no data.

pub mod claim;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod subscription;

mod ring;

pub use claim::FragmentClaim;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DispatchError, Result};
pub use frame::{FrameType, FRAME_ALIGNMENT, HEADER_LENGTH};
pub use subscription::{Fragment, FragmentHandler, Subscription};
