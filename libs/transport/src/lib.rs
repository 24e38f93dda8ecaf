//! Channel / Transport Layer
//!
//! ## Purpose
//!
//! Manages connection lifecycle over the ring-buffer dispatcher: channels
//! move CONNECTING → OPEN → CLOSING → CLOSED, registered listeners hear
//! exactly one "opened" and one "closed" per previously opened channel, and
//! failed outbound connects are retried with capped exponential backoff
//! without notifying anyone until a connect succeeds.
//!
//! ## Architecture Role
//!
//! ```text
//! callers ──send_message──→ [ send buffer (dispatch) ]
//!                                   │ conductor task (runtime)
//!                                   ├─ demux by stream id → media writes
//!                                   ├─ media reads → frame decode → handler
//!                                   └─ connects / retries / notifications
//! ```
//!
//! Raw sockets stay outside this crate behind the [`Connector`] /
//! [`MediaListener`] / [`Media`] traits; [`memory`] provides the in-process
//! implementation used for loopback wiring and tests.

pub mod address;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod memory;
pub mod output;
pub mod server;
pub mod testing;

mod conductor;

pub use address::RemoteAddress;
pub use channel::{ChannelListener, ChannelState};
pub use client::{ClientTransport, ClientTransportBuilder};
pub use conductor::MessageHandler;
pub use config::{RetryConfig, TransportConfig};
pub use error::{Result, TransportError};
pub use media::{Connector, Media, MediaListener};
pub use output::TransportOutput;
pub use server::{ServerTransport, ServerTransportBuilder};
