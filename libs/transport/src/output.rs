//! Writer interface into a transport's send buffer.

use dispatch::Dispatcher;

use crate::error::{Result, TransportError};

/// Emits messages into a dispatcher-backed send buffer from any thread,
/// including callers outside the scheduler's own tasks. The conductor picks
/// frames up through its send subscription and routes them by stream id.
#[derive(Clone)]
pub struct TransportOutput {
    send_buffer: Dispatcher,
    max_message_size: usize,
}

impl TransportOutput {
    pub(crate) fn new(send_buffer: Dispatcher, max_message_size: usize) -> Self {
        Self {
            send_buffer,
            max_message_size,
        }
    }

    /// Queues one message for the channel identified by `stream_id`.
    ///
    /// Fails with [`TransportError::SendBufferFull`] under backpressure; the
    /// caller decides whether to retry or reject the work.
    pub fn send_message(&self, stream_id: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                requested: payload.len(),
                max: self.max_message_size,
            });
        }
        self.send_buffer.publish(payload, stream_id)?;
        Ok(())
    }

    /// The dispatcher backing this output, for writers that frame their own
    /// claims (e.g. response writers).
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.send_buffer
    }
}
