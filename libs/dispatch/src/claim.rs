//! Exclusive fragment claims.

use std::sync::Arc;

use crate::dispatcher::DispatcherInner;
use crate::frame::HEADER_LENGTH;

/// An exclusively owned reservation of a contiguous frame on a ring buffer.
///
/// The claimed payload is written in place through [`FragmentClaim::payload_mut`]
/// and made visible to subscriptions with [`FragmentClaim::commit`]. Dropping a
/// claim without committing aborts it: the frame is rewritten as padding and
/// consumers skip it without observing a single payload byte.
#[derive(Debug)]
pub struct FragmentClaim {
    inner: Arc<DispatcherInner>,
    position: u64,
    frame_offset: usize,
    payload_length: usize,
    resolved: bool,
}

impl FragmentClaim {
    pub(crate) fn new(
        inner: Arc<DispatcherInner>,
        position: u64,
        frame_offset: usize,
        payload_length: usize,
    ) -> Self {
        Self {
            inner,
            position,
            frame_offset,
            payload_length,
            resolved: false,
        }
    }

    /// Stream position at which this frame starts.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Writable view of the reserved payload bytes.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // Safety: the region is exclusively owned until commit or abort.
        unsafe {
            self.inner
                .buffer
                .payload_mut(self.frame_offset, self.payload_length)
        }
    }

    /// Copies `payload` into the claim. The lengths must match the claim.
    pub fn write_payload(&mut self, payload: &[u8]) {
        self.payload_mut().copy_from_slice(payload);
    }

    /// Makes the frame visible to subscriptions. Always succeeds.
    pub fn commit(mut self) {
        self.inner
            .buffer
            .commit(self.frame_offset, HEADER_LENGTH + self.payload_length);
        self.resolved = true;
    }

    /// Discards the frame; consumers fast-forward past it. Always succeeds.
    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        self.inner
            .buffer
            .abort(self.frame_offset, HEADER_LENGTH + self.payload_length);
        self.resolved = true;
    }
}

impl Drop for FragmentClaim {
    fn drop(&mut self) {
        if !self.resolved {
            self.abort_in_place();
        }
    }
}
