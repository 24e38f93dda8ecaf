//! Independent read cursors over a ring buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dispatcher::DispatcherInner;
use crate::frame::{aligned_length, FrameType, HEADER_LENGTH};

/// A committed fragment handed to a [`FragmentHandler`] during polling.
///
/// The payload borrows the ring buffer directly; it is valid for the duration
/// of the handler call and must be copied out if retained.
#[derive(Debug)]
pub struct Fragment<'a> {
    /// Stream position at which the frame starts.
    pub position: u64,
    /// Producer-assigned demultiplexing id.
    pub stream_id: u32,
    pub payload: &'a [u8],
}

/// Consumer callback invoked once per committed data fragment.
pub trait FragmentHandler {
    fn on_fragment(&mut self, fragment: Fragment<'_>);
}

impl<F> FragmentHandler for F
where
    F: FnMut(Fragment<'_>),
{
    fn on_fragment(&mut self, fragment: Fragment<'_>) {
        self(fragment)
    }
}

/// An independent read cursor over a dispatcher's ring buffer.
///
/// Each subscription owns its cursor exclusively and advances it strictly
/// forward by exactly one committed frame per read step. A slow subscription
/// never affects another subscription's ability to read; it only narrows the
/// window of bytes the dispatcher may reclaim.
pub struct Subscription {
    inner: Arc<DispatcherInner>,
    id: u64,
    position: Arc<AtomicU64>,
    name: String,
}

impl Subscription {
    pub(crate) fn new(
        inner: Arc<DispatcherInner>,
        id: u64,
        position: Arc<AtomicU64>,
        name: String,
    ) -> Self {
        Self {
            inner,
            id,
            position,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Reads up to `max_fragments` committed data fragments, skipping padding
    /// transparently. Returns the number of data fragments handled.
    ///
    /// Stops at the first frame that is not yet committed: frames become
    /// visible in commit order per producer, and never before the payload
    /// write is complete.
    pub fn poll(&mut self, handler: &mut impl FragmentHandler, max_fragments: usize) -> usize {
        let mut handled = 0;

        while handled < max_fragments {
            let head = self.position.load(Ordering::Relaxed);
            let tail = self.inner.tail.load(Ordering::Acquire);
            if head >= tail {
                break;
            }

            let frame_offset = self.inner.buffer.offset_of(head);
            let stored = self.inner.buffer.frame_length(frame_offset);
            if stored <= 0 {
                // Claimed but not yet committed; the committed prefix ends
                // here for every subscription.
                break;
            }

            let stored = stored as usize;
            let advance = aligned_length(stored) as u64;

            if self.inner.buffer.frame_type(frame_offset) == u16::from(FrameType::Padding) {
                self.position.store(head + advance, Ordering::Release);
                continue;
            }

            debug_assert!(stored >= HEADER_LENGTH);
            let payload_length = stored - HEADER_LENGTH;
            // Safety: the frame is committed and cannot be reclaimed until
            // this cursor advances past it.
            let payload = unsafe { self.inner.buffer.payload(frame_offset, payload_length) };

            handler.on_fragment(Fragment {
                position: head,
                stream_id: self.inner.buffer.stream_id(frame_offset),
                payload,
            });

            self.position.store(head + advance, Ordering::Release);
            handled += 1;
        }

        handled
    }

    /// True when no committed fragment is currently readable.
    pub fn is_drained(&self) -> bool {
        let head = self.position.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        if head >= tail {
            return true;
        }
        self.inner
            .buffer
            .frame_length(self.inner.buffer.offset_of(head))
            <= 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.remove_subscription(self.id);
    }
}
