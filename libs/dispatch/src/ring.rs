//! Raw ring-buffer storage with atomic frame headers.
//!
//! The buffer is allocated as 8-byte words so that every frame header sits on
//! naturally aligned addresses. Only the length field is accessed atomically;
//! all other header fields and the payload are written by the exclusive claim
//! owner before the length is published and are immutable afterwards, so plain
//! accesses on them are race-free.
//!
//! Memory reuse invariant: a byte range is zeroed after every subscription has
//! passed it and before `cleaned` advances over it, and producers only claim
//! ranges below `cleaned + capacity`. A reader positioned below the raw tail
//! therefore only ever observes a zero length (claimed, unwritten), a negative
//! length (claimed, in progress) or a committed header — never a stale header
//! from a previous lap.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::frame::{
    FrameType, FLAGS_OFFSET, FRAME_ALIGNMENT, FRAME_VERSION, HEADER_LENGTH, LENGTH_OFFSET,
    STREAM_ID_OFFSET, TYPE_OFFSET, VERSION_OFFSET,
};

#[derive(Debug)]
pub(crate) struct LogBuffer {
    words: Box<[UnsafeCell<u64>]>,
    capacity: usize,
    mask: u64,
}

// The unsafe cells are only ever written through exclusively owned claims,
// the commit/abort protocol, or the registry-serialized reclaim pass.
unsafe impl Send for LogBuffer {}
unsafe impl Sync for LogBuffer {}

impl LogBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        debug_assert!(capacity >= FRAME_ALIGNMENT);
        let words = (0..capacity / 8).map(|_| UnsafeCell::new(0u64)).collect();
        Self {
            words,
            capacity,
            mask: capacity as u64 - 1,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical byte offset of a logical stream position.
    #[inline]
    pub(crate) fn offset_of(&self, position: u64) -> usize {
        (position & self.mask) as usize
    }

    #[inline]
    fn byte_ptr(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }

    #[inline]
    fn length_field(&self, frame_offset: usize) -> &AtomicI32 {
        debug_assert_eq!(frame_offset % FRAME_ALIGNMENT, 0);
        debug_assert!(frame_offset + 4 <= self.capacity);
        // Safety: the offset is frame-aligned and in bounds, and the backing
        // words give the i32 its required alignment.
        unsafe { &*(self.byte_ptr().add(frame_offset + LENGTH_OFFSET) as *const AtomicI32) }
    }

    /// Marks a freshly claimed message frame as in-progress and records its
    /// metadata. The region is exclusively owned by the claiming producer.
    pub(crate) fn mark_claimed(&self, frame_offset: usize, framed_length: usize, stream_id: u32) {
        let p = self.byte_ptr();
        // Safety: header offsets are in bounds of the exclusively owned claim
        // and naturally aligned relative to the 8-byte frame start.
        unsafe {
            p.add(frame_offset + VERSION_OFFSET).write(FRAME_VERSION);
            p.add(frame_offset + FLAGS_OFFSET).write(0);
            (p.add(frame_offset + TYPE_OFFSET) as *mut u16).write(FrameType::Message.into());
            (p.add(frame_offset + STREAM_ID_OFFSET) as *mut u32).write(stream_id);
        }
        self.length_field(frame_offset)
            .store(-(framed_length as i32), Ordering::Release);
    }

    /// Publishes a claimed frame. Readers that observe the positive length are
    /// guaranteed to see the payload written before this call.
    pub(crate) fn commit(&self, frame_offset: usize, framed_length: usize) {
        self.length_field(frame_offset)
            .store(framed_length as i32, Ordering::Release);
    }

    /// Replaces a claimed frame with skip-only padding so readers fast-forward
    /// past the region instead of reading garbage.
    pub(crate) fn abort(&self, frame_offset: usize, framed_length: usize) {
        // Safety: the claim still owns the region; the type rewrite happens
        // before the length is published.
        unsafe {
            (self.byte_ptr().add(frame_offset + TYPE_OFFSET) as *mut u16)
                .write(FrameType::Padding.into());
        }
        self.length_field(frame_offset)
            .store(framed_length as i32, Ordering::Release);
    }

    /// Writes an immediately committed padding frame covering `region_length`
    /// bytes at the physical end of the buffer.
    pub(crate) fn write_padding(&self, frame_offset: usize, region_length: usize) {
        debug_assert!(region_length >= FRAME_ALIGNMENT);
        // A minimal padding frame is one alignment unit; length and type both
        // live inside those first 8 bytes.
        unsafe {
            (self.byte_ptr().add(frame_offset + TYPE_OFFSET) as *mut u16)
                .write(FrameType::Padding.into());
        }
        self.length_field(frame_offset)
            .store(region_length as i32, Ordering::Release);
    }

    /// Loads a frame's stored length. Zero or negative means not yet
    /// committed.
    #[inline]
    pub(crate) fn frame_length(&self, frame_offset: usize) -> i32 {
        self.length_field(frame_offset).load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn frame_type(&self, frame_offset: usize) -> u16 {
        // Safety: only called for committed frames, whose header fields are
        // immutable and published by the committing release store.
        unsafe { (self.byte_ptr().add(frame_offset + TYPE_OFFSET) as *const u16).read() }
    }

    #[inline]
    pub(crate) fn stream_id(&self, frame_offset: usize) -> u32 {
        // Safety: see `frame_type`; never called for padding frames.
        unsafe { (self.byte_ptr().add(frame_offset + STREAM_ID_OFFSET) as *const u32).read() }
    }

    /// Immutable view of a committed frame's payload.
    ///
    /// Safety: callers must only pass offsets of committed frames; committed
    /// regions are immutable until reclaimed, and reclaim requires the calling
    /// subscription to advance past them first.
    pub(crate) unsafe fn payload(&self, frame_offset: usize, payload_length: usize) -> &[u8] {
        debug_assert!(frame_offset + HEADER_LENGTH + payload_length <= self.capacity);
        std::slice::from_raw_parts(
            self.byte_ptr().add(frame_offset + HEADER_LENGTH),
            payload_length,
        )
    }

    /// Mutable view of a claimed frame's payload.
    ///
    /// Safety: callers must exclusively own the claim covering the region.
    pub(crate) unsafe fn payload_mut(
        &self,
        frame_offset: usize,
        payload_length: usize,
    ) -> &mut [u8] {
        debug_assert!(frame_offset + HEADER_LENGTH + payload_length <= self.capacity);
        std::slice::from_raw_parts_mut(
            self.byte_ptr().add(frame_offset + HEADER_LENGTH),
            payload_length,
        )
    }

    /// Zeroes the physical bytes backing the logical range `[from, to)`.
    ///
    /// Callers must guarantee no producer or subscription can touch the range
    /// concurrently; the dispatcher serializes this through the subscription
    /// registry lock.
    pub(crate) fn zero_range(&self, from: u64, to: u64) {
        debug_assert!(to - from <= self.capacity as u64);
        let mut position = from;
        while position < to {
            let offset = self.offset_of(position);
            let chunk = ((to - position) as usize).min(self.capacity - offset);
            // Safety: range is in bounds and unreachable by any other party
            // per the caller contract.
            unsafe {
                ptr::write_bytes(self.byte_ptr().add(offset), 0, chunk);
            }
            position += chunk as u64;
        }
    }
}
