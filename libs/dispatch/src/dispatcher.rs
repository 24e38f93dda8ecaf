//! Ring-buffer dispatcher: bounded, lock-free claim/commit with independent
//! cursor-based consumption.
//!
//! Producers reserve contiguous frames with an atomic compare-and-advance on
//! the shared tail position; no two claims ever overlap. Consumers poll
//! through [`Subscription`] cursors that advance one committed frame at a
//! time. The region below the slowest subscription is zeroed before the tail
//! may wrap over it, which is what makes the commit protocol safe across laps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::claim::FragmentClaim;
use crate::error::{DispatchError, Result};
use crate::frame::{aligned_length, framed_length, FRAME_ALIGNMENT};
use crate::ring::LogBuffer;
use crate::subscription::Subscription;

/// Construction-time dispatcher configuration; not re-validated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Diagnostic name carried in errors and logs.
    pub name: String,
    /// Ring-buffer capacity in bytes. Must be a power of two for wrap
    /// arithmetic.
    pub buffer_capacity: usize,
    /// Largest payload a single claim may request.
    pub max_fragment_length: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let buffer_capacity = 1024 * 1024;
        Self {
            name: "dispatcher".to_string(),
            buffer_capacity,
            max_fragment_length: buffer_capacity / 8,
        }
    }
}

impl DispatcherConfig {
    pub fn new(name: impl Into<String>, buffer_capacity: usize) -> Self {
        Self {
            name: name.into(),
            buffer_capacity,
            max_fragment_length: (buffer_capacity / 8).max(FRAME_ALIGNMENT),
        }
    }
}

#[derive(Debug)]
struct SubscriptionRegistry {
    next_id: u64,
    heads: Vec<(u64, Arc<AtomicU64>)>,
}

#[derive(Debug)]
pub(crate) struct DispatcherInner {
    pub(crate) buffer: LogBuffer,
    /// Raw claim position; advances on every successful claim CAS.
    pub(crate) tail: AtomicU64,
    /// Position up to which consumed bytes have been zeroed for reuse.
    cleaned: AtomicU64,
    registry: Mutex<SubscriptionRegistry>,
    name: String,
}

impl DispatcherInner {
    /// Zeroes everything every subscription has passed and advances the
    /// reclaim boundary. Serialized through the registry lock so that a
    /// concurrently opening subscription is either included in the minimum or
    /// starts at the advanced boundary.
    fn reclaim(&self) {
        let registry = self.registry.lock();
        let limit = registry
            .heads
            .iter()
            .map(|(_, head)| head.load(Ordering::Acquire))
            .min();

        // Without subscriptions there is no safe reclaim boundary; committed
        // frames are retained until a reader appears.
        let Some(limit) = limit else { return };

        let cleaned = self.cleaned.load(Ordering::Relaxed);
        if limit > cleaned {
            trace!(
                dispatcher = %self.name,
                from = cleaned,
                to = limit,
                "reclaiming consumed region"
            );
            self.buffer.zero_range(cleaned, limit);
            self.cleaned.store(limit, Ordering::Release);
        }
    }

    pub(crate) fn remove_subscription(&self, id: u64) {
        let mut registry = self.registry.lock();
        registry.heads.retain(|(head_id, _)| *head_id != id);
    }
}

/// Bounded ring-buffer dispatcher shared by all producers of one stream.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    max_fragment_length: usize,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        if !config.buffer_capacity.is_power_of_two() {
            return Err(DispatchError::configuration(format!(
                "buffer capacity {} is not a power of two",
                config.buffer_capacity
            )));
        }
        if config.buffer_capacity < 2 * FRAME_ALIGNMENT {
            return Err(DispatchError::configuration(format!(
                "buffer capacity {} is below the minimum of {}",
                config.buffer_capacity,
                2 * FRAME_ALIGNMENT
            )));
        }
        if aligned_length(framed_length(config.max_fragment_length)) > config.buffer_capacity / 2 {
            return Err(DispatchError::configuration(format!(
                "max fragment length {} does not leave room for two frames in a {} byte buffer",
                config.max_fragment_length, config.buffer_capacity
            )));
        }

        debug!(
            dispatcher = %config.name,
            capacity = config.buffer_capacity,
            max_fragment = config.max_fragment_length,
            "created ring-buffer dispatcher"
        );

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                buffer: LogBuffer::new(config.buffer_capacity),
                tail: AtomicU64::new(0),
                cleaned: AtomicU64::new(0),
                registry: Mutex::new(SubscriptionRegistry {
                    next_id: 0,
                    heads: Vec::new(),
                }),
                name: config.name,
            }),
            max_fragment_length: config.max_fragment_length,
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.buffer.capacity()
    }

    /// Current raw tail position (highest claimed, not necessarily committed).
    pub fn tail_position(&self) -> u64 {
        self.inner.tail.load(Ordering::Acquire)
    }

    /// Reserves a frame for `payload_length` bytes tagged with `stream_id`.
    ///
    /// When the contiguous space before the physical wrap is too small, the
    /// remainder is claimed as an immediately committed padding frame and the
    /// claim retries at offset zero; callers only observe the added latency.
    /// When total space is insufficient even after reclaiming consumed
    /// regions, the claim fails with [`DispatchError::Backpressure`] and no
    /// position advances.
    pub fn claim(&self, payload_length: usize, stream_id: u32) -> Result<FragmentClaim> {
        if payload_length > self.max_fragment_length {
            return Err(DispatchError::FragmentTooLarge {
                requested: payload_length,
                max: self.max_fragment_length,
            });
        }

        let advance = aligned_length(framed_length(payload_length)) as u64;
        let capacity = self.inner.buffer.capacity() as u64;

        loop {
            let tail = self.inner.tail.load(Ordering::Relaxed);
            let frame_offset = self.inner.buffer.offset_of(tail);
            let remaining = self.inner.buffer.capacity() - frame_offset;

            // Worst case the claim also needs a padding frame to the wrap
            // point. Checking the full span up front keeps backpressure free
            // of side effects: a rejected claim advances nothing.
            let required = if (advance as usize) > remaining {
                remaining as u64 + advance
            } else {
                advance
            };

            // Claims may only land on memory that was zeroed since the
            // previous lap.
            if tail + required > self.inner.cleaned.load(Ordering::Acquire) + capacity {
                self.inner.reclaim();
                if tail + required > self.inner.cleaned.load(Ordering::Acquire) + capacity {
                    trace!(
                        dispatcher = %self.inner.name,
                        requested = payload_length,
                        "claim rejected with backpressure"
                    );
                    return Err(DispatchError::backpressure(&self.inner.name, payload_length));
                }
            }

            if (advance as usize) > remaining {
                // Pad to the physical end of the buffer, then retry at
                // offset zero.
                if self
                    .inner
                    .tail
                    .compare_exchange(
                        tail,
                        tail + remaining as u64,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    self.inner.buffer.write_padding(frame_offset, remaining);
                }
                continue;
            }

            if self
                .inner
                .tail
                .compare_exchange(tail, tail + advance, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.inner.buffer.mark_claimed(
                    frame_offset,
                    framed_length(payload_length),
                    stream_id,
                );
                return Ok(FragmentClaim::new(
                    Arc::clone(&self.inner),
                    tail,
                    frame_offset,
                    payload_length,
                ));
            }
        }
    }

    /// Claims, fills and immediately commits a frame in one step.
    pub fn publish(&self, payload: &[u8], stream_id: u32) -> Result<u64> {
        let mut claim = self.claim(payload.len(), stream_id)?;
        claim.write_payload(payload);
        let position = claim.position();
        claim.commit();
        Ok(position)
    }

    /// Opens an independent read cursor starting at the oldest retained
    /// position.
    pub fn open_subscription(&self, name: impl Into<String>) -> Subscription {
        let name = name.into();
        let mut registry = self.inner.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        // Starting at the reclaim boundary is always a frame boundary: the
        // boundary only ever advances to a previous minimum head.
        let start = self.inner.cleaned.load(Ordering::Acquire);
        let head = Arc::new(AtomicU64::new(start));
        registry.heads.push((id, Arc::clone(&head)));
        drop(registry);

        debug!(dispatcher = %self.inner.name, subscription = %name, start, "opened subscription");
        Subscription::new(Arc::clone(&self.inner), id, head, name)
    }

    /// Housekeeping entry point for a scheduler-driven duty cycle: reclaims
    /// consumed regions ahead of producer demand.
    pub fn reclaim(&self) {
        self.inner.reclaim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_dispatcher(capacity: usize) -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            name: "test".to_string(),
            buffer_capacity: capacity,
            max_fragment_length: capacity / 4,
        })
        .expect("valid config")
    }

    fn collect(subscription: &mut Subscription) -> Vec<(u32, Vec<u8>)> {
        let mut seen = Vec::new();
        subscription.poll(
            &mut |fragment: crate::Fragment<'_>| {
                seen.push((fragment.stream_id, fragment.payload.to_vec()));
            },
            usize::MAX,
        );
        seen
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let result = Dispatcher::new(DispatcherConfig {
            name: "bad".to_string(),
            buffer_capacity: 1000,
            max_fragment_length: 100,
        });
        assert!(matches!(
            result,
            Err(DispatchError::Configuration { .. })
        ));
    }

    #[test]
    fn fragments_are_observed_in_commit_order() {
        let dispatcher = small_dispatcher(1024);
        let mut subscription = dispatcher.open_subscription("reader");

        dispatcher.publish(b"first", 1).unwrap();
        dispatcher.publish(b"second", 2).unwrap();
        dispatcher.publish(b"third", 3).unwrap();

        assert_eq!(
            collect(&mut subscription),
            vec![
                (1, b"first".to_vec()),
                (2, b"second".to_vec()),
                (3, b"third".to_vec()),
            ]
        );
    }

    #[test]
    fn aborted_claims_contribute_zero_bytes() {
        let dispatcher = small_dispatcher(1024);
        let mut subscription = dispatcher.open_subscription("reader");

        dispatcher.publish(b"before", 1).unwrap();
        let mut claim = dispatcher.claim(32, 9).unwrap();
        claim.payload_mut().fill(0xAB);
        claim.abort();
        dispatcher.publish(b"after", 1).unwrap();

        assert_eq!(
            collect(&mut subscription),
            vec![(1, b"before".to_vec()), (1, b"after".to_vec())]
        );
    }

    #[test]
    fn dropped_claim_is_aborted() {
        let dispatcher = small_dispatcher(1024);
        let mut subscription = dispatcher.open_subscription("reader");

        drop(dispatcher.claim(16, 5).unwrap());
        dispatcher.publish(b"live", 1).unwrap();

        assert_eq!(collect(&mut subscription), vec![(1, b"live".to_vec())]);
    }

    #[test]
    fn uncommitted_claim_blocks_later_commits_from_view() {
        let dispatcher = small_dispatcher(1024);
        let mut subscription = dispatcher.open_subscription("reader");

        let pending = dispatcher.claim(8, 1).unwrap();
        dispatcher.publish(b"later", 2).unwrap();

        // The committed prefix ends at the pending claim.
        assert!(collect(&mut subscription).is_empty());

        pending.commit();
        let seen = collect(&mut subscription);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (2, b"later".to_vec()));
    }

    #[test]
    fn wrap_inserts_one_padding_frame_and_claims_at_offset_zero() {
        let capacity = 256;
        let dispatcher = small_dispatcher(capacity);
        let mut subscription = dispatcher.open_subscription("reader");

        // Three 80-byte frames leave 16 contiguous bytes before the wrap,
        // less than the next claim needs.
        let frame = aligned_length(framed_length(64));
        assert_eq!(frame, 80);
        for _ in 0..3 {
            dispatcher.claim(64, 1).unwrap().commit();
        }
        subscription.poll(&mut |_: crate::Fragment<'_>| {}, usize::MAX);

        let wrapped = dispatcher.claim(64, 9).unwrap();
        // The claim landed at physical offset zero, one full lap in.
        assert_eq!(wrapped.position(), capacity as u64);
        // Exactly one padding frame covers the 16-byte remainder: the tail
        // advanced by the padding plus the wrapped frame and nothing else.
        assert_eq!(dispatcher.tail_position(), (capacity + frame) as u64);
        wrapped.commit();

        // The reader skips the padding transparently and sees one fragment.
        let seen = collect(&mut subscription);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 9);
    }

    #[test]
    fn claim_backpressures_when_consumers_lag() {
        let dispatcher = small_dispatcher(256);
        let mut subscription = dispatcher.open_subscription("laggard");

        let mut accepted = 0;
        loop {
            match dispatcher.claim(32, 1) {
                Ok(claim) => {
                    claim.commit();
                    accepted += 1;
                }
                Err(err) => {
                    assert!(err.is_backpressure());
                    break;
                }
            }
            assert!(accepted < 64, "buffer never filled");
        }

        // Consuming everything frees the space again.
        subscription.poll(&mut |_: crate::Fragment<'_>| {}, usize::MAX);
        let claim = dispatcher.claim(32, 1).expect("space after consumption");
        claim.commit();
    }

    #[test]
    fn backpressure_leaves_positions_untouched() {
        let dispatcher = small_dispatcher(256);
        let _subscription = dispatcher.open_subscription("idle");

        while dispatcher.claim(32, 1).map(FragmentClaim::commit).is_ok() {}
        let tail_before = dispatcher.tail_position();
        assert!(dispatcher.claim(32, 1).is_err());
        assert_eq!(dispatcher.tail_position(), tail_before);
    }

    #[test]
    fn subscriptions_consume_at_independent_paces() {
        let dispatcher = small_dispatcher(1024);
        let mut fast = dispatcher.open_subscription("fast");
        let mut slow = dispatcher.open_subscription("slow");

        dispatcher.publish(b"one", 1).unwrap();
        dispatcher.publish(b"two", 1).unwrap();

        assert_eq!(collect(&mut fast).len(), 2);
        // The slow subscription still sees both fragments afterwards.
        assert_eq!(collect(&mut slow).len(), 2);
    }

    #[test]
    fn payload_too_large_is_not_backpressure() {
        let dispatcher = small_dispatcher(256);
        let err = dispatcher.claim(1024, 1).unwrap_err();
        assert!(matches!(err, DispatchError::FragmentTooLarge { .. }));
    }

    #[test]
    fn concurrent_producers_never_overlap_frames() {
        use std::thread;

        let dispatcher = small_dispatcher(64 * 1024);
        let mut subscription = dispatcher.open_subscription("reader");

        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 200;

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || {
                    let mut sequence = 0u32;
                    while sequence < PER_PRODUCER as u32 {
                        let payload = [producer as u8, sequence as u8];
                        match dispatcher.publish(&payload, producer as u32) {
                            Ok(_) => sequence += 1,
                            Err(err) if err.is_backpressure() => thread::yield_now(),
                            Err(err) => panic!("unexpected claim failure: {err}"),
                        }
                    }
                })
            })
            .collect();

        let mut per_producer = vec![Vec::new(); PRODUCERS];
        let mut total = 0;
        while total < PRODUCERS * PER_PRODUCER {
            total += subscription.poll(
                &mut |fragment: crate::Fragment<'_>| {
                    per_producer[fragment.stream_id as usize].push(fragment.payload[1]);
                },
                64,
            );
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Per-producer commit order is preserved even though cross-producer
        // order is unspecified.
        for observed in per_producer {
            assert_eq!(observed.len(), PER_PRODUCER);
            for (expected, actual) in observed.iter().enumerate() {
                assert_eq!(*actual, expected as u8);
            }
        }
    }
}
