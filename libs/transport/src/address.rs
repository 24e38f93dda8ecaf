//! Remote endpoint identities.
//!
//! A [`RemoteAddress`] is the stable (host, endpoint) identity channels are
//! associated with; it outlives any individual channel instance across
//! reconnects. The registry assigns each remote a stream id used to tag its
//! frames on the shared send buffer, and tracks connect attempts so retries
//! are observable.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Stable identity of a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteAddress {
    host: String,
    port: u16,
}

impl RemoteAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registry-owned state for one remote, shared with the conductor.
pub(crate) struct RemoteState {
    pub(crate) address: RemoteAddress,
    pub(crate) stream_id: u32,
    connect_attempts: AtomicUsize,
}

impl RemoteState {
    pub(crate) fn record_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Relaxed)
    }
}

/// Address registry keyed by remote identity; stream ids are assigned once
/// per remote and stay stable across reconnects.
pub(crate) struct RemoteRegistry {
    remotes: DashMap<RemoteAddress, Arc<RemoteState>>,
    next_stream_id: AtomicUsize,
}

impl RemoteRegistry {
    pub(crate) fn new() -> Self {
        Self {
            remotes: DashMap::new(),
            // Stream id zero is reserved for frames without a channel.
            next_stream_id: AtomicUsize::new(1),
        }
    }

    pub(crate) fn register(&self, address: RemoteAddress) -> Arc<RemoteState> {
        self.remotes
            .entry(address.clone())
            .or_insert_with(|| {
                let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed) as u32;
                Arc::new(RemoteState {
                    address,
                    stream_id,
                    connect_attempts: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    pub(crate) fn get(&self, address: &RemoteAddress) -> Option<Arc<RemoteState>> {
        self.remotes.get(address).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_are_stable_across_re_registration() {
        let registry = RemoteRegistry::new();
        let first = registry.register(RemoteAddress::new("broker-0", 26501));
        let again = registry.register(RemoteAddress::new("broker-0", 26501));
        let other = registry.register(RemoteAddress::new("broker-1", 26501));

        assert_eq!(first.stream_id, again.stream_id);
        assert_ne!(first.stream_id, other.stream_id);
    }
}
