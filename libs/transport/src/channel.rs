//! Channel state machine and lifecycle listeners.

use std::sync::Arc;

use bytes::BytesMut;

use crate::address::{RemoteAddress, RemoteState};
use crate::media::Media;

/// Channel lifecycle: CONNECTING → OPEN → CLOSING → CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle notifications, invoked from conductor context. Implementations
/// must not block.
pub trait ChannelListener: Send + Sync {
    fn on_opened(&self, remote: &RemoteAddress);
    fn on_closed(&self, remote: &RemoteAddress);
}

/// One connection bound to a remote, owned exclusively by the conductor.
pub(crate) struct Channel {
    pub(crate) remote: Arc<RemoteState>,
    pub(crate) state: ChannelState,
    pub(crate) media: Option<Box<dyn Media>>,
    /// Accumulates inbound bytes until whole frames can be decoded.
    pub(crate) read_buffer: BytesMut,
    /// Frames drained from the send subscription awaiting media capacity.
    pub(crate) write_buffer: BytesMut,
    /// Monotonic deadline before which no reconnect is attempted.
    pub(crate) next_attempt_ns: u64,
    opened_notified: bool,
    closed_notified: bool,
}

impl Channel {
    pub(crate) fn connecting(remote: Arc<RemoteState>) -> Self {
        Self {
            remote,
            state: ChannelState::Connecting,
            media: None,
            read_buffer: BytesMut::new(),
            write_buffer: BytesMut::new(),
            next_attempt_ns: 0,
            opened_notified: false,
            closed_notified: false,
        }
    }

    pub(crate) fn open(remote: Arc<RemoteState>, media: Box<dyn Media>) -> Self {
        Self {
            remote,
            state: ChannelState::Open,
            media: Some(media),
            read_buffer: BytesMut::new(),
            write_buffer: BytesMut::new(),
            next_attempt_ns: 0,
            opened_notified: false,
            closed_notified: false,
        }
    }

    pub(crate) fn address(&self) -> &RemoteAddress {
        &self.remote.address
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// True exactly once, when the channel first reaches OPEN.
    pub(crate) fn take_opened_notification(&mut self) -> bool {
        if self.state == ChannelState::Open && !self.opened_notified {
            self.opened_notified = true;
            return true;
        }
        false
    }

    /// True exactly once, when a previously opened channel reaches CLOSED.
    pub(crate) fn take_closed_notification(&mut self) -> bool {
        if self.state == ChannelState::Closed && self.opened_notified && !self.closed_notified {
            self.closed_notified = true;
            return true;
        }
        false
    }

    /// Begins teardown; the media is shut down so the peer observes end of
    /// stream, then the channel settles in CLOSED.
    pub(crate) fn begin_close(&mut self) {
        match self.state {
            ChannelState::Connecting => {
                // Never opened: nothing to tear down and nothing to notify.
                self.state = ChannelState::Closed;
            }
            ChannelState::Open => {
                self.state = ChannelState::Closing;
                if let Some(media) = self.media.as_mut() {
                    media.shutdown();
                }
                self.media = None;
                self.state = ChannelState::Closed;
            }
            ChannelState::Closing | ChannelState::Closed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::RemoteRegistry;

    fn remote() -> Arc<RemoteState> {
        RemoteRegistry::new().register(RemoteAddress::new("peer", 9000))
    }

    #[test]
    fn opened_notification_fires_exactly_once() {
        let mut channel = Channel::connecting(remote());
        assert!(!channel.take_opened_notification());

        channel.state = ChannelState::Open;
        assert!(channel.take_opened_notification());
        assert!(!channel.take_opened_notification());
    }

    #[test]
    fn closed_notification_requires_a_prior_open() {
        let mut channel = Channel::connecting(remote());
        channel.begin_close();
        assert_eq!(channel.state, ChannelState::Closed);
        // Never opened, so closing is silent.
        assert!(!channel.take_closed_notification());

        let mut opened = Channel::connecting(remote());
        opened.state = ChannelState::Open;
        assert!(opened.take_opened_notification());
        opened.begin_close();
        assert!(opened.take_closed_notification());
        assert!(!opened.take_closed_notification());
    }
}
