//! Test doubles for transport consumers.

use parking_lot::Mutex;

use crate::address::RemoteAddress;
use crate::channel::ChannelListener;

/// Records every lifecycle notification it receives, for assertions.
#[derive(Default)]
pub struct RecordingChannelListener {
    opened: Mutex<Vec<RemoteAddress>>,
    closed: Mutex<Vec<RemoteAddress>>,
}

impl RecordingChannelListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<RemoteAddress> {
        self.opened.lock().clone()
    }

    pub fn closed(&self) -> Vec<RemoteAddress> {
        self.closed.lock().clone()
    }
}

impl ChannelListener for RecordingChannelListener {
    fn on_opened(&self, remote: &RemoteAddress) {
        self.opened.lock().push(remote.clone());
    }

    fn on_closed(&self, remote: &RemoteAddress) {
        self.closed.lock().push(remote.clone());
    }
}
