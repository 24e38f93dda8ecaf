//! In-process media: connected duplex pipes and an acceptor.
//!
//! The fast path for co-located components and the workhorse of the
//! lifecycle tests: a [`MemoryNetwork`] hosts named listen endpoints, and a
//! [`MemoryConnector`] produces connected [`Media`] pairs against them with
//! the same non-blocking semantics a socket-backed media has.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::address::RemoteAddress;
use crate::media::{Connector, Media, MediaListener};

/// One direction of a duplex pipe.
#[derive(Default, Debug)]
struct PipeState {
    buffer: VecDeque<u8>,
    closed: bool,
}

type Pipe = Arc<Mutex<PipeState>>;

/// Media endpoint reading from `incoming` and writing to `outgoing`.
#[derive(Debug)]
pub struct MemoryMedia {
    incoming: Pipe,
    outgoing: Pipe,
}

impl Media for MemoryMedia {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.incoming.lock();
        if pipe.buffer.is_empty() {
            if pipe.closed {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "pipe empty"));
        }
        let count = buf.len().min(pipe.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.buffer.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.outgoing.lock();
        if pipe.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer closed the pipe",
            ));
        }
        pipe.buffer.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn shutdown(&mut self) {
        self.incoming.lock().closed = true;
        self.outgoing.lock().closed = true;
    }
}

fn connected_pair() -> (MemoryMedia, MemoryMedia) {
    let a_to_b: Pipe = Arc::new(Mutex::new(PipeState::default()));
    let b_to_a: Pipe = Arc::new(Mutex::new(PipeState::default()));
    (
        MemoryMedia {
            incoming: Arc::clone(&b_to_a),
            outgoing: Arc::clone(&a_to_b),
        },
        MemoryMedia {
            incoming: a_to_b,
            outgoing: b_to_a,
        },
    )
}

type AcceptQueue = Arc<Mutex<VecDeque<(RemoteAddress, MemoryMedia)>>>;

/// Process-local namespace of listen endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<RemoteAddress, AcceptQueue>>,
    next_ephemeral: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an accept queue at `address`.
    pub fn listen(&self, address: RemoteAddress) -> MemoryAcceptor {
        let queue: AcceptQueue = Arc::new(Mutex::new(VecDeque::new()));
        self.endpoints.insert(address, Arc::clone(&queue));
        MemoryAcceptor { queue }
    }

    /// Unbinds `address`; subsequent connects are refused.
    pub fn unlisten(&self, address: &RemoteAddress) {
        self.endpoints.remove(address);
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            network: self.clone(),
        }
    }
}

/// Connects against a [`MemoryNetwork`]'s listen endpoints.
pub struct MemoryConnector {
    network: MemoryNetwork,
}

impl Connector for MemoryConnector {
    fn connect(&mut self, address: &RemoteAddress) -> io::Result<Box<dyn Media>> {
        let Some(queue) = self
            .network
            .endpoints
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no listener at {address}"),
            ));
        };

        let (client_end, server_end) = connected_pair();
        let ephemeral = self.network.next_ephemeral.fetch_add(1, Ordering::Relaxed);
        let peer = RemoteAddress::new("memory-client", ephemeral as u16);
        queue.lock().push_back((peer, server_end));
        Ok(Box::new(client_end))
    }
}

/// Accept side of a memory listen endpoint.
pub struct MemoryAcceptor {
    queue: AcceptQueue,
}

impl MediaListener for MemoryAcceptor {
    fn try_accept(&mut self) -> io::Result<Option<(RemoteAddress, Box<dyn Media>)>> {
        Ok(self
            .queue
            .lock()
            .pop_front()
            .map(|(peer, media)| (peer, Box::new(media) as Box<dyn Media>)))
    }
}
