//! The conductor: one scheduler task owning all channel lifecycle state.
//!
//! Registration, deregistration and close requests from other threads are
//! submitted through a command queue the conductor drains once per duty
//! cycle; no lifecycle state is ever touched from outside the task. Each
//! cycle also drives pending connects (with backoff), pumps the shared send
//! buffer into per-channel write queues demultiplexed by stream id, flushes
//! writes, and decodes inbound bytes back into frames for the registered
//! message handler.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut};
use dispatch::frame::{FRAME_VERSION, STREAM_ID_OFFSET, TYPE_OFFSET};
use dispatch::{Fragment, FrameType, Subscription, HEADER_LENGTH};
use parking_lot::{Condvar, Mutex};
use runtime::{Task, TaskContext, Transition};
use tracing::{debug, info, warn};

use crate::address::{RemoteRegistry, RemoteState};
use crate::channel::{Channel, ChannelListener, ChannelState};
use crate::config::TransportConfig;
use crate::media::{Connector, MediaListener};

/// Inbound message callback, invoked from conductor context. Must not block.
pub trait MessageHandler: Send {
    fn on_message(&mut self, remote: &crate::RemoteAddress, stream_id: u32, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: FnMut(&crate::RemoteAddress, u32, &[u8]) + Send,
{
    fn on_message(&mut self, remote: &crate::RemoteAddress, stream_id: u32, payload: &[u8]) {
        self(remote, stream_id, payload)
    }
}

/// Blocking acknowledgement for commands that callers wait on.
pub(crate) struct Completion {
    done: Mutex<bool>,
    signalled: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(false),
            signalled: Condvar::new(),
        })
    }

    pub(crate) fn signal(&self) {
        *self.done.lock() = true;
        self.signalled.notify_all();
    }

    /// Waits for the signal; false when the timeout elapsed first.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.signalled.wait_for(&mut done, timeout);
        }
        *done
    }
}

pub(crate) enum Command {
    RegisterRemote(Arc<RemoteState>),
    RegisterListener(Arc<dyn ChannelListener>),
    RemoveListener(Arc<dyn ChannelListener>),
    Close { stream_id: u32 },
    CloseAll { completion: Arc<Completion> },
}

/// State shared between a transport front-end and its conductor task.
pub(crate) struct TransportShared {
    pub(crate) commands: Mutex<VecDeque<Command>>,
    pub(crate) registry: RemoteRegistry,
    pub(crate) config: TransportConfig,
}

impl TransportShared {
    pub(crate) fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(VecDeque::new()),
            registry: RemoteRegistry::new(),
            config,
        })
    }

    pub(crate) fn enqueue(&self, command: Command) {
        self.commands.lock().push_back(command);
    }
}

pub(crate) struct Conductor {
    name: String,
    shared: Arc<TransportShared>,
    send_subscription: Subscription,
    connector: Option<Box<dyn Connector>>,
    acceptor: Option<Box<dyn MediaListener>>,
    handler: Option<Box<dyn MessageHandler>>,
    listeners: Vec<Arc<dyn ChannelListener>>,
    channels: Vec<Channel>,
    read_chunk: Vec<u8>,
    finished_completions: Vec<Arc<Completion>>,
}

impl Conductor {
    pub(crate) fn new(
        name: String,
        shared: Arc<TransportShared>,
        send_subscription: Subscription,
        connector: Option<Box<dyn Connector>>,
        acceptor: Option<Box<dyn MediaListener>>,
        handler: Option<Box<dyn MessageHandler>>,
    ) -> Self {
        let read_chunk = vec![0u8; shared.config.read_chunk_size];
        Self {
            name,
            shared,
            send_subscription,
            connector,
            acceptor,
            handler,
            listeners: Vec::new(),
            channels: Vec::new(),
            read_chunk,
            finished_completions: Vec::new(),
        }
    }

    fn drain_commands(&mut self) -> bool {
        let mut progressed = false;
        loop {
            let Some(command) = self.shared.commands.lock().pop_front() else {
                break;
            };
            progressed = true;
            match command {
                Command::RegisterRemote(remote) => {
                    let already_tracked = self
                        .channels
                        .iter()
                        .any(|channel| channel.remote.stream_id == remote.stream_id);
                    if !already_tracked {
                        debug!(
                            transport = %self.name,
                            remote = %remote.address,
                            "tracking remote, opening channel"
                        );
                        self.channels.push(Channel::connecting(remote));
                    }
                }
                Command::RegisterListener(listener) => self.listeners.push(listener),
                Command::RemoveListener(listener) => {
                    // Compare data pointers only; vtable pointers for the
                    // same listener can differ between codegen units.
                    let target = Arc::as_ptr(&listener) as *const ();
                    self.listeners
                        .retain(|registered| Arc::as_ptr(registered) as *const () != target);
                }
                Command::Close { stream_id } => {
                    for channel in &mut self.channels {
                        if channel.remote.stream_id == stream_id {
                            channel.begin_close();
                        }
                    }
                }
                Command::CloseAll { completion } => {
                    for channel in &mut self.channels {
                        channel.begin_close();
                    }
                    self.finished_completions.push(completion);
                }
            }
        }
        progressed
    }

    fn accept_inbound(&mut self) -> bool {
        let Some(acceptor) = self.acceptor.as_mut() else {
            return false;
        };
        let mut progressed = false;
        loop {
            match acceptor.try_accept() {
                Ok(Some((peer, media))) => {
                    let remote = self.shared.registry.register(peer);
                    info!(transport = %self.name, remote = %remote.address, "accepted channel");
                    self.channels.push(Channel::open(remote, media));
                    progressed = true;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(transport = %self.name, %err, "accept failed");
                    break;
                }
            }
        }
        progressed
    }

    fn drive_connects(&mut self, now_ns: u64) -> bool {
        let Some(connector) = self.connector.as_mut() else {
            return false;
        };
        let mut progressed = false;
        for channel in &mut self.channels {
            if channel.state != ChannelState::Connecting || now_ns < channel.next_attempt_ns {
                continue;
            }
            channel.remote.record_attempt();
            progressed = true;
            match connector.connect(channel.address()) {
                Ok(media) => {
                    info!(
                        transport = %self.name,
                        remote = %channel.remote.address,
                        "channel connected"
                    );
                    channel.media = Some(media);
                    channel.state = ChannelState::Open;
                }
                Err(err) => {
                    let failed = channel.remote.attempts();
                    let delay = self.shared.config.retry.delay_for(failed);
                    debug!(
                        transport = %self.name,
                        remote = %channel.remote.address,
                        attempt = failed,
                        retry_in_ms = delay.as_millis() as u64,
                        %err,
                        "connect failed, backing off"
                    );
                    channel.next_attempt_ns = now_ns.saturating_add(delay.as_nanos() as u64);
                }
            }
        }
        progressed
    }

    /// Drains the shared send buffer, routing each frame to its channel's
    /// write queue by stream id. Frames for unknown streams are dropped.
    fn pump_send_buffer(&mut self) -> bool {
        let channels = &mut self.channels;
        let name = &self.name;
        let drained = self.send_subscription.poll(
            &mut |fragment: Fragment<'_>| {
                let target = channels.iter_mut().find(|channel| {
                    channel.remote.stream_id == fragment.stream_id
                        && channel.state != ChannelState::Closed
                });
                match target {
                    Some(channel) => {
                        let framed = (HEADER_LENGTH + fragment.payload.len()) as i32;
                        let queue = &mut channel.write_buffer;
                        queue.put_i32_ne(framed);
                        queue.put_u8(FRAME_VERSION);
                        queue.put_u8(0);
                        queue.put_u16_ne(FrameType::Message.into());
                        queue.put_u32_ne(fragment.stream_id);
                        queue.put_slice(fragment.payload);
                    }
                    None => {
                        debug!(
                            transport = %name,
                            stream_id = fragment.stream_id,
                            "dropping frame for unknown stream"
                        );
                    }
                }
            },
            64,
        );
        drained > 0
    }

    fn flush_writes(&mut self) -> bool {
        let mut progressed = false;
        for channel in &mut self.channels {
            if !channel.is_open() || channel.write_buffer.is_empty() {
                continue;
            }
            let Some(media) = channel.media.as_mut() else {
                continue;
            };
            match media.try_write(&channel.write_buffer) {
                Ok(0) => {}
                Ok(written) => {
                    channel.write_buffer.advance(written);
                    progressed = true;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    warn!(
                        transport = %self.name,
                        remote = %channel.remote.address,
                        %err,
                        "write failed, closing channel"
                    );
                    channel.begin_close();
                    progressed = true;
                }
            }
        }
        progressed
    }

    fn pump_reads(&mut self) -> bool {
        let mut progressed = false;
        for channel in &mut self.channels {
            if !channel.is_open() {
                continue;
            }
            loop {
                let Some(media) = channel.media.as_mut() else {
                    break;
                };
                match media.try_read(&mut self.read_chunk) {
                    Ok(0) => {
                        // Peer closed; our side fires its own closed
                        // notification.
                        debug!(
                            transport = %self.name,
                            remote = %channel.remote.address,
                            "peer closed channel"
                        );
                        channel.begin_close();
                        progressed = true;
                        break;
                    }
                    Ok(read) => {
                        channel.read_buffer.extend_from_slice(&self.read_chunk[..read]);
                        progressed = true;
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        warn!(
                            transport = %self.name,
                            remote = %channel.remote.address,
                            %err,
                            "read failed, closing channel"
                        );
                        channel.begin_close();
                        progressed = true;
                        break;
                    }
                }
            }
            decode_frames(&self.name, channel, self.handler.as_deref_mut());
        }
        progressed
    }

    fn fire_notifications(&mut self) {
        for channel in &mut self.channels {
            if channel.take_opened_notification() {
                info!(
                    transport = %self.name,
                    remote = %channel.remote.address,
                    "channel opened"
                );
                for listener in &self.listeners {
                    listener.on_opened(channel.address());
                }
            }
            if channel.take_closed_notification() {
                info!(
                    transport = %self.name,
                    remote = %channel.remote.address,
                    "channel closed"
                );
                for listener in &self.listeners {
                    listener.on_closed(channel.address());
                }
            }
        }
    }

    fn finish_cycle(&mut self) {
        self.channels
            .retain(|channel| channel.state != ChannelState::Closed);
        for completion in self.finished_completions.drain(..) {
            completion.signal();
        }
    }
}

impl Task for Conductor {
    fn run(&mut self, ctx: &mut TaskContext<'_>) -> Transition {
        if ctx.is_cancelled() {
            // Outstanding close requests still get their acknowledgement.
            self.drain_commands();
            for channel in &mut self.channels {
                channel.begin_close();
            }
            self.fire_notifications();
            self.finish_cycle();
            debug!(transport = %self.name, "conductor stopped");
            return Transition::Done;
        }

        let now_ns = match ctx.clock().nano_time() {
            Ok(now) => now,
            Err(_) => return Transition::Done,
        };

        let mut progressed = false;
        progressed |= self.drain_commands();
        progressed |= self.accept_inbound();
        progressed |= self.drive_connects(now_ns);
        progressed |= self.pump_send_buffer();
        progressed |= self.flush_writes();
        progressed |= self.pump_reads();
        self.fire_notifications();
        self.finish_cycle();

        if progressed {
            Transition::Yield
        } else {
            Transition::Sleep(self.shared.config.poll_interval)
        }
    }
}

/// Splits complete frames off the channel's read buffer and hands their
/// payloads to the message handler.
fn decode_frames(name: &str, channel: &mut Channel, mut handler: Option<&mut (dyn MessageHandler + '_)>) {
    loop {
        let available = channel.read_buffer.len();
        if available < 4 {
            return;
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&channel.read_buffer[..4]);
        let framed = i32::from_ne_bytes(length_bytes);
        if framed < HEADER_LENGTH as i32 {
            warn!(transport = %name, framed, "corrupt frame header, closing channel");
            channel.begin_close();
            return;
        }
        let framed = framed as usize;
        if available < framed {
            return;
        }

        let frame = channel.read_buffer.split_to(framed);

        let mut type_bytes = [0u8; 2];
        type_bytes.copy_from_slice(&frame[TYPE_OFFSET..TYPE_OFFSET + 2]);
        if u16::from_ne_bytes(type_bytes) != u16::from(FrameType::Message) {
            continue;
        }

        let mut stream_bytes = [0u8; 4];
        stream_bytes.copy_from_slice(&frame[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4]);
        let stream_id = u32::from_ne_bytes(stream_bytes);

        if let Some(handler) = handler.as_mut() {
            handler.on_message(&channel.remote.address, stream_id, &frame[HEADER_LENGTH..]);
        }
    }
}
