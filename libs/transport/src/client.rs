//! Client-side transport: outbound channels with retrying connects.

use std::sync::Arc;
use std::time::Duration;

use dispatch::Dispatcher;
use runtime::{Scheduler, TaskHandle};
use tracing::warn;

use crate::address::RemoteAddress;
use crate::channel::ChannelListener;
use crate::conductor::{Command, Completion, Conductor, MessageHandler, TransportShared};
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::media::Connector;
use crate::output::TransportOutput;

const CLOSE_ALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound transport front-end. All lifecycle work happens on the conductor
/// task; this handle only enqueues commands and reads observable state.
pub struct ClientTransport {
    shared: Arc<TransportShared>,
    send_buffer: Dispatcher,
    conductor: TaskHandle,
}

impl ClientTransport {
    pub fn builder() -> ClientTransportBuilder {
        ClientTransportBuilder {
            name: "client-transport".to_string(),
            config: TransportConfig::default(),
            send_buffer: None,
            connector: None,
            handler: None,
        }
    }

    /// Registers (or looks up) the remote and ensures a channel is being
    /// opened towards it. Returns the stream id that tags the remote's frames
    /// on the send buffer.
    pub fn register_remote(&self, address: RemoteAddress) -> u32 {
        let remote = self.shared.registry.register(address);
        let stream_id = remote.stream_id;
        self.shared.enqueue(Command::RegisterRemote(remote));
        stream_id
    }

    /// Stream id previously assigned to `address`, if registered.
    pub fn stream_id(&self, address: &RemoteAddress) -> Option<u32> {
        self.shared
            .registry
            .get(address)
            .map(|remote| remote.stream_id)
    }

    /// Connect attempts recorded for `address` so far; observable for tests
    /// and operations.
    pub fn connect_attempts(&self, address: &RemoteAddress) -> usize {
        self.shared
            .registry
            .get(address)
            .map(|remote| remote.attempts())
            .unwrap_or(0)
    }

    pub fn register_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.shared.enqueue(Command::RegisterListener(listener));
    }

    pub fn remove_channel_listener(&self, listener: &Arc<dyn ChannelListener>) {
        self.shared
            .enqueue(Command::RemoveListener(Arc::clone(listener)));
    }

    /// Closes one remote's channel, if any.
    pub fn close_channel(&self, address: &RemoteAddress) {
        if let Some(remote) = self.shared.registry.get(address) {
            self.shared.enqueue(Command::Close {
                stream_id: remote.stream_id,
            });
        }
    }

    /// Closes every channel and returns once the conductor has finished the
    /// teardown, including closed notifications to still-registered
    /// listeners.
    pub fn close_all_channels(&self) {
        let completion = Completion::new();
        self.shared.enqueue(Command::CloseAll {
            completion: Arc::clone(&completion),
        });
        if !completion.wait(CLOSE_ALL_TIMEOUT) {
            warn!("timed out waiting for channels to close");
        }
    }

    /// Writer for emitting messages into the send buffer from outside the
    /// scheduler's own tasks.
    pub fn output(&self) -> TransportOutput {
        TransportOutput::new(
            self.send_buffer.clone(),
            self.shared.config.max_message_size,
        )
    }

    /// Stops the conductor; channels close cooperatively on its next quantum.
    pub fn close(self) {
        self.conductor.cancel();
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.conductor.cancel();
    }
}

pub struct ClientTransportBuilder {
    name: String,
    config: TransportConfig,
    send_buffer: Option<Dispatcher>,
    connector: Option<Box<dyn Connector>>,
    handler: Option<Box<dyn MessageHandler>>,
}

impl ClientTransportBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatcher backing this transport's outbound frames.
    pub fn send_buffer(mut self, dispatcher: Dispatcher) -> Self {
        self.send_buffer = Some(dispatcher);
        self
    }

    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Handler for inbound frames (responses and follow-up requests).
    pub fn message_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Schedules the conductor and returns the transport front-end.
    pub fn build(self, scheduler: &Scheduler) -> Result<ClientTransport> {
        let send_buffer = self
            .send_buffer
            .ok_or_else(|| TransportError::configuration("client transport needs a send buffer"))?;
        let connector = self
            .connector
            .ok_or_else(|| TransportError::configuration("client transport needs a connector"))?;

        let shared = TransportShared::new(self.config);
        let subscription = send_buffer.open_subscription(format!("{}-sender", self.name));
        let conductor = Conductor::new(
            self.name,
            Arc::clone(&shared),
            subscription,
            Some(connector),
            None,
            self.handler,
        );
        let handle = scheduler.submit(conductor)?;

        Ok(ClientTransport {
            shared,
            send_buffer,
            conductor: handle,
        })
    }
}
