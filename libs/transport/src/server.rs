//! Server-side transport: inbound channels from an acceptor.

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
use crate::media::MediaListener;
use crate::output::TransportOutput;

const CLOSE_ALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound transport front-end. Channels appear as peers connect and close
/// when either side tears the connection down.
pub struct ServerTransport {
    shared: Arc<TransportShared>,
    send_buffer: Dispatcher,
    conductor: TaskHandle,
}

impl ServerTransport {
    pub fn builder() -> ServerTransportBuilder {
        ServerTransportBuilder {
            name: "server-transport".to_string(),
            config: TransportConfig::default(),
            send_buffer: None,
            acceptor: None,
            handler: None,
        }
    }

    /// Stream id assigned to a connected peer, for addressing responses.
    pub fn stream_id(&self, address: &RemoteAddress) -> Option<u32> {
        self.shared
            .registry
            .get(address)
            .map(|remote| remote.stream_id)
    }

    pub fn register_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.shared.enqueue(Command::RegisterListener(listener));
    }

    pub fn remove_channel_listener(&self, listener: &Arc<dyn ChannelListener>) {
        self.shared
            .enqueue(Command::RemoveListener(Arc::clone(listener)));
    }

    /// Closes every accepted channel and returns once the conductor has
    /// finished the teardown.
    pub fn close_all_channels(&self) {
        let completion = Completion::new();
        self.shared.enqueue(Command::CloseAll {
            completion: Arc::clone(&completion),
        });
        if !completion.wait(CLOSE_ALL_TIMEOUT) {
            warn!("timed out waiting for channels to close");
        }
    }

    pub fn output(&self) -> TransportOutput {
        TransportOutput::new(
            self.send_buffer.clone(),
            self.shared.config.max_message_size,
        )
    }

    pub fn close(self) {
        self.conductor.cancel();
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        self.conductor.cancel();
    }
}

pub struct ServerTransportBuilder {
    name: String,
    config: TransportConfig,
    send_buffer: Option<Dispatcher>,
    acceptor: Option<Box<dyn MediaListener>>,
    handler: Option<Box<dyn MessageHandler>>,
}

impl ServerTransportBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn send_buffer(mut self, dispatcher: Dispatcher) -> Self {
        self.send_buffer = Some(dispatcher);
        self
    }

    /// Accept source for inbound connections.
    pub fn acceptor(mut self, acceptor: impl MediaListener + 'static) -> Self {
        self.acceptor = Some(Box::new(acceptor));
        self
    }

    /// Handler for inbound frames (requests from clients).
    pub fn message_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn build(self, scheduler: &Scheduler) -> Result<ServerTransport> {
        let send_buffer = self
            .send_buffer
            .ok_or_else(|| TransportError::configuration("server transport needs a send buffer"))?;
        let acceptor = self
            .acceptor
            .ok_or_else(|| TransportError::configuration("server transport needs an acceptor"))?;

        let shared = TransportShared::new(self.config);
        let subscription = send_buffer.open_subscription(format!("{}-sender", self.name));
        let conductor = Conductor::new(
            self.name,
            Arc::clone(&shared),
            subscription,
            None,
            Some(acceptor),
            self.handler,
        );
        let handle = scheduler.submit(conductor)?;

        Ok(ServerTransport {
            shared,
            send_buffer,
            conductor: handle,
        })
    }
}
