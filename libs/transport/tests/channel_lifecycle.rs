//! Channel lifecycle integration: open/close notifications, deregistration,
//! connect retries, and end-to-end frame flow over the in-memory media.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch::{Dispatcher, DispatcherConfig};
use parking_lot::Mutex;
use runtime::{Scheduler, SchedulerConfig};
use transport::memory::MemoryNetwork;
use transport::testing::RecordingChannelListener;
use transport::{
    ChannelListener, ClientTransport, RemoteAddress, RetryConfig, ServerTransport, TransportConfig,
};

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

struct Harness {
    scheduler: Scheduler,
    network: MemoryNetwork,
    address: RemoteAddress,
}

impl Harness {
    fn new(port: u16) -> Self {
        let scheduler = Scheduler::new(SchedulerConfig {
            name: "transport-test".to_string(),
            worker_count: 3,
            idle_park: Duration::from_millis(1),
        })
        .expect("scheduler starts");

        Self {
            scheduler,
            network: MemoryNetwork::new(),
            address: RemoteAddress::new("localhost", port),
        }
    }

    fn send_buffer(&self, name: &str) -> Dispatcher {
        Dispatcher::new(DispatcherConfig::new(name, 1024 * 1024)).expect("dispatcher")
    }

    fn server(
        &self,
        handler: Option<Arc<Mutex<Vec<(RemoteAddress, u32, Vec<u8>)>>>>,
    ) -> ServerTransport {
        let mut builder = ServerTransport::builder()
            .name("server")
            .send_buffer(self.send_buffer("server-send"))
            .acceptor(self.network.listen(self.address.clone()));
        if let Some(received) = handler {
            builder = builder.message_handler(
                move |remote: &RemoteAddress, stream_id: u32, payload: &[u8]| {
                    received
                        .lock()
                        .push((remote.clone(), stream_id, payload.to_vec()));
                },
            );
        }
        builder.build(&self.scheduler).expect("server transport")
    }

    fn client(
        &self,
        handler: Option<Arc<Mutex<Vec<(RemoteAddress, u32, Vec<u8>)>>>>,
    ) -> ClientTransport {
        let mut builder = ClientTransport::builder()
            .name("client")
            .config(TransportConfig {
                retry: RetryConfig {
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(10),
                    jitter: 0.0,
                },
                ..TransportConfig::default()
            })
            .send_buffer(self.send_buffer("client-send"))
            .connector(self.network.connector());
        if let Some(received) = handler {
            builder = builder.message_handler(
                move |remote: &RemoteAddress, stream_id: u32, payload: &[u8]| {
                    received
                        .lock()
                        .push((remote.clone(), stream_id, payload.to_vec()));
                },
            );
        }
        builder.build(&self.scheduler).expect("client transport")
    }
}

#[test]
fn listeners_hear_exactly_one_opened_notification_per_side() {
    let harness = Harness::new(26501);
    let server = harness.server(None);
    let client = harness.client(None);

    let client_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    let server_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    client.register_channel_listener(client_listener.clone());
    server.register_channel_listener(server_listener.clone());

    client.register_remote(harness.address.clone());

    wait_until("client opened notification", || {
        !client_listener.opened().is_empty()
    });
    wait_until("server opened notification", || {
        !server_listener.opened().is_empty()
    });

    assert_eq!(client_listener.opened(), vec![harness.address.clone()]);
    assert_eq!(server_listener.opened().len(), 1);
    assert!(client_listener.closed().is_empty());

    drop(client);
    drop(server);
}

#[test]
fn closing_all_channels_notifies_both_sides_exactly_once() {
    let harness = Harness::new(26502);
    let server = harness.server(None);
    let client = harness.client(None);

    let client_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    let server_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    client.register_channel_listener(client_listener.clone());
    server.register_channel_listener(server_listener.clone());

    client.register_remote(harness.address.clone());
    wait_until("channel open on both sides", || {
        !client_listener.opened().is_empty() && !server_listener.opened().is_empty()
    });

    client.close_all_channels();

    wait_until("client closed notification", || {
        !client_listener.closed().is_empty()
    });
    assert_eq!(client_listener.closed(), vec![harness.address.clone()]);

    // The peer side observes the disconnect and fires its own notification.
    wait_until("server closed notification", || {
        !server_listener.closed().is_empty()
    });
    assert_eq!(server_listener.closed().len(), 1);
    assert_eq!(client_listener.closed().len(), 1);
}

#[test]
fn deregistered_listeners_receive_no_closed_notification() {
    let harness = Harness::new(26503);
    let server = harness.server(None);
    let client = harness.client(None);

    let client_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    let server_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    client.register_channel_listener(client_listener.clone());
    server.register_channel_listener(server_listener.clone());

    client.register_remote(harness.address.clone());
    wait_until("channel open on both sides", || {
        !client_listener.opened().is_empty() && !server_listener.opened().is_empty()
    });

    let client_dyn: Arc<dyn ChannelListener> = client_listener.clone();
    let server_dyn: Arc<dyn ChannelListener> = server_listener.clone();
    client.remove_channel_listener(&client_dyn);
    server.remove_channel_listener(&server_dyn);

    client.close_all_channels();
    // Give the server conductor time to observe the disconnect.
    std::thread::sleep(Duration::from_millis(50));

    assert!(client_listener.closed().is_empty());
    assert!(server_listener.closed().is_empty());
}

#[test]
fn failed_connect_fires_nothing_and_keeps_retrying() {
    let harness = Harness::new(26504);
    // No server transport: connects are refused.
    let client = harness.client(None);

    let client_listener: Arc<RecordingChannelListener> = Arc::new(RecordingChannelListener::new());
    client.register_channel_listener(client_listener.clone());

    client.register_remote(harness.address.clone());

    // At least one retry beyond the first failed attempt.
    wait_until("second connect attempt", || {
        client.connect_attempts(&harness.address) >= 2
    });
    assert!(client_listener.opened().is_empty());
    assert!(client_listener.closed().is_empty());
}

#[test]
fn frames_flow_end_to_end_and_back() {
    let harness = Harness::new(26505);
    let server_received = Arc::new(Mutex::new(Vec::new()));
    let client_received = Arc::new(Mutex::new(Vec::new()));
    let server = harness.server(Some(server_received.clone()));
    let client = harness.client(Some(client_received.clone()));

    let stream_id = client.register_remote(harness.address.clone());
    client
        .output()
        .send_message(stream_id, b"create-topic")
        .expect("queued");

    wait_until("server received the request", || {
        !server_received.lock().is_empty()
    });
    let (peer, request_stream, payload) = server_received.lock()[0].clone();
    assert_eq!(payload, b"create-topic");
    assert_eq!(request_stream, stream_id);

    // Respond over the server's channel for that peer.
    let response_stream = server.stream_id(&peer).expect("peer registered");
    server
        .output()
        .send_message(response_stream, b"topic-created")
        .expect("queued");

    wait_until("client received the response", || {
        !client_received.lock().is_empty()
    });
    let (_, _, response) = client_received.lock()[0].clone();
    assert_eq!(response, b"topic-created");
}
