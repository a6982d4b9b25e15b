//! Streaming client for a decode feed.
//!
//! The client keeps one background task connected to the feed, parses every
//! line it receives and adds the resulting records to a [`DecodeStore`].
//! Failures never end the task: it waits a fixed delay and reconnects to the
//! same endpoint until [`StreamClient::stop`] is called.
//!
//! ```text
//! Idle ─start─▶ Connecting ──▶ Streaming ──(EOF / error)──▶ Retrying
//!                   ▲                                          │
//!                   └──────────────(fixed delay)───────────────┘
//! any state ─stop─▶ Stopped
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::decode::Band;
use crate::parser::{ParseOptions, parse_decode_with};
use crate::store::DecodeStore;
use crate::transport::{Endpoint, LineSource, Transport, TransportError};

/// Delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the status event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Delay between a failure and the next connection attempt.
    pub reconnect_delay: Duration,

    /// Parser behavior for incoming lines.
    pub parse_options: ParseOptions,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            parse_options: ParseOptions::default(),
        }
    }
}

/// Lifecycle of the client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    Retrying,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Advisory status updates from the client.
///
/// The `Display` form is meant to be shown to the operator as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection attempt started.
    Connecting(Endpoint),

    /// The feed is connected and streaming.
    Connected(Endpoint),

    /// The attempt or the stream failed.
    ConnectionFailed(String),

    /// The feed closed the stream.
    Disconnected(String),

    /// Waiting before the next attempt.
    Retrying(Duration),

    /// The side channel accepted the band.
    BandAnnounced(Band),

    /// The side channel rejected the band or could not be reached.
    BandAnnouncementFailed(String),

    /// The client was stopped.
    Stopped,
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEvent::Connecting(endpoint) => write!(f, "Connecting to {}", endpoint),
            StreamEvent::Connected(endpoint) => write!(f, "Connected to {}", endpoint),
            StreamEvent::ConnectionFailed(cause) => write!(f, "Connection failed: {}", cause),
            StreamEvent::Disconnected(reason) => write!(f, "Disconnected: {}", reason),
            StreamEvent::Retrying(delay) => {
                write!(f, "Reconnecting in {} seconds", delay.as_secs())
            }
            StreamEvent::BandAnnounced(band) => write!(f, "Band set to {}", band),
            StreamEvent::BandAnnouncementFailed(cause) => {
                write!(f, "Band announcement failed: {}", cause)
            }
            StreamEvent::Stopped => write!(f, "Stopped"),
        }
    }
}

/// The running connection loop.
struct Worker {
    endpoint: Endpoint,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Ask the loop to stop and wait until it has.
    async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            error!("Stream worker for {} panicked: {}", self.endpoint, e);
        }
    }
}

/// Decode feed client with automatic reconnect.
pub struct StreamClient<T: Transport> {
    transport: Arc<T>,
    store: Arc<DecodeStore>,
    config: StreamClientConfig,
    band: watch::Receiver<Option<Band>>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::Sender<StreamEvent>,
    worker: Mutex<Option<Worker>>,
}

impl<T: Transport> StreamClient<T> {
    /// Create an idle client.
    ///
    /// `band` is read at every connection so band changes apply on the next
    /// (re)connect. Returns the client and the receiver for its status
    /// events; dropping the receiver is fine.
    pub fn new(
        transport: T,
        store: Arc<DecodeStore>,
        band: watch::Receiver<Option<Band>>,
        config: StreamClientConfig,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Idle);

        let client = Self {
            transport: Arc::new(transport),
            store,
            config,
            band,
            state: Arc::new(state),
            events,
            worker: Mutex::new(None),
        };
        (client, events_rx)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> &Arc<DecodeStore> {
        &self.store
    }

    /// Endpoint of the running connection loop, if any.
    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.worker.lock().await.as_ref().map(|w| w.endpoint.clone())
    }

    /// Start streaming from `endpoint`.
    ///
    /// Any previous connection loop is stopped first, so the newest call
    /// always wins and at most one loop runs.
    pub async fn start(&self, endpoint: Endpoint) {
        let mut worker = self.worker.lock().await;
        if let Some(previous) = worker.take() {
            debug!("Replacing stream to {}", previous.endpoint);
            previous.shutdown().await;
        }

        info!("Starting stream to {}", endpoint);
        self.state.send_replace(ConnectionState::Connecting);

        let (stop_tx, stop_rx) = watch::channel(false);
        let session = Session {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            band: self.band.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            endpoint: endpoint.clone(),
        };
        let handle = tokio::spawn(session.run(stop_rx));

        *worker = Some(Worker {
            endpoint,
            stop_tx,
            handle,
        });
    }

    /// Stop streaming.
    ///
    /// Cancels any in-flight connect, read or retry delay and closes the
    /// transport. Once this returns no further records reach the store.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(running) = worker.take() {
            info!("Stopping stream to {}", running.endpoint);
            running.shutdown().await;
        }
        self.state.send_replace(ConnectionState::Stopped);
    }
}

impl<T: Transport> Drop for StreamClient<T> {
    fn drop(&mut self) {
        if let Some(running) = self.worker.get_mut().take() {
            let _ = running.stop_tx.send(true);
            running.handle.abort();
        }
    }
}

/// Everything the connection loop needs, owned by its task.
struct Session<T: Transport> {
    transport: Arc<T>,
    store: Arc<DecodeStore>,
    config: StreamClientConfig,
    band: watch::Receiver<Option<Band>>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::Sender<StreamEvent>,
    endpoint: Endpoint,
}

/// Resolves once a stop is requested or the client is gone.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

impl<T: Transport> Session<T> {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Status events are advisory: drop them rather than block the loop.
    fn emit(&self, event: StreamEvent) {
        debug!("Status: {}", event);
        let _ = self.events.try_send(event);
    }

    /// Run the connection loop until stopped.
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            self.emit(StreamEvent::Connecting(self.endpoint.clone()));

            let outcome = tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => break,
                outcome = self.connect_and_stream() => outcome,
            };

            match outcome {
                Ok(()) => {
                    info!("Stream from {} ended", self.endpoint);
                    self.emit(StreamEvent::Disconnected("end of stream".to_string()));
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.endpoint, e);
                    self.emit(StreamEvent::ConnectionFailed(e.to_string()));
                }
            }

            self.set_state(ConnectionState::Retrying);
            self.emit(StreamEvent::Retrying(self.config.reconnect_delay));
            info!(
                "Reconnecting in {} seconds...",
                self.config.reconnect_delay.as_secs()
            );

            tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Stopped);
        self.emit(StreamEvent::Stopped);
        debug!("Stream worker for {} exited", self.endpoint);
    }

    /// Connect, announce the band, then forward lines until the stream ends.
    async fn connect_and_stream(&self) -> Result<(), TransportError> {
        info!("Connecting to {}...", self.endpoint);
        let mut lines = self.transport.connect(&self.endpoint).await?;

        self.announce_band().await;

        info!("Connected to {}", self.endpoint);
        self.set_state(ConnectionState::Streaming);
        self.emit(StreamEvent::Connected(self.endpoint.clone()));

        while let Some(line) = lines.next_line().await? {
            debug!("Received: {}", line);
            if let Some(record) = parse_decode_with(line.as_str(), self.config.parse_options) {
                self.store.add(record);
            }
        }

        Ok(())
    }

    /// Push the selected band to the side channel. Failures are logged only.
    async fn announce_band(&self) {
        let band = *self.band.borrow();
        let Some(band) = band else {
            debug!("No band selected, skipping announcement");
            return;
        };

        match self.transport.announce_band(&self.endpoint, band).await {
            Ok(()) => {
                info!("Band information sent: {}", band);
                self.emit(StreamEvent::BandAnnounced(band));
            }
            Err(e) => {
                warn!("Failed to send band information: {}", e);
                self.emit(StreamEvent::BandAnnouncementFailed(e.to_string()));
            }
        }
    }
}
