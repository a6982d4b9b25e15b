//! Control surface for the decode pipeline.
//!
//! [`DecodeService`] owns the store and the stream client and holds the
//! operator's selections (band, receiver position). A front end drives it
//! either through the methods directly or by sending [`Command`]s.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{FeedApi, REQUEST_TIMEOUT};
use crate::client::{ConnectionState, StreamClient, StreamClientConfig, StreamEvent};
use crate::decode::{Band, DecodeRecord};
use crate::grid::Coordinate;
use crate::store::DecodeStore;
use crate::transport::{Endpoint, FeedTransport, Transport};

/// Default period of the position uploader.
pub const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest period the position uploader accepts.
pub const MIN_UPLOAD_INTERVAL: Duration = Duration::from_secs(1);

/// Requests a front end can make of the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { host: String, port: u16 },
    Stop,
    SelectBand(Option<Band>),
    Clear,
    UpdatePosition(Option<Coordinate>),
}

/// Decode ingestion service.
pub struct DecodeService<T: Transport = FeedTransport> {
    store: Arc<DecodeStore>,
    client: StreamClient<T>,
    band: watch::Sender<Option<Band>>,
    position: watch::Sender<Option<Coordinate>>,
    endpoint: watch::Sender<Option<Endpoint>>,
}

impl<T: Transport> DecodeService<T> {
    /// Create a stopped service with an empty store.
    pub fn new(transport: T, config: StreamClientConfig) -> (Self, mpsc::Receiver<StreamEvent>) {
        Self::with_store(transport, Arc::new(DecodeStore::new()), config)
    }

    /// Create a service around an existing store.
    pub fn with_store(
        transport: T,
        store: Arc<DecodeStore>,
        config: StreamClientConfig,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (band, band_rx) = watch::channel(None);
        let (client, events) = StreamClient::new(transport, Arc::clone(&store), band_rx, config);

        let service = Self {
            store,
            client,
            band,
            position: watch::channel(None).0,
            endpoint: watch::channel(None).0,
        };
        (service, events)
    }

    pub fn store(&self) -> &Arc<DecodeStore> {
        &self.store
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.client.subscribe_state()
    }

    /// Start (or restart) streaming from `host:port`.
    pub async fn start(&self, host: impl Into<String>, port: u16) {
        let endpoint = Endpoint::new(host, port);
        self.endpoint.send_replace(Some(endpoint.clone()));
        self.client.start(endpoint).await;
    }

    /// Stop streaming. Safe to call when already stopped.
    pub async fn stop(&self) {
        self.client.stop().await;
        self.endpoint.send_replace(None);
    }

    /// Empty the store and notify observers.
    pub fn clear(&self) {
        info!("Clearing {} decodes", self.store.len());
        self.store.clear();
    }

    /// Select the band announced on the next connection.
    pub fn select_band(&self, band: Option<Band>) {
        match band {
            Some(band) => info!("Selected band {}", band),
            None => info!("Band selection cleared"),
        }
        self.band.send_replace(band);
    }

    pub fn selected_band(&self) -> Option<Band> {
        *self.band.borrow()
    }

    /// Update the receiver position used for distances and uploads.
    pub fn update_position(&self, position: Option<Coordinate>) {
        debug!("Receiver position: {:?}", position);
        self.position.send_replace(position);
    }

    pub fn position(&self) -> Option<Coordinate> {
        *self.position.borrow()
    }

    /// Distance in km from the receiver to the record's grid, when both are
    /// known.
    pub fn distance_to(&self, record: &DecodeRecord) -> Option<f64> {
        record.distance_km_from(self.position()?)
    }

    /// Apply one front-end command.
    pub async fn handle(&self, command: Command) {
        match command {
            Command::Start { host, port } => self.start(host, port).await,
            Command::Stop => self.stop().await,
            Command::SelectBand(band) => self.select_band(band),
            Command::Clear => self.clear(),
            Command::UpdatePosition(position) => self.update_position(position),
        }
    }

    /// Periodically upload the receiver position to the current endpoint.
    ///
    /// Ticks with no known position or while stopped are skipped. Failures
    /// are logged. The task ends when the service is dropped. Periods below
    /// [`MIN_UPLOAD_INTERVAL`] are raised to it.
    pub fn spawn_position_uploader(&self, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(MIN_UPLOAD_INTERVAL);
        let position = self.position.subscribe();
        let endpoint = self.endpoint.subscribe();

        tokio::spawn(async move {
            let http = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
                Ok(http) => http,
                Err(e) => {
                    error!("Position uploader disabled: {}", e);
                    return;
                }
            };

            info!("Uploading position every {} seconds", interval.as_secs());
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if endpoint.has_changed().is_err() {
                    break;
                }

                let target = endpoint.borrow().clone();
                let current = *position.borrow();
                let (Some(target), Some(current)) = (target, current) else {
                    debug!("Skipping position upload");
                    continue;
                };

                let api = FeedApi::with_client(&target.host, target.port, http.clone());
                match api.upload_position(current).await {
                    Ok(()) => debug!("Uploaded position {} to {}", current, target),
                    Err(e) => warn!("Position upload to {} failed: {}", target, e),
                }
            }
            debug!("Position uploader exited");
        })
    }
}
