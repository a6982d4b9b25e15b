//! HTTP side channel of the decode feed server.
//!
//! Besides the decode stream itself, the feed server accepts two small JSON
//! requests: the operator's band (`POST /band`) and the receiver's position
//! (`POST /gps`). Both are advisory; callers log failures and carry on.

use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::decode::Band;
use crate::grid::Coordinate;

/// Timeout applied to every side-channel request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Value of the `source` field in position uploads.
pub const POSITION_SOURCE: &str = "ft8_feed";

/// Errors from side-channel requests.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response status: {0}")]
    Status(StatusCode),
}

#[derive(Debug, Serialize)]
struct BandRequest<'a> {
    band: &'a str,
}

#[derive(Debug, Serialize)]
struct PositionRequest<'a> {
    latitude: f64,
    longitude: f64,
    timestamp: i64,
    source: &'a str,
}

/// Client for the feed server's side-channel endpoints.
#[derive(Debug, Clone)]
pub struct FeedApi {
    base_url: String,
    http: reqwest::Client,
}

impl FeedApi {
    /// Create a client for the server at `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(host, port, http))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(host: &str, port: u16, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url(host, port),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Tell the feed which band the operator is on.
    pub async fn announce_band(&self, band: Band) -> Result<(), ApiError> {
        let url = format!("{}/band", self.base_url);
        debug!("Announcing band {} to {}", band, url);
        let body = BandRequest {
            band: band.as_str(),
        };
        self.post(&url, &body).await
    }

    /// Upload the receiver position.
    pub async fn upload_position(&self, position: Coordinate) -> Result<(), ApiError> {
        let url = format!("{}/gps", self.base_url);
        debug!("Uploading position {} to {}", position, url);
        let body = PositionRequest {
            latitude: position.latitude,
            longitude: position.longitude,
            timestamp: Utc::now().timestamp(),
            source: POSITION_SOURCE,
        };
        self.post(&url, &body).await
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), ApiError> {
        let response = self.http.post(url).json(body).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ApiError::Status(status)),
        }
    }
}

/// `http://host:port`, bracketing bare IPv6 addresses.
pub fn base_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}
