//! ft8-feed - A Rust library and CLI for ingesting FT8 decodes from a network feed.
//!
//! This crate provides:
//! - A nom-based parser for timed and compact FT8 decode lines
//! - A bounded, observable store of recent decodes
//! - An async streaming client (TCP or SSE) with fixed-delay reconnect
//! - Maidenhead locator geodesy (center, distance, bearing)
//!
//! # Example
//!
//! ```rust,no_run
//! use ft8_feed::{grid::Coordinate, parser::parse_decode, store::DecodeStore};
//!
//! let store = DecodeStore::new();
//! let line = "134500 -12  0.3 1234 ~  CQ K1ABC FN42";
//! let record = parse_decode(line).expect("blank line");
//! store.add(record);
//!
//! let home = Coordinate::new(51.5, -0.1);
//! for record in store.snapshot() {
//!     println!("{}", record.display_text(Some(home), false));
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod decode;
pub mod grid;
pub mod parser;
pub mod service;
pub mod store;
pub mod transport;

pub use api::{ApiError, FeedApi};
pub use client::{ConnectionState, StreamClient, StreamClientConfig, StreamEvent};
pub use config::Config;
pub use decode::{Band, DecodeRecord};
pub use grid::{Coordinate, bearing_degrees, distance_km, format_distance, locator_to_coordinate};
pub use parser::{ParseError, ParseOptions, parse_decode, parse_decode_with};
pub use service::{Command, DecodeService};
pub use store::{DecodeObserver, DecodeStore, StoreEvent};
pub use transport::{Endpoint, FeedTransport, Transport, TransportError, TransportKind};
