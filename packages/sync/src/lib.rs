#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport-driven cluster synchronizer for the heat map view.
//!
//! Turns a continuously changing map viewport into a throttled,
//! cancellable stream of requests to the clustering backend:
//!
//! 1. The caller's position is resolved once (with a fixed fallback) and
//!    the initial window around it is fetched immediately as a blocking
//!    load.
//! 2. Every later pan/zoom goes through a 300 ms trailing [`Debouncer`];
//!    only the last viewport of a burst becomes a silent fetch.
//! 3. The [`RequestLifecycleManager`] keeps at most one fetch in flight,
//!    aborts superseded ones, and ignores any result whose session is no
//!    longer current.
//!
//! The address of the viewport center is resolved alongside, through
//! `heat_map_geocoder`, and never affects the point data.

pub mod client;
pub mod config;
pub mod debounce;
pub mod lifecycle;
pub mod synchronizer;

pub use client::{ClusterSource, HttpClusterSource};
pub use config::SyncConfig;
pub use debounce::Debouncer;
pub use lifecycle::{FetchMode, FetchOutcome, FetchPhase, FetchSnapshot, RequestLifecycleManager};
pub use synchronizer::{HeatMapSync, SyncSnapshot};

use heat_map_viewport_models::ActivityStats;
use serde::Serialize;
use thiserror::Error;

/// Errors from a cluster fetch. The `Display` text is what the user sees.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("Could not reach the map data service: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("The map data service returned {0}")]
    Status(reqwest::StatusCode),

    /// The body was not a valid point array.
    #[error("The map data service sent an invalid response: {message}")]
    Malformed {
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors while loading [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error (file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An environment variable held an unparseable value.
    #[error("Invalid value for {name}: {value:?}")]
    Env {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// A field failed validation.
    #[error("Invalid config: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },

    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The reverse geocoder table did not load.
    #[error("Geocoder config error: {0}")]
    Geocoder(#[from] heat_map_geocoder::GeocodeError),
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A fetch was applied.
    #[serde(rename_all = "camelCase")]
    PointsUpdated {
        /// Number of visible points.
        point_count: usize,
        /// Stats of the new point set.
        stats: ActivityStats,
    },
    /// A fetch failed. Meant for a transient notification.
    FetchFailed {
        /// User-facing message.
        message: String,
    },
    /// The center address changed.
    AddressResolved {
        /// The new address (or coordinate fallback).
        address: String,
    },
}
