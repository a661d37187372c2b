#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport, cluster point and activity statistics types.
//!
//! These are the pure data shapes that flow through the heat map
//! synchronizer: the query sent to the clustering backend
//! ([`ViewportQuery`]), the points it returns ([`ClusterPoint`]) and the
//! activity buckets derived from them ([`ActivityStats`]). Nothing in this
//! crate performs I/O.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Lowest zoom level accepted by the clustering backend.
pub const MIN_ZOOM: u8 = 1;

/// Highest zoom level accepted by the clustering backend.
pub const MAX_ZOOM: u8 = 20;

/// Half-width, in degrees, of the window built around the initial center
/// when no explicit bounds exist yet (roughly a 22 km radius).
pub const INITIAL_WINDOW_DEGREES: f64 = 0.2;

/// Points with a count strictly above this are high activity.
pub const HIGH_ACTIVITY_THRESHOLD: u64 = 50;

/// Points with a count at or above this (and not high) are medium activity.
pub const MEDIUM_ACTIVITY_THRESHOLD: u64 = 30;

/// Errors raised when a viewport value violates its invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewportError {
    /// A latitude outside `[-90, 90]`.
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),

    /// A longitude outside `[-180, 180]`.
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),

    /// `south` is not strictly below `north`.
    #[error("south ({south}) must be below north ({north})")]
    InvertedLatitude {
        /// Southern edge.
        south: f64,
        /// Northern edge.
        north: f64,
    },

    /// `west` is not strictly below `east`.
    #[error("west ({west}) must be below east ({east})")]
    InvertedLongitude {
        /// Western edge.
        west: f64,
        /// Eastern edge.
        east: f64,
    },
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair without validation.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components fall inside their valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Raw bounds as they arrive over the wire, before validation.
#[derive(Debug, Clone, Copy, Deserialize)]
struct RawBounds {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = ViewportError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        Self::new(raw.north, raw.south, raw.east, raw.west)
    }
}

/// A geographic bounding box in WGS84 coordinates.
///
/// Always satisfies `south < north` and `west < east` with every edge
/// inside the valid latitude/longitude range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct Bounds {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl Bounds {
    /// Creates a bounding box, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ViewportError`] if an edge is out of range or the box is
    /// inverted (or empty) on either axis.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, ViewportError> {
        for lat in [north, south] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ViewportError::Latitude(lat));
            }
        }
        for lng in [east, west] {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(ViewportError::Longitude(lng));
            }
        }
        if south >= north {
            return Err(ViewportError::InvertedLatitude { south, north });
        }
        if west >= east {
            return Err(ViewportError::InvertedLongitude { west, east });
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Builds a window of `half_width` degrees on each side of `center`,
    /// clamped to the valid coordinate ranges.
    #[must_use]
    pub fn around(center: Coordinates, half_width: f64) -> Self {
        let lat = center.latitude.clamp(-90.0, 90.0);
        let lng = center.longitude.clamp(-180.0, 180.0);
        Self {
            north: (lat + half_width).min(90.0),
            south: (lat - half_width).max(-90.0),
            east: (lng + half_width).min(180.0),
            west: (lng - half_width).max(-180.0),
        }
    }

    /// Northern latitude.
    #[must_use]
    pub const fn north(&self) -> f64 {
        self.north
    }

    /// Southern latitude.
    #[must_use]
    pub const fn south(&self) -> f64 {
        self.south
    }

    /// Eastern longitude.
    #[must_use]
    pub const fn east(&self) -> f64 {
        self.east
    }

    /// Western longitude.
    #[must_use]
    pub const fn west(&self) -> f64 {
        self.west
    }

    /// Midpoint of the box.
    #[must_use]
    pub fn center(&self) -> Coordinates {
        Coordinates::new(
            f64::midpoint(self.south, self.north),
            f64::midpoint(self.west, self.east),
        )
    }
}

/// A normalized request for cluster points.
///
/// Immutable once built. Every viewport change produces a new value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportQuery {
    zoom: u8,
    bounds: Option<Bounds>,
}

impl ViewportQuery {
    /// Creates a query, clamping `zoom` into `[MIN_ZOOM, MAX_ZOOM]`.
    #[must_use]
    pub fn new(zoom: u8, bounds: Option<Bounds>) -> Self {
        Self {
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            bounds,
        }
    }

    /// Map zoom level.
    #[must_use]
    pub const fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Geographic bounds, if any.
    #[must_use]
    pub const fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }

    /// Center of the query's bounds, if it has any.
    #[must_use]
    pub fn center(&self) -> Option<Coordinates> {
        self.bounds.as_ref().map(Bounds::center)
    }

    /// Query-string parameters for the cluster endpoint.
    ///
    /// `zoom` is always present. The four bounds parameters are emitted
    /// together or not at all.
    #[must_use]
    pub fn to_query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("zoom", self.zoom.to_string())];
        if let Some(b) = &self.bounds {
            params.push(("north", b.north.to_string()));
            params.push(("south", b.south.to_string()));
            params.push(("east", b.east.to_string()));
            params.push(("west", b.west.to_string()));
        }
        params
    }
}

/// Builds the very first query: a ±[`INITIAL_WINDOW_DEGREES`] window
/// around `center`.
#[must_use]
pub fn build_initial_query(center: Coordinates, zoom: u8) -> ViewportQuery {
    build_initial_query_with_window(center, zoom, INITIAL_WINDOW_DEGREES)
}

/// Same as [`build_initial_query`] with a caller-chosen half-width.
#[must_use]
pub fn build_initial_query_with_window(
    center: Coordinates,
    zoom: u8,
    half_width: f64,
) -> ViewportQuery {
    ViewportQuery::new(zoom, Some(Bounds::around(center, half_width)))
}

/// Builds a query from the presentation layer's current viewport. Bounds
/// pass through unchanged.
#[must_use]
pub fn build_query_from_viewport(bounds: Bounds, zoom: u8) -> ViewportQuery {
    ViewportQuery::new(zoom, Some(bounds))
}

/// One point returned by the clustering backend.
///
/// Depending on zoom the backend returns either single intervention
/// records or aggregated clusters; both look the same here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterPoint {
    /// Latitude in degrees.
    #[serde(rename = "latitud")]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(rename = "longitud")]
    pub longitude: f64,
    /// Number of records represented by this point.
    pub count: u64,
}

impl ClusterPoint {
    /// Activity bucket this point falls into.
    #[must_use]
    pub const fn activity_level(&self) -> ActivityLevel {
        ActivityLevel::for_count(self.count)
    }
}

/// Activity bucket of a single cluster point.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityLevel {
    /// `count < 30`
    Low,
    /// `30 <= count <= 50`
    Medium,
    /// `count > 50`
    High,
}

impl ActivityLevel {
    /// Classifies a raw count.
    #[must_use]
    pub const fn for_count(count: u64) -> Self {
        if count > HIGH_ACTIVITY_THRESHOLD {
            Self::High
        } else if count >= MEDIUM_ACTIVITY_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Activity counts derived from the current point set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    /// Sum of `count` over all points.
    pub total_count: u64,
    /// Points with `count > 50`.
    pub high_activity_count: usize,
    /// Points with `30 <= count <= 50`.
    pub medium_activity_count: usize,
    /// Points with `count < 30`.
    pub low_activity_count: usize,
}

impl ActivityStats {
    /// Aggregates a point set. Every point lands in exactly one bucket.
    #[must_use]
    pub fn from_points(points: &[ClusterPoint]) -> Self {
        points.iter().fold(Self::default(), |mut stats, point| {
            stats.total_count += point.count;
            match point.activity_level() {
                ActivityLevel::High => stats.high_activity_count += 1,
                ActivityLevel::Medium => stats.medium_activity_count += 1,
                ActivityLevel::Low => stats.low_activity_count += 1,
            }
            stats
        })
    }

    /// Number of points that went into these stats.
    #[must_use]
    pub const fn point_count(&self) -> usize {
        self.high_activity_count + self.medium_activity_count + self.low_activity_count
    }
}
