//! Geographic and screen-space primitives shared by every map peer.
//!
//! Screen (container) coordinates reuse [`kurbo::Point`]; geographic
//! coordinates are [`LatLng`], serialized as a `[lat, lng]` pair to match
//! the shape peers exchange.

use serde::{Deserialize, Serialize};

pub use kurbo::Point;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

impl From<[f64; 2]> for LatLng {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

impl From<LatLng> for [f64; 2] {
    fn from(value: LatLng) -> Self {
        [value.lat, value.lng]
    }
}

/// South-west / north-east corners of the viewport a stroke was drawn in.
///
/// Strokes store container-space points; the bounds anchor that container
/// space to the map so the overlay stays put under pan and zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[LatLng; 2]", into = "[LatLng; 2]")]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub const fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self { south_west, north_east }
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}

impl From<[LatLng; 2]> for LatLngBounds {
    fn from([south_west, north_east]: [LatLng; 2]) -> Self {
        Self { south_west, north_east }
    }
}

impl From<LatLngBounds> for [LatLng; 2] {
    fn from(value: LatLngBounds) -> Self {
        [value.south_west, value.north_east]
    }
}

/// The shared viewport: integer zoom level plus map center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub zoom: i32,
    pub center: LatLng,
}

impl MapView {
    pub const fn new(zoom: i32, center: LatLng) -> Self {
        Self { zoom, center }
    }

    /// Rejects views a peer could not have produced (NaN/inf centers).
    pub fn is_valid(&self) -> bool {
        self.center.is_finite()
    }

    /// True when only the center differs from `other`.
    pub fn same_zoom(&self, other: &MapView) -> bool {
        self.zoom == other.zoom
    }
}

/// Parse a `[x, y]` JSON pair into a container point.
pub fn point_from_pair(pair: [f64; 2]) -> Point {
    Point::new(pair[0], pair[1])
}

/// Inverse of [`point_from_pair`].
pub fn point_to_pair(point: Point) -> [f64; 2] {
    [point.x, point.y]
}
