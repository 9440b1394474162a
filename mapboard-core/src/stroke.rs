//! Freehand stroke records as stored in the shared document.

use crate::geo::{LatLngBounds, Point};
use crate::palette::UserColor;
use rand::Rng;
use uuid::Uuid;

/// Upper bound (exclusive) of the per-stroke jitter seed.
pub const SEED_RANGE: f64 = 1000.0;

/// A stroke as materialized from the shared `strokes` array.
///
/// Author, seed and first point are fixed at creation; `points` only grows
/// until the stroke is `done`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub id: String,
    pub author_id: u64,
    pub seed: f64,
    pub points: Vec<Point>,
    pub color: UserColor,
    /// Viewport the container-space points are relative to.
    pub bounds: Option<LatLngBounds>,
    /// Set once the author lifted the pointer; no more points follow and
    /// `color` is final.
    pub done: bool,
}

impl Stroke {
    pub fn first_point(&self) -> Option<Point> {
        self.points.first().copied()
    }

    /// True if `self` could be an earlier observation of `later`.
    pub fn is_prefix_of(&self, later: &Stroke) -> bool {
        self.id == later.id
            && self.author_id == later.author_id
            && self.seed == later.seed
            && self.points.len() <= later.points.len()
            && later.points[..self.points.len()] == self.points[..]
    }
}

/// Creation payload for a stroke, before it has an id in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStroke {
    pub author_id: u64,
    pub seed: f64,
    pub first_point: Point,
    pub color: UserColor,
    pub bounds: Option<LatLngBounds>,
}

impl NewStroke {
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        author_id: u64,
        first_point: Point,
        color: UserColor,
        bounds: Option<LatLngBounds>,
    ) -> Self {
        Self {
            author_id,
            seed: random_seed(rng),
            first_point,
            color,
            bounds,
        }
    }
}

/// Fresh stroke id (UUID v4, hyphenated).
pub fn new_stroke_id() -> String {
    Uuid::new_v4().to_string()
}

/// Seed in `[0, SEED_RANGE)`.
pub fn random_seed<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(0.0..SEED_RANGE)
}
