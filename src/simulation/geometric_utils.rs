//! Geometric utility functions for distance calculations on the raster.

use geo::algorithm::Distance;
use geo::{Euclidean, Point};

/// Relative slack applied when comparing a distance against a cutoff radius.
///
/// Cell centres are computed from floating-point origins and resolutions, so a
/// neighbour that sits exactly on the cutoff may come out a few ulps too far.
const RADIUS_EPSILON: f64 = 1e-9;

/// Euclidean distance between two cell centres.
pub fn cell_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    Euclidean.distance(a, b)
}

/// Returns `true` if `distance` lies inside the closed disc of `radius`.
pub fn within_radius(distance: f64, radius: f64) -> bool {
    distance <= radius * (1.0 + RADIUS_EPSILON)
}

/// Whether a window of `radius` covers at least one grid step.
///
/// A radius shorter than the raster resolution has no support: the focal cell
/// is not part of its own window either, so the resulting operator row is zero.
pub fn has_support(radius: f64, resolution: f64) -> bool {
    within_radius(resolution, radius)
}

/// Number of grid steps a square window must extend to cover `radius`.
pub fn window_extent(radius: f64, resolution: f64) -> usize {
    (radius * (1.0 + RADIUS_EPSILON) / resolution).floor() as usize
}
