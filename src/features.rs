//! Per-frame feature vectors and the geometric derivations behind them.

use nalgebra::Point2;

use crate::analyzer::{sanitize_unit, RegionStats};
use crate::detection::{Detection, FrameGeometry};

/// Everything the synthesis side needs to know about one object in one
/// frame.
///
/// Built fresh every frame and never mutated afterwards, with one
/// exception: speed depends on the identity the detection associates
/// to, so it is injected exactly once via [`FeatureVector::with_speed`]
/// after association. All other fields are pure functions of the
/// detection and the analyzer output, so rebuilding a vector from the
/// same inputs always yields the same values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    /// Horizontal angle in degrees, [-180, 180), left edge of frame at -180.
    pub azimuth: f64,
    /// Vertical angle in degrees, [-30, 30], top of frame at +30.
    pub elevation: f64,
    /// Apparent distance in (0, 1]; large boxes read as near.
    pub distance: f64,
    /// Normalized centroid speed in frame-sides per second, >= 0.
    pub speed: f64,
    /// Frame-wide glitch estimate, [0, 1].
    pub glitch: f64,
    /// Mean hue in degrees, [0, 360).
    pub hue: f64,
    /// Mean saturation, [0, 1].
    pub saturation: f64,
    /// Mean brightness, [0, 1].
    pub value: f64,
    /// Edge density, [0, 1].
    pub edge_density: f64,
    /// Contour complexity, [0, 1].
    pub shape_score: f64,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            azimuth: 0.0,
            elevation: 0.0,
            distance: 1.0,
            speed: 0.0,
            glitch: 0.0,
            hue: 0.0,
            saturation: 0.0,
            value: 0.0,
            edge_density: 0.0,
            shape_score: 0.0,
        }
    }
}

impl FeatureVector {
    /// Build a vector for one normalized detection.
    ///
    /// Speed starts at zero; the tracker injects it after association.
    ///
    /// # Arguments
    /// * `detection` - Normalized detection (centroid already in-frame)
    /// * `geometry` - Frame dimensions
    /// * `stats` - Analyzer output for the detection's region
    /// * `glitch` - Frame-wide glitch estimate
    pub fn build(
        detection: &Detection,
        geometry: &FrameGeometry,
        stats: RegionStats,
        glitch: f64,
    ) -> Self {
        let stats = stats.sanitized();
        Self {
            azimuth: azimuth_of(detection.centroid.x, geometry.width()),
            elevation: elevation_of(detection.centroid.y, geometry.height()),
            distance: distance_of(detection.bbox.area(), geometry.area()),
            speed: 0.0,
            glitch: sanitize_unit(glitch),
            hue: stats.hue,
            saturation: stats.saturation,
            value: stats.value,
            edge_density: stats.edge_density,
            shape_score: stats.shape_score,
        }
    }

    /// Return a copy with the given speed. Called once per frame, after
    /// the detection has been associated to an identity.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        self
    }
}

/// Horizontal angle of a centroid: frame left edge maps to -180 degrees,
/// frame right edge wraps to -180 as well, frame center to 0.
pub fn azimuth_of(centroid_x: f64, frame_width: f64) -> f64 {
    wrap_degrees(centroid_x / frame_width * 360.0 - 180.0)
}

/// Vertical angle of a centroid: frame top maps to +30 degrees, frame
/// bottom to -30.
pub fn elevation_of(centroid_y: f64, frame_height: f64) -> f64 {
    ((1.0 - centroid_y / frame_height) * 60.0 - 30.0).clamp(-30.0, 30.0)
}

/// Apparent distance from the box-to-frame area ratio.
///
/// Box area is floored at one square pixel so degenerate boxes read as
/// maximally far rather than producing a ratio of exactly zero.
pub fn distance_of(bbox_area: f64, frame_area: f64) -> f64 {
    (1.0 - bbox_area.max(1.0) / frame_area).clamp(0.05, 1.0)
}

/// Centroid speed between consecutive observations of one identity, in
/// frame-sides per second.
pub fn speed_between(
    previous: &Point2<f64>,
    current: &Point2<f64>,
    geometry: &FrameGeometry,
    frame_rate: f64,
) -> f64 {
    nalgebra::distance(previous, current) / geometry.longest_side() * frame_rate
}

/// Wrap an angle into [-180, 180).
fn wrap_degrees(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}
