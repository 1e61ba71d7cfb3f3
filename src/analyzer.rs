//! Capability trait for the external pixel feature extractors.
//!
//! The engine itself never touches pixels. Color statistics, edge
//! density, shape scoring and the frame-wide glitch estimate all come
//! from an implementation of [`RegionAnalyzer`] supplied at stream-open
//! time, so the tracking and voicing core stays testable without any
//! imaging dependency.

use crate::detection::BoundingBox;
use crate::Result;

/// Per-region appearance statistics produced by an analyzer.
///
/// Values arrive in analyzer units and are sanitized by
/// [`RegionStats::sanitized`] before entering a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegionStats {
    /// Mean hue in degrees.
    pub hue: f64,
    /// Mean saturation, nominal range [0, 1].
    pub saturation: f64,
    /// Mean brightness, nominal range [0, 1].
    pub value: f64,
    /// Edge density, nominal range [0, 1].
    pub edge_density: f64,
    /// Optional contour complexity score, nominal range [0, 1].
    pub shape_score: f64,
}

impl RegionStats {
    /// Clamp every field into its documented range.
    ///
    /// Non-finite values collapse to zero and hue wraps into [0, 360).
    pub fn sanitized(self) -> RegionStats {
        RegionStats {
            hue: if self.hue.is_finite() {
                self.hue.rem_euclid(360.0)
            } else {
                0.0
            },
            saturation: sanitize_unit(self.saturation),
            value: sanitize_unit(self.value),
            edge_density: sanitize_unit(self.edge_density),
            shape_score: sanitize_unit(self.shape_score),
        }
    }
}

pub(crate) fn sanitize_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Interface the engine uses to pull appearance features out of frames.
///
/// `Frame` is whatever the caller's imaging stack hands around, for
/// example a decoded BGR buffer. Both methods may fail; failures are
/// recoverable and only suppress or zero-fill the affected output.
pub trait RegionAnalyzer: Send + Sync {
    /// Frame type this analyzer reads. Unsized types are fine, frames
    /// are always passed by reference.
    type Frame: ?Sized;

    /// Appearance statistics for one frame-clamped region.
    ///
    /// The region is guaranteed to lie inside the frame rectangle and
    /// to have at least one square pixel of area.
    fn region_stats(&self, frame: &Self::Frame, region: &BoundingBox) -> Result<RegionStats>;

    /// Frame-wide glitch estimate, nominal range [0, 1].
    fn frame_glitch(&self, frame: &Self::Frame) -> Result<f64>;
}

/// Analyzer that returns the same statistics for every region.
///
/// Useful in tests and in headless runs where appearance does not
/// matter; frames are unit values.
#[derive(Debug, Clone, Default)]
pub struct FixedAnalyzer {
    /// Statistics returned for every region.
    pub stats: RegionStats,
    /// Glitch value returned for every frame.
    pub glitch: f64,
}

impl FixedAnalyzer {
    /// Create an analyzer pinned to the given outputs.
    pub fn new(stats: RegionStats, glitch: f64) -> Self {
        Self { stats, glitch }
    }
}

impl RegionAnalyzer for FixedAnalyzer {
    type Frame = ();

    fn region_stats(&self, _frame: &(), _region: &BoundingBox) -> Result<RegionStats> {
        Ok(self.stats)
    }

    fn frame_glitch(&self, _frame: &()) -> Result<f64> {
        Ok(self.glitch)
    }
}
