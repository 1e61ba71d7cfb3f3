//! Engine configuration and startup validation.
//!
//! Configuration errors are the only fatal error class: everything is
//! checked once in [`EngineConfig::validate`] before any frame is
//! processed, and per-frame paths never re-validate.

use serde::Deserialize;

use crate::{Error, Result};

fn default_max_voices() -> usize {
    20
}

fn default_per_stream_cap() -> usize {
    4
}

fn default_association_gate_distance() -> f64 {
    25.0
}

fn default_idle_retire_timeout() -> f64 {
    3.0
}

fn default_voice_release_hysteresis() -> f64 {
    2.0
}

fn default_frame_rate() -> f64 {
    30.0
}

/// Tunables for the tracker, the voice pool and the feature builder.
///
/// Deserializable from any serde format; missing fields take the
/// documented defaults. Caps are unsigned at the type level, so negative
/// or fractional values are rejected during deserialization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Global ceiling on simultaneously bound voice slots.
    ///
    /// Zero is valid and means the engine tracks and scores but never
    /// voices anything.
    #[serde(default = "default_max_voices")]
    pub max_voices: usize,

    /// Per-stream ceiling on bound voice slots.
    #[serde(default = "default_per_stream_cap")]
    pub per_stream_cap: usize,

    /// Greedy association gate in pixels. A detection only matches an
    /// existing identity whose centroid lies strictly closer than this.
    #[serde(default = "default_association_gate_distance")]
    pub association_gate_distance: f64,

    /// Seconds an identity may go unseen before it is retired.
    #[serde(default = "default_idle_retire_timeout")]
    pub idle_retire_timeout: f64,

    /// Seconds a voice lingers in the releasing state after its object
    /// goes unseen, so brief occlusions do not cut notes off.
    #[serde(default = "default_voice_release_hysteresis")]
    pub voice_release_hysteresis: f64,

    /// Frames per second, used to scale per-frame displacement to speed.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,

    /// Allow higher-ranked objects to steal slots from lower-ranked
    /// holders instead of waiting for a release.
    #[serde(default)]
    pub preemption: bool,

    /// Emit the optional shape score as a fifteenth CSV column.
    #[serde(default)]
    pub shape_analysis: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_voices: default_max_voices(),
            per_stream_cap: default_per_stream_cap(),
            association_gate_distance: default_association_gate_distance(),
            idle_retire_timeout: default_idle_retire_timeout(),
            voice_release_hysteresis: default_voice_release_hysteresis(),
            frame_rate: default_frame_rate(),
            preemption: false,
            shape_analysis: false,
        }
    }
}

impl EngineConfig {
    /// Check every tunable once, before any frame is processed.
    ///
    /// # Returns
    /// `Ok(())`, or [`Error::InvalidConfig`] naming the offending field
    pub fn validate(&self) -> Result<()> {
        if !self.association_gate_distance.is_finite() || self.association_gate_distance <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "association_gate_distance must be finite and positive, got {}",
                self.association_gate_distance
            )));
        }
        if !self.idle_retire_timeout.is_finite() || self.idle_retire_timeout < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "idle_retire_timeout must be finite and non-negative, got {}",
                self.idle_retire_timeout
            )));
        }
        if !self.voice_release_hysteresis.is_finite() || self.voice_release_hysteresis < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "voice_release_hysteresis must be finite and non-negative, got {}",
                self.voice_release_hysteresis
            )));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "frame_rate must be finite and positive, got {}",
                self.frame_rate
            )));
        }
        Ok(())
    }
}
