//! # Scorevox - Identity Tracking and Voice Allocation
//!
//! Turns per-frame object detections into a synthesis score: persistent
//! identities via greedy nearest-centroid tracking, per-object feature
//! vectors (spatial angles, apparent distance, speed, appearance), and a
//! globally bounded pool of synthesis voices with priority ranking and
//! release hysteresis.
//!
//! ## Features
//!
//! - Deterministic greedy association with a configurable pixel gate
//! - Engine-unique identities that are never reused
//! - Fixed voice pool with global and per-stream caps, newest-wins
//!   ranking and optional preemption
//! - Hysteresis tails so brief occlusions do not retrigger notes
//! - CSV score records with stable column order and rounding
//!
//! ## Example
//!
//! ```rust,ignore
//! use scorevox::{Engine, EngineConfig, FixedAnalyzer, FrameGeometry, ScoreWriter};
//!
//! // One engine, one camera stream.
//! let engine = Engine::new(EngineConfig::default())?;
//! let geometry = FrameGeometry::new(640.0, 480.0)?;
//! let mut pipeline = engine.open_stream("camA", geometry, FixedAnalyzer::default());
//! let mut writer = ScoreWriter::create("scores.csv", false)?;
//!
//! // Per frame: detections in, records out.
//! let report = pipeline.process_frame(&(), detections, timestamp);
//! writer.write_frame(&report.records)?;
//! ```

pub mod analyzer;
pub mod config;
pub mod detection;
pub mod features;
pub mod matching;
pub mod pipeline;
pub mod score;
pub mod tracked_object;
pub mod tracker;
pub mod voices;

// Re-exports for convenience
pub use analyzer::{FixedAnalyzer, RegionAnalyzer, RegionStats};
pub use config::EngineConfig;
pub use detection::{BoundingBox, Detection, FrameGeometry, RawDetection, StreamId};
pub use features::FeatureVector;
pub use pipeline::{Engine, FrameReport, StreamPipeline};
pub use score::{ScoreRecord, ScoreWriter, CSV_HEADER, CSV_HEADER_WITH_SHAPE};
pub use tracked_object::{IdentityCounter, ObjectId, TrackedObject};
pub use tracker::{StreamTracker, TrackUpdate};
pub use voices::{ReleaseReason, VoiceEvent, VoicePool, VoiceSnapshot, VoiceState};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the scorevox library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid frame geometry: {0}")]
        InvalidGeometry(String),

        #[error("Analyzer failure: {0}")]
        Analyzer(String),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Result type for scorevox operations
    pub type Result<T> = std::result::Result<T, Error>;
}
