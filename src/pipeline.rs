//! Engine wiring: per-stream pipelines around one shared voice pool.
//!
//! Each stream gets its own [`StreamPipeline`] owning that stream's
//! tracker and analyzer, so frame processing runs without shared state
//! right up to the voice pool tick. The pool is the only cross-stream
//! structure and sits behind a mutex; one tick per frame is the entire
//! critical section, and analyzer calls always happen outside it.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::analyzer::{RegionAnalyzer, RegionStats};
use crate::config::EngineConfig;
use crate::detection::{normalize_frame, FrameGeometry, RawDetection, StreamId};
use crate::features::FeatureVector;
use crate::score::ScoreRecord;
use crate::tracked_object::{IdentityCounter, ObjectId};
use crate::tracker::StreamTracker;
use crate::voices::{VoiceEvent, VoicePool, VoiceSnapshot};
use crate::Result;

/// Everything one frame cycle produced.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Frame timestamp, echoed from the input.
    pub timestamp: f64,
    /// Score records for the frame, ascending by object id.
    pub records: Vec<ScoreRecord>,
    /// Voice transitions, in the order they happened.
    pub events: Vec<VoiceEvent>,
    /// Identities created this frame.
    pub created: Vec<ObjectId>,
    /// Identities retired this frame.
    pub retired: Vec<ObjectId>,
}

/// Shared core of one tracking/voicing engine.
///
/// Holds the validated configuration, the engine-wide identity counter
/// and the voice pool. Streams are opened off an engine and can be
/// processed from separate threads; caps hold under any interleaving
/// because every pool transition happens inside [`VoicePool::tick`].
pub struct Engine {
    config: Arc<EngineConfig>,
    identities: Arc<IdentityCounter>,
    voices: Arc<Mutex<VoicePool>>,
}

impl Engine {
    /// Validate the configuration and build an engine around it.
    ///
    /// This is the only fallible step of the processing lifecycle;
    /// per-frame paths recover from everything else.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let voices = VoicePool::new(&config);
        debug!(
            max_voices = config.max_voices,
            per_stream_cap = config.per_stream_cap,
            "engine ready"
        );
        Ok(Self {
            config: Arc::new(config),
            identities: Arc::new(IdentityCounter::new()),
            voices: Arc::new(Mutex::new(voices)),
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Identities issued so far, across all streams.
    pub fn identities_issued(&self) -> u64 {
        self.identities.issued()
    }

    /// Currently bound voice slots, across all streams.
    pub fn voiced_count(&self) -> usize {
        self.lock_voices().bound_count()
    }

    /// Snapshot of every bound voice slot.
    pub fn voice_snapshot(&self) -> Vec<VoiceSnapshot> {
        self.lock_voices().snapshot()
    }

    /// Open a pipeline for one stream.
    ///
    /// # Arguments
    /// * `stream` - Stream identifier; reopening an id continues its
    ///   per-stream voice quota but not its old identities
    /// * `geometry` - Validated frame dimensions for the stream
    /// * `analyzer` - Pixel feature extractor for the stream's frames
    pub fn open_stream<A: RegionAnalyzer>(
        &self,
        stream: impl Into<StreamId>,
        geometry: FrameGeometry,
        analyzer: A,
    ) -> StreamPipeline<A> {
        let stream = stream.into();
        debug!(stream = %stream, "stream opened");
        StreamPipeline {
            tracker: StreamTracker::new(stream.clone(), &self.config, Arc::clone(&self.identities)),
            stream,
            geometry,
            analyzer,
            config: Arc::clone(&self.config),
            voices: Arc::clone(&self.voices),
        }
    }

    /// Release every voice bound to a stream, for shutdown paths that
    /// no longer hold the pipeline itself.
    pub fn close_stream(&self, stream: &StreamId) -> Vec<VoiceEvent> {
        self.lock_voices().release_stream(stream)
    }

    fn lock_voices(&self) -> std::sync::MutexGuard<'_, VoicePool> {
        self.voices.lock().expect("voice pool lock poisoned")
    }
}

/// Frame-cycle driver for one stream.
///
/// Owns the stream's tracker state and analyzer; safe to move to a
/// worker thread. Frame timestamps are expected to be finite and
/// non-decreasing per stream.
pub struct StreamPipeline<A: RegionAnalyzer> {
    stream: StreamId,
    geometry: FrameGeometry,
    analyzer: A,
    tracker: StreamTracker,
    config: Arc<EngineConfig>,
    voices: Arc<Mutex<VoicePool>>,
}

impl<A: RegionAnalyzer> StreamPipeline<A> {
    /// The stream this pipeline owns.
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// The stream's frame geometry.
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// The stream's tracker, for inspecting live identities.
    pub fn tracker(&self) -> &StreamTracker {
        &self.tracker
    }

    /// Run one frame through ingest, analysis, tracking and voicing.
    ///
    /// Analyzer failures are recovered inline: a failed frame glitch
    /// zero-fills the glitch column for the frame, a failed region skips
    /// that object's record while tracker and voice state still advance.
    ///
    /// # Arguments
    /// * `frame` - Pixel data handed through to the analyzer
    /// * `detections` - Raw detector output for the frame
    /// * `timestamp` - Frame capture time in seconds, this stream's clock
    pub fn process_frame(
        &mut self,
        frame: &A::Frame,
        detections: Vec<RawDetection>,
        timestamp: f64,
    ) -> FrameReport {
        let detections = normalize_frame(&self.stream, detections, &self.geometry, timestamp);

        let glitch = match self.analyzer.frame_glitch(frame) {
            Ok(value) => value,
            Err(err) => {
                warn!(stream = %self.stream, error = %err, "frame glitch extraction failed, zero-filling");
                0.0
            }
        };

        let mut base = Vec::with_capacity(detections.len());
        let mut emit_ok = Vec::with_capacity(detections.len());
        for detection in &detections {
            let (stats, ok) = if detection.region.area() < 1.0 {
                // Nothing to analyze in a sub-pixel region; appearance
                // zero-fills and the record still emits.
                (RegionStats::default(), true)
            } else {
                match self.analyzer.region_stats(frame, &detection.region) {
                    Ok(stats) => (stats, true),
                    Err(err) => {
                        warn!(stream = %self.stream, error = %err, "region analysis failed, skipping record");
                        (RegionStats::default(), false)
                    }
                }
            };
            base.push(FeatureVector::build(detection, &self.geometry, stats, glitch));
            emit_ok.push(ok);
        }

        let update = self.tracker.update(
            &detections,
            &base,
            &self.geometry,
            self.config.frame_rate,
            timestamp,
        );

        let seen_ids = update.seen_ids();
        let events = {
            let mut pool = self.voices.lock().expect("voice pool lock poisoned");
            pool.tick(
                &self.stream,
                timestamp,
                self.tracker.objects_mut(),
                &seen_ids,
                &update.retired,
            )
        };

        let mut records = Vec::with_capacity(update.seen.len());
        for &(id, det_idx) in &update.seen {
            if !emit_ok[det_idx] {
                continue;
            }
            if let Some(obj) = self.tracker.get(id) {
                records.push(ScoreRecord {
                    timestamp,
                    stream: self.stream.clone(),
                    object_id: id,
                    class_id: obj.class_id,
                    features: obj.features,
                    confidence: detections[det_idx].confidence,
                    voiced: obj.voiced,
                });
            }
        }
        records.sort_by_key(|record| record.object_id);

        FrameReport {
            timestamp,
            records,
            events,
            created: update.created,
            retired: update.retired,
        }
    }

    /// Shut the stream down, releasing every voice it holds.
    pub fn close(self) -> Vec<VoiceEvent> {
        debug!(stream = %self.stream, "stream closed");
        self.voices
            .lock()
            .expect("voice pool lock poisoned")
            .release_stream(&self.stream)
    }
}
