//! Per-stream identity tracker.

use std::sync::Arc;

use nalgebra::Point2;
use tracing::debug;

use crate::config::EngineConfig;
use crate::detection::{Detection, FrameGeometry, StreamId};
use crate::features::{self, FeatureVector};
use crate::matching::{claim_nearest, detection_order};
use crate::tracked_object::{IdentityCounter, ObjectId, TrackedObject};

/// Result of folding one frame into a tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackUpdate {
    /// Every identity observed this frame, paired with the index of the
    /// detection that observed it. Holds both matched and newly created
    /// identities, in deterministic processing order.
    pub seen: Vec<(ObjectId, usize)>,

    /// Identities created this frame (subset of `seen`).
    pub created: Vec<ObjectId>,

    /// Identities retired this frame after exceeding the idle timeout.
    pub retired: Vec<ObjectId>,
}

impl TrackUpdate {
    /// The observed identities without their detection indices.
    pub fn seen_ids(&self) -> Vec<ObjectId> {
        self.seen.iter().map(|&(id, _)| id).collect()
    }
}

/// Greedy nearest-centroid tracker for a single stream.
///
/// Owns the stream's identity arena: objects are created from unmatched
/// detections, updated in place on every match, and retired once unseen
/// longer than the idle timeout. Identities come from a counter shared
/// across all of an engine's streams, so ids are engine-unique and never
/// reused.
pub struct StreamTracker {
    stream: StreamId,
    gate_distance: f64,
    retire_timeout: f64,
    objects: Vec<TrackedObject>,
    identities: Arc<IdentityCounter>,
}

impl StreamTracker {
    /// Create a tracker for one stream.
    ///
    /// # Arguments
    /// * `stream` - Stream the tracker owns
    /// * `config` - Validated engine configuration
    /// * `identities` - Engine-wide identity source
    pub fn new(stream: StreamId, config: &EngineConfig, identities: Arc<IdentityCounter>) -> Self {
        Self {
            stream,
            gate_distance: config.association_gate_distance,
            retire_timeout: config.idle_retire_timeout,
            objects: Vec::new(),
            identities,
        }
    }

    /// The stream this tracker owns.
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Currently live identities.
    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    /// Mutable access for the voice pool's mirror sync.
    pub(crate) fn objects_mut(&mut self) -> &mut [TrackedObject] {
        &mut self.objects
    }

    /// Look up a live identity.
    pub fn get(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.objects.iter().find(|obj| obj.id == id)
    }

    /// Number of live identities.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when no identity is live.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Fold one frame of normalized detections into the tracker.
    ///
    /// `base_features` holds the speed-less vector for each detection in
    /// input order; the tracker injects speed for matched identities
    /// from the displacement since their previous observation.
    ///
    /// # Arguments
    /// * `detections` - Normalized detections, input order
    /// * `base_features` - Speed-less feature vector per detection
    /// * `geometry` - Frame dimensions, for speed normalization
    /// * `frame_rate` - Frames per second, for speed scaling
    /// * `now` - Frame timestamp in seconds
    pub fn update(
        &mut self,
        detections: &[Detection],
        base_features: &[FeatureVector],
        geometry: &FrameGeometry,
        frame_rate: f64,
        now: f64,
    ) -> TrackUpdate {
        debug_assert_eq!(detections.len(), base_features.len());

        // Stage 1: retire identities whose idle time has run out. They
        // never become association candidates for this frame.
        let retire_timeout = self.retire_timeout;
        let mut retired = Vec::new();
        self.objects.retain(|obj| {
            if obj.unseen_for(now) > retire_timeout {
                retired.push(obj.id);
                false
            } else {
                true
            }
        });
        for id in &retired {
            debug!(stream = %self.stream, id = %id, "identity retired");
        }

        // Stage 2: deterministic association. An upstream track-id
        // pre-pass binds detections to identities that carried the same
        // id, then the greedy pass claims by centroid distance.
        let det_centroids: Vec<Point2<f64>> = detections.iter().map(|d| d.centroid).collect();
        let candidates: Vec<Point2<f64>> = self.objects.iter().map(|o| o.centroid).collect();
        let order = detection_order(&det_centroids);

        let mut claimed = vec![false; candidates.len()];
        let mut assignment: Vec<Option<usize>> = vec![None; detections.len()];
        for &det_idx in &order {
            let Some(external) = detections[det_idx].external_track_id else {
                continue;
            };
            let hit = self
                .objects
                .iter()
                .position(|obj| obj.external_track_id == Some(external));
            if let Some(obj_idx) = hit {
                if !claimed[obj_idx] {
                    claimed[obj_idx] = true;
                    assignment[det_idx] = Some(obj_idx);
                }
            }
        }
        claim_nearest(
            &order,
            &det_centroids,
            &candidates,
            self.gate_distance,
            &mut claimed,
            &mut assignment,
        );

        // Stage 3: fold matches in and create identities for the rest.
        let mut seen = Vec::with_capacity(detections.len());
        let mut created = Vec::new();
        for &det_idx in &order {
            let detection = &detections[det_idx];
            match assignment[det_idx] {
                Some(obj_idx) => {
                    let obj = &mut self.objects[obj_idx];
                    let speed =
                        features::speed_between(&obj.centroid, &detection.centroid, geometry, frame_rate);
                    obj.mark_seen(detection, base_features[det_idx].with_speed(speed), now);
                    seen.push((obj.id, det_idx));
                }
                None => {
                    let id = self.identities.next_id();
                    debug!(stream = %self.stream, id = %id, "identity created");
                    self.objects
                        .push(TrackedObject::new(id, detection, base_features[det_idx], now));
                    created.push(id);
                    seen.push((id, det_idx));
                }
            }
        }

        // Unmatched identities simply age; their last_seen is untouched
        // and stage 1 of a later frame retires them.
        TrackUpdate { seen, created, retired }
    }
}
