//! Persistent identities and the counter that issues them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::Point2;

use crate::detection::{Detection, StreamId};
use crate::features::FeatureVector;

/// Identity of one tracked object.
///
/// Issued by an [`IdentityCounter`] and never reused within an engine,
/// even after the object is retired. Orderable so emission and ranking
/// tie-breaks are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identity source shared by every stream of one engine.
///
/// Uses `Relaxed` ordering since only uniqueness matters, not memory
/// ordering between the issuing threads.
#[derive(Debug, Default)]
pub struct IdentityCounter {
    next: AtomicU64,
}

impl IdentityCounter {
    /// Create a counter starting at identity 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next identity.
    #[inline]
    pub fn next_id(&self) -> ObjectId {
        ObjectId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Total identities issued so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// One persistent identity maintained by a stream's tracker.
///
/// Carries the latest observation (centroid, class, features) plus the
/// bookkeeping the voice pool needs for ranking. The two voice fields
/// are mirrors of pool state, refreshed on the owning stream's frame
/// cycle; the pool slots themselves stay authoritative.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    /// Engine-unique identity.
    pub id: ObjectId,

    /// Stream this identity lives on.
    pub stream: StreamId,

    /// Class id from the most recent matched detection.
    pub class_id: i64,

    /// Time the identity was created, in seconds. Ranking key: newer
    /// objects outrank older ones.
    pub created_at: f64,

    /// Time of the most recent matched detection, in seconds.
    pub last_seen: f64,

    /// Centroid of the most recent matched detection.
    pub centroid: Point2<f64>,

    /// Feature vector from the most recent matched detection, speed
    /// already injected.
    pub features: FeatureVector,

    /// Upstream track id from the most recent matched detection.
    pub external_track_id: Option<i64>,

    /// Whether the voice pool currently holds a slot for this identity.
    pub voiced: bool,

    /// Last time this identity was observed while holding a voiced slot.
    pub last_voiced_at: Option<f64>,
}

impl TrackedObject {
    /// Create an identity from its first matched detection.
    pub fn new(id: ObjectId, detection: &Detection, features: FeatureVector, now: f64) -> Self {
        Self {
            id,
            stream: detection.stream.clone(),
            class_id: detection.class_id,
            created_at: now,
            last_seen: now,
            centroid: detection.centroid,
            features,
            external_track_id: detection.external_track_id,
            voiced: false,
            last_voiced_at: None,
        }
    }

    /// Fold a new matched detection into the identity.
    pub fn mark_seen(&mut self, detection: &Detection, features: FeatureVector, now: f64) {
        self.last_seen = now;
        self.centroid = detection.centroid;
        self.class_id = detection.class_id;
        self.features = features;
        self.external_track_id = detection.external_track_id;
    }

    /// Seconds since the identity was last observed.
    pub fn unseen_for(&self, now: f64) -> f64 {
        now - self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, FrameGeometry, RawDetection};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn sample_detection() -> Detection {
        let geometry = FrameGeometry::new(640.0, 480.0).unwrap();
        let raw = RawDetection::new(2, BoundingBox::new(100.0, 100.0, 40.0, 40.0), 0.9);
        Detection::from_raw(&StreamId::new("camA"), raw, &geometry, 1.0)
    }

    // ===== Identity issuing =====

    #[test]
    fn test_counter_is_monotonic() {
        let counter = IdentityCounter::new();
        let a = counter.next_id();
        let b = counter.next_id();
        let c = counter.next_id();

        assert_eq!(a.value(), 0);
        assert_eq!(b.value(), 1);
        assert_eq!(c.value(), 2);
        assert_eq!(counter.issued(), 3);
    }

    #[test]
    fn test_separate_counters_are_independent() {
        let first = IdentityCounter::new();
        let second = IdentityCounter::new();
        first.next_id();
        first.next_id();

        assert_eq!(second.next_id().value(), 0);
    }

    // ===== Concurrent access tests =====

    #[test]
    fn test_counter_concurrent_ids_are_unique() {
        let counter = Arc::new(IdentityCounter::new());
        let num_threads = 10;
        let ids_per_thread = 100;

        let mut handles = vec![];

        for _ in 0..num_threads {
            let counter_clone = Arc::clone(&counter);
            let handle = thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..ids_per_thread {
                    ids.push(counter_clone.next_id());
                }
                ids
            });
            handles.push(handle);
        }

        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }

        let unique_ids: HashSet<_> = all_ids.iter().cloned().collect();
        assert_eq!(
            all_ids.len(),
            unique_ids.len(),
            "All concurrently issued identities should be unique"
        );
        assert_eq!(all_ids.len(), num_threads * ids_per_thread);
        assert_eq!(counter.issued(), (num_threads * ids_per_thread) as u64);
    }

    // ===== TrackedObject bookkeeping =====

    #[test]
    fn test_new_object_starts_unvoiced() {
        let detection = sample_detection();
        let obj = TrackedObject::new(ObjectId::from_raw(5), &detection, FeatureVector::default(), 1.0);

        assert_eq!(obj.id.value(), 5);
        assert_eq!(obj.class_id, 2);
        assert!(!obj.voiced);
        assert_eq!(obj.last_voiced_at, None);
        assert_eq!(obj.created_at, 1.0);
    }

    #[test]
    fn test_mark_seen_updates_observation() {
        let detection = sample_detection();
        let mut obj =
            TrackedObject::new(ObjectId::from_raw(0), &detection, FeatureVector::default(), 1.0);

        let geometry = FrameGeometry::new(640.0, 480.0).unwrap();
        let raw = RawDetection::new(7, BoundingBox::new(200.0, 150.0, 40.0, 40.0), 0.8)
            .with_track_id(11);
        let next = Detection::from_raw(&StreamId::new("camA"), raw, &geometry, 2.0);
        let features = FeatureVector::default().with_speed(0.5);

        obj.mark_seen(&next, features, 2.0);

        assert_eq!(obj.last_seen, 2.0);
        assert_eq!(obj.created_at, 1.0, "creation time never moves");
        assert_eq!(obj.class_id, 7);
        assert_eq!(obj.external_track_id, Some(11));
        assert_eq!(obj.features.speed, 0.5);
        assert_eq!(obj.centroid, Point2::new(220.0, 170.0));
    }

    #[test]
    fn test_unseen_for() {
        let detection = sample_detection();
        let obj = TrackedObject::new(ObjectId::from_raw(0), &detection, FeatureVector::default(), 1.0);
        assert_eq!(obj.unseen_for(4.5), 3.5);
    }
}
