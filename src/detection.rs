//! Detection ingest: raw per-frame boxes normalized into tracker input.

use std::fmt;
use std::sync::Arc;

use nalgebra::Point2;

use crate::{Error, Result};

/// Identifier of one input stream (camera, file, ...).
///
/// Cheap to clone and hashable; every [`Detection`] and every tracked
/// identity is tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    /// Create a stream id from any string-like value.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The stream name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Pixel dimensions of the frames a stream produces.
///
/// All geometric features (azimuth, elevation, distance, speed) are
/// normalized against this, so it is validated once at stream-open time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    width: f64,
    height: f64,
}

impl FrameGeometry {
    /// Create a frame geometry.
    ///
    /// # Arguments
    /// * `width` - Frame width in pixels, must be finite and positive
    /// * `height` - Frame height in pixels, must be finite and positive
    ///
    /// # Returns
    /// The validated geometry, or [`Error::InvalidGeometry`]
    pub fn new(width: f64, height: f64) -> Result<Self> {
        if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
            return Err(Error::InvalidGeometry(format!(
                "frame dimensions must be finite and positive, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Frame width in pixels.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Total frame area in square pixels.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// The longer frame side, used to normalize pixel displacements.
    pub fn longest_side(&self) -> f64 {
        self.width.max(self.height)
    }

    /// Clamp a point into the frame rectangle.
    pub fn clamp_point(&self, point: Point2<f64>) -> Point2<f64> {
        Point2::new(point.x.clamp(0.0, self.width), point.y.clamp(0.0, self.height))
    }
}

/// Axis-aligned box in pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Box width, never negative.
    pub width: f64,
    /// Box height, never negative.
    pub height: f64,
}

impl BoundingBox {
    /// Create a bounding box, flooring negative extents at zero.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Build a box from corner coordinates.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    /// Center of the box.
    pub fn centroid(&self) -> Point2<f64> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Box area in square pixels.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Intersect the box with the frame rectangle.
    ///
    /// A box entirely outside the frame collapses to a zero-area box on
    /// the nearest frame edge.
    pub fn clamped_to(&self, geometry: &FrameGeometry) -> BoundingBox {
        let x1 = self.x.clamp(0.0, geometry.width());
        let y1 = self.y.clamp(0.0, geometry.height());
        let x2 = (self.x + self.width).clamp(0.0, geometry.width());
        let y2 = (self.y + self.height).clamp(0.0, geometry.height());
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// A detected object exactly as the upstream detector reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Detector class id.
    pub class_id: i64,

    /// Reported box, possibly spilling outside the frame.
    pub bbox: BoundingBox,

    /// Detector confidence, possibly outside [0, 1].
    pub confidence: f64,

    /// Track id assigned by the upstream detector, if it runs its own
    /// tracker. Honored as an association hint, never as an identity.
    pub external_track_id: Option<i64>,
}

impl RawDetection {
    /// Create a raw detection with no upstream track id.
    pub fn new(class_id: i64, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            class_id,
            bbox,
            confidence,
            external_track_id: None,
        }
    }

    /// Attach the upstream detector's track id.
    pub fn with_track_id(mut self, track_id: i64) -> Self {
        self.external_track_id = Some(track_id);
        self
    }
}

/// A normalized detection, ready for association and feature extraction.
///
/// Normalization clamps everything into the frame so downstream stages
/// never see out-of-range geometry: the centroid and the analyzer region
/// both lie inside the frame rectangle, and confidence lies in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Stream this detection belongs to.
    pub stream: StreamId,

    /// Detector class id, carried through to the score record.
    pub class_id: i64,

    /// The reported box with extents floored at zero.
    pub bbox: BoundingBox,

    /// The reported box intersected with the frame; analyzer input.
    pub region: BoundingBox,

    /// Box centroid clamped into the frame.
    pub centroid: Point2<f64>,

    /// Detector confidence clamped to [0, 1].
    pub confidence: f64,

    /// Capture time of the frame, in seconds.
    pub timestamp: f64,

    /// Upstream track id hint, if any.
    pub external_track_id: Option<i64>,
}

impl Detection {
    /// Normalize one raw detection.
    ///
    /// # Arguments
    /// * `stream` - Stream the frame came from
    /// * `raw` - Detection as reported upstream
    /// * `geometry` - Validated frame dimensions
    /// * `timestamp` - Frame capture time in seconds
    pub fn from_raw(
        stream: &StreamId,
        raw: RawDetection,
        geometry: &FrameGeometry,
        timestamp: f64,
    ) -> Self {
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            stream: stream.clone(),
            class_id: raw.class_id,
            region: raw.bbox.clamped_to(geometry),
            centroid: geometry.clamp_point(raw.bbox.centroid()),
            bbox: raw.bbox,
            confidence,
            timestamp,
            external_track_id: raw.external_track_id,
        }
    }
}

/// Normalize a whole frame's worth of raw detections.
pub fn normalize_frame(
    stream: &StreamId,
    raw: impl IntoIterator<Item = RawDetection>,
    geometry: &FrameGeometry,
    timestamp: f64,
) -> Vec<Detection> {
    raw.into_iter()
        .map(|r| Detection::from_raw(stream, r, geometry, timestamp))
        .collect()
}
