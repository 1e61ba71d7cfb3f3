//! Score record emission.
//!
//! One CSV row per object per frame, in a fixed column order with fixed
//! per-column rounding, so identical runs produce byte-identical files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::detection::StreamId;
use crate::features::FeatureVector;
use crate::tracked_object::ObjectId;
use crate::{Error, Result};

/// Column header without the optional shape column.
pub const CSV_HEADER: &str = "t,stream,oid,cls,az,el,dist,spd,conf,glitch,hue,sat,val,edge";

/// Column header with the optional shape column.
pub const CSV_HEADER_WITH_SHAPE: &str =
    "t,stream,oid,cls,az,el,dist,spd,conf,glitch,hue,sat,val,edge,shape";

/// One object's sonification state for one frame.
///
/// The `voiced` flag is in-process metadata for consumers holding the
/// report; it is not a CSV column.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    /// Frame timestamp in seconds.
    pub timestamp: f64,
    /// Stream the object lives on.
    pub stream: StreamId,
    /// Persistent identity.
    pub object_id: ObjectId,
    /// Detector class id.
    pub class_id: i64,
    /// Feature vector with speed already injected.
    pub features: FeatureVector,
    /// Detection confidence for this frame.
    pub confidence: f64,
    /// Whether the identity held a voiced slot this frame.
    pub voiced: bool,
}

impl ScoreRecord {
    /// Render the record as one CSV row, without a trailing newline.
    ///
    /// Rounding per column: timestamp to 3 decimals, angles to 2,
    /// distance/speed/confidence/glitch to 3, hue to 1, the remaining
    /// unit-range columns to 3.
    pub fn to_csv_row(&self, shape: bool) -> String {
        let f = &self.features;
        let mut row = format!(
            "{:.3},{},{},{},{:.2},{:.2},{:.3},{:.3},{:.3},{:.3},{:.1},{:.3},{:.3},{:.3}",
            self.timestamp,
            self.stream,
            self.object_id,
            self.class_id,
            f.azimuth,
            f.elevation,
            f.distance,
            f.speed,
            self.confidence,
            f.glitch,
            f.hue,
            f.saturation,
            f.value,
            f.edge_density,
        );
        if shape {
            row.push_str(&format!(",{:.3}", f.shape_score));
        }
        row
    }
}

/// CSV writer for score records.
///
/// Writes the header once at construction and buffers rows until
/// [`ScoreWriter::flush`] or drop. Generic over the sink so tests can
/// capture output in memory.
pub struct ScoreWriter<W: Write> {
    writer: W,
    shape: bool,
}

impl ScoreWriter<BufWriter<File>> {
    /// Create a buffered writer over a new file at `path`.
    ///
    /// # Arguments
    /// * `path` - Output file, truncated if it exists
    /// * `shape` - Emit the optional shape column
    pub fn create<P: AsRef<Path>>(path: P, shape: bool) -> Result<Self> {
        let file = File::create(path.as_ref()).map_err(Error::Io)?;
        Self::new(BufWriter::new(file), shape)
    }
}

impl<W: Write> ScoreWriter<W> {
    /// Wrap a sink and write the header row.
    pub fn new(mut writer: W, shape: bool) -> Result<Self> {
        let header = if shape { CSV_HEADER_WITH_SHAPE } else { CSV_HEADER };
        writeln!(writer, "{header}").map_err(Error::Io)?;
        Ok(Self { writer, shape })
    }

    /// Append one record.
    pub fn write_record(&mut self, record: &ScoreRecord) -> Result<()> {
        writeln!(self.writer, "{}", record.to_csv_row(self.shape)).map_err(Error::Io)
    }

    /// Append a frame's records in the order given.
    pub fn write_frame(&mut self, records: &[ScoreRecord]) -> Result<()> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Flush buffered rows to the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(Error::Io)
    }
}

impl<W: Write> Drop for ScoreWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
