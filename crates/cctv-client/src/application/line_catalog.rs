//! LineCatalog: the client's copy of the lines configured on the server.
//!
//! The server is the source of truth.  The catalog is replaced wholesale
//! whenever a `DetectionLinesReceived` or `RoadLinesReceived` event arrives,
//! so it always mirrors the last full listing.

use std::collections::BTreeMap;
use std::fmt;

use cctv_core::protocol::messages::{DetectionLine, RoadLine};
use cctv_core::Event;
use thiserror::Error;
use tracing::{debug, warn};

/// Number of cells in the calibration matrix road-line endpoints refer to.
pub const MATRIX_CELLS: i32 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("line index must be 1 or greater, got {0}")]
    InvalidIndex(u32),
    #[error("matrix cell must be 1..={MATRIX_CELLS}, got {0}")]
    InvalidMatrixCell(i32),
}

/// 1-based line number as used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineIndex(u32);

impl LineIndex {
    pub fn new(index: u32) -> Result<Self, LineError> {
        if index == 0 {
            return Err(LineError::InvalidIndex(index));
        }
        Ok(Self(index))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LineIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A calibration matrix cell, 1 through [`MATRIX_CELLS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixCell(i32);

impl MatrixCell {
    pub fn new(cell: i32) -> Result<Self, LineError> {
        if !(1..=MATRIX_CELLS).contains(&cell) {
            return Err(LineError::InvalidMatrixCell(cell));
        }
        Ok(Self(cell))
    }

    /// Start cell of road line `i` (0-based) in a batch: cycles 1, 2, 3, 4.
    pub fn for_road_line_start(i: usize) -> Self {
        Self((i % MATRIX_CELLS as usize) as i32 + 1)
    }

    /// End cell of road line `i`: always the cell after the start cell.
    pub fn for_road_line_end(i: usize) -> Self {
        Self::for_road_line_start(i + 1)
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

/// Last known road and detection lines, keyed by index.
#[derive(Debug, Default, Clone)]
pub struct LineCatalog {
    road: BTreeMap<LineIndex, RoadLine>,
    detection: BTreeMap<LineIndex, DetectionLine>,
    road_synced: bool,
    detection_synced: bool,
}

impl LineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the catalog from a dispatcher event.
    ///
    /// Returns `true` if the event was a line listing.  Lines with index 0
    /// are dropped with a warning.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::RoadLinesReceived(lines) => {
                self.road = index_lines(lines.iter().map(|l| (l.index, l.clone())), "road");
                self.road_synced = true;
                debug!("road line catalog now holds {} line(s)", self.road.len());
                true
            }
            Event::DetectionLinesReceived(lines) => {
                self.detection =
                    index_lines(lines.iter().map(|l| (l.index, l.clone())), "detection");
                self.detection_synced = true;
                debug!(
                    "detection line catalog now holds {} line(s)",
                    self.detection.len()
                );
                true
            }
            _ => false,
        }
    }

    pub fn road_line(&self, index: LineIndex) -> Option<&RoadLine> {
        self.road.get(&index)
    }

    pub fn detection_line(&self, index: LineIndex) -> Option<&DetectionLine> {
        self.detection.get(&index)
    }

    /// Road lines in index order.
    pub fn road_lines(&self) -> impl Iterator<Item = &RoadLine> {
        self.road.values()
    }

    /// Detection lines in index order.
    pub fn detection_lines(&self) -> impl Iterator<Item = &DetectionLine> {
        self.detection.values()
    }

    /// Whether both listings have been received at least once.
    pub fn is_synced(&self) -> bool {
        self.road_synced && self.detection_synced
    }

    /// Forgets everything, e.g. after `delete_all_lines`.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn index_lines<T>(
    lines: impl Iterator<Item = (u32, T)>,
    kind: &str,
) -> BTreeMap<LineIndex, T> {
    lines
        .filter_map(|(raw, line)| match LineIndex::new(raw) {
            Ok(index) => Some((index, line)),
            Err(e) => {
                warn!("ignoring {kind} line: {e}");
                None
            }
        })
        .collect()
}
