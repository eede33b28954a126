//! Segment data model
//!
//! A [`Segment`] names a rectangular slice of pre-aggregated fact data: one
//! measure of one star, with a set of constrained columns. A segment never
//! changes after construction. Attaching data yields a separate
//! [`SegmentWithData`], so a placeholder and its resolved form can coexist.

mod dataset;
mod header;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoordinatorError, CoordinatorResult};

pub use dataset::{CellValue, SegmentAxis, SegmentBody, SegmentDataset};
pub use header::SegmentHeader;

/// Identity of one constructed segment
///
/// Two segments built from identical constraints have equal headers but
/// distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(Uuid);

impl SegmentId {
    fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single member value of a constrained column
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "#null"),
            ColumnValue::Bool(b) => write!(f, "{}", b),
            ColumnValue::Int(i) => write!(f, "{}", i),
            ColumnValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

/// A column of the star together with the values it is constrained to
///
/// `values == None` means the column is an axis of the segment but is not
/// restricted (every member is included).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstrainedColumn {
    pub column: String,
    pub values: Option<BTreeSet<ColumnValue>>,
}

impl ConstrainedColumn {
    /// Constrain `column` to the given values
    pub fn new(column: impl Into<String>, values: impl IntoIterator<Item = ColumnValue>) -> Self {
        Self {
            column: column.into(),
            values: Some(values.into_iter().collect()),
        }
    }

    /// Include every member of `column`
    pub fn wildcard(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            values: None,
        }
    }

    /// Whether `value` falls inside this constraint
    pub fn admits(&self, value: &ColumnValue) -> bool {
        match &self.values {
            Some(values) => values.contains(value),
            None => true,
        }
    }
}

/// Identifies a slice of pre-aggregated data; immutable once built
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    star: String,
    measure: String,
    columns: Vec<ConstrainedColumn>,
    compound_predicates: BTreeSet<String>,
}

impl Segment {
    /// Start building a segment of `measure` within `star`
    pub fn builder(star: impl Into<String>, measure: impl Into<String>) -> SegmentBuilder {
        SegmentBuilder {
            star: star.into(),
            measure: measure.into(),
            columns: Vec::new(),
            compound_predicates: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn star(&self) -> &str {
        &self.star
    }

    pub fn measure(&self) -> &str {
        &self.measure
    }

    pub fn columns(&self) -> &[ConstrainedColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ConstrainedColumn> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn compound_predicates(&self) -> impl Iterator<Item = &str> {
        self.compound_predicates.iter().map(String::as_str)
    }

    /// The content-addressable key for this segment's constraints
    pub fn header(&self) -> SegmentHeader {
        SegmentHeader::for_segment(self)
    }

    /// Attach a dataset, producing the resolved form of this segment
    ///
    /// Fails if an axis of the dataset is not a constrained column of the
    /// segment, or carries a key the column's constraint excludes.
    pub fn with_data(self: &Arc<Self>, dataset: SegmentDataset) -> CoordinatorResult<SegmentWithData> {
        debug!(segment_id = %self.id, cells = dataset.len(), "Segment::with_data: called");
        for axis in dataset.axes() {
            let column = self.column(axis.column()).ok_or_else(|| {
                CoordinatorError::InvalidDataset(format!(
                    "axis '{}' is not a constrained column of segment {}",
                    axis.column(),
                    self.id
                ))
            })?;
            if let Some(key) = axis.keys().iter().find(|k| !column.admits(k)) {
                return Err(CoordinatorError::InvalidDataset(format!(
                    "axis '{}' key {} is outside the segment's constraint",
                    axis.column(),
                    key
                )));
            }
        }
        Ok(SegmentWithData {
            segment: Arc::clone(self),
            dataset,
        })
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Segment {}

impl std::hash::Hash for Segment {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment#{} {}", self.id, self.header())
    }
}

/// Builder for [`Segment`]
#[derive(Debug)]
pub struct SegmentBuilder {
    star: String,
    measure: String,
    columns: Vec<ConstrainedColumn>,
    compound_predicates: BTreeSet<String>,
}

impl SegmentBuilder {
    pub fn column(mut self, column: ConstrainedColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a compound predicate, in the canonical textual form of the caller's predicate language
    pub fn compound_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.compound_predicates.insert(predicate.into());
        self
    }

    pub fn build(self) -> CoordinatorResult<Segment> {
        if self.star.trim().is_empty() {
            return Err(CoordinatorError::InvalidSegment("star name is empty".to_string()));
        }
        if self.measure.trim().is_empty() {
            return Err(CoordinatorError::InvalidSegment("measure name is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.column.as_str()) {
                return Err(CoordinatorError::InvalidSegment(format!(
                    "column '{}' is constrained more than once",
                    column.column
                )));
            }
        }

        let segment = Segment {
            id: SegmentId::generate(),
            star: self.star,
            measure: self.measure,
            columns: self.columns,
            compound_predicates: self.compound_predicates,
        };
        debug!(segment_id = %segment.id, star = %segment.star, measure = %segment.measure, "SegmentBuilder::build: built");
        Ok(segment)
    }
}

/// A segment together with its dataset
///
/// Owns its dataset outright; consumers share it read-only behind an `Arc`.
#[derive(Debug)]
pub struct SegmentWithData {
    segment: Arc<Segment>,
    dataset: SegmentDataset,
}

impl SegmentWithData {
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn dataset(&self) -> &SegmentDataset {
        &self.dataset
    }

    pub fn header(&self) -> SegmentHeader {
        self.segment.header()
    }

    /// Look up the cell at the given coordinates, one value per axis in axis order
    pub fn cell(&self, coordinates: &[ColumnValue]) -> Option<&CellValue> {
        self.dataset.get(coordinates)
    }
}
