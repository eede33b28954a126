//! Segment payloads: the in-memory dataset and its serializable body

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ColumnValue;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Value of one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellValue {
    Null,
    Int(i64),
    Double(f64),
}

/// One axis of a dataset: a column and its distinct keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAxis {
    column: String,
    keys: Vec<ColumnValue>,
}

impl SegmentAxis {
    /// Keys are sorted and de-duplicated; a cell's coordinate on this axis is the key's ordinal
    pub fn new(column: impl Into<String>, keys: impl IntoIterator<Item = ColumnValue>) -> Self {
        let mut keys: Vec<ColumnValue> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        Self {
            column: column.into(),
            keys,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn keys(&self) -> &[ColumnValue] {
        &self.keys
    }

    fn ordinal(&self, key: &ColumnValue) -> Option<u32> {
        self.keys.binary_search(key).ok().map(|i| i as u32)
    }
}

/// Cell values and axis metadata of a resolved segment
///
/// Built by whoever computed the segment, then moved into a
/// [`SegmentWithData`](super::SegmentWithData), after which it is read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDataset {
    axes: Vec<SegmentAxis>,
    cells: HashMap<Vec<u32>, CellValue>,
}

impl SegmentDataset {
    pub fn new(axes: Vec<SegmentAxis>) -> Self {
        Self {
            axes,
            cells: HashMap::new(),
        }
    }

    pub fn axes(&self) -> &[SegmentAxis] {
        &self.axes
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Set the cell at `coordinates` (one key per axis, in axis order)
    pub fn insert(&mut self, coordinates: &[ColumnValue], value: CellValue) -> CoordinatorResult<()> {
        let ordinals = self
            .ordinals(coordinates)
            .ok_or_else(|| CoordinatorError::InvalidDataset(format!("no such cell: {:?}", coordinates)))?;
        self.cells.insert(ordinals, value);
        Ok(())
    }

    pub fn get(&self, coordinates: &[ColumnValue]) -> Option<&CellValue> {
        self.ordinals(coordinates).and_then(|ordinals| self.cells.get(&ordinals))
    }

    fn ordinals(&self, coordinates: &[ColumnValue]) -> Option<Vec<u32>> {
        if coordinates.len() != self.axes.len() {
            return None;
        }
        self.axes
            .iter()
            .zip(coordinates)
            .map(|(axis, key)| axis.ordinal(key))
            .collect()
    }
}

/// Serializable form of a dataset, as stored by an external cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBody {
    pub axes: Vec<SegmentAxis>,
    pub cells: Vec<(Vec<u32>, CellValue)>,
}

impl From<&SegmentDataset> for SegmentBody {
    fn from(dataset: &SegmentDataset) -> Self {
        let mut cells: Vec<(Vec<u32>, CellValue)> =
            dataset.cells.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            axes: dataset.axes.clone(),
            cells,
        }
    }
}

impl TryFrom<SegmentBody> for SegmentDataset {
    type Error = CoordinatorError;

    /// Rejects bodies whose axis keys are not strictly increasing or whose
    /// cell coordinates do not fit the axes
    fn try_from(body: SegmentBody) -> Result<Self, Self::Error> {
        if let Some(axis) = body.axes.iter().find(|axis| !axis.keys.windows(2).all(|w| w[0] < w[1])) {
            return Err(CoordinatorError::InvalidDataset(format!(
                "axis '{}' keys are not sorted and distinct",
                axis.column
            )));
        }
        let mut cells = HashMap::with_capacity(body.cells.len());
        for (ordinals, value) in body.cells {
            let fits = ordinals.len() == body.axes.len()
                && ordinals
                    .iter()
                    .zip(&body.axes)
                    .all(|(ordinal, axis)| (*ordinal as usize) < axis.keys.len());
            if !fits {
                return Err(CoordinatorError::InvalidDataset(format!(
                    "cell {:?} does not fit {} axes",
                    ordinals,
                    body.axes.len()
                )));
            }
            cells.insert(ordinals, value);
        }
        Ok(Self { axes: body.axes, cells })
    }
}
