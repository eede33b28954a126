//! Regions of cached data invalidated by source-data changes
//!
//! Deciding which segments a change touches is the caller's business; the
//! coordinator only asks a region whether it matches a header.

use std::collections::{BTreeMap, BTreeSet};

use crate::segment::{ColumnValue, SegmentHeader};

/// A predicate over segment headers
pub trait CacheRegion: Send + 'static {
    fn matches(&self, header: &SegmentHeader) -> bool;
}

impl<F> CacheRegion for F
where
    F: Fn(&SegmentHeader) -> bool + Send + 'static,
{
    fn matches(&self, header: &SegmentHeader) -> bool {
        self(header)
    }
}

/// Cells of one star, optionally narrowed to a measure and to column values
///
/// A header matches when it is on the same star (and measure, if given) and,
/// for every column the region names, the header either leaves that column
/// unconstrained or shares at least one value with the region.
#[derive(Debug, Clone)]
pub struct StarRegion {
    star: String,
    measure: Option<String>,
    columns: BTreeMap<String, BTreeSet<ColumnValue>>,
}

impl StarRegion {
    pub fn new(star: impl Into<String>) -> Self {
        Self {
            star: star.into(),
            measure: None,
            columns: BTreeMap::new(),
        }
    }

    pub fn measure(mut self, measure: impl Into<String>) -> Self {
        self.measure = Some(measure.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>, values: impl IntoIterator<Item = ColumnValue>) -> Self {
        self.columns.entry(column.into()).or_default().extend(values);
        self
    }
}

impl CacheRegion for StarRegion {
    fn matches(&self, header: &SegmentHeader) -> bool {
        if header.star() != self.star {
            return false;
        }
        if let Some(measure) = &self.measure
            && header.measure() != measure
        {
            return false;
        }
        self.columns.iter().all(|(column, values)| match header.constraint(column) {
            Some(Some(constrained)) => !constrained.is_disjoint(values),
            Some(None) | None => true,
        })
    }
}
