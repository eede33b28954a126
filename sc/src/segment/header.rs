//! Content-addressable segment key

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ColumnValue, ConstrainedColumn, Segment};

/// Serializable key derived from a segment's identifying attributes
///
/// Columns and predicates are held in sorted collections, so the order in
/// which a segment's constraints were declared does not affect equality,
/// hashing or the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SegmentHeader {
    star: String,
    measure: String,
    columns: BTreeMap<String, Option<BTreeSet<ColumnValue>>>,
    compound_predicates: BTreeSet<String>,
}

impl SegmentHeader {
    pub fn for_segment(segment: &Segment) -> Self {
        Self {
            star: segment.star().to_string(),
            measure: segment.measure().to_string(),
            columns: segment
                .columns()
                .iter()
                .map(|c| (c.column.clone(), c.values.clone()))
                .collect(),
            compound_predicates: segment.compound_predicates().map(str::to_string).collect(),
        }
    }

    pub fn star(&self) -> &str {
        &self.star
    }

    pub fn measure(&self) -> &str {
        &self.measure
    }

    /// Constrained columns in column-name order
    pub fn columns(&self) -> impl Iterator<Item = ConstrainedColumn> + '_ {
        self.columns.iter().map(|(column, values)| ConstrainedColumn {
            column: column.clone(),
            values: values.clone(),
        })
    }

    /// The constraint on `column`: `None` if the column is not an axis,
    /// `Some(None)` if it is an unrestricted axis
    pub fn constraint(&self, column: &str) -> Option<Option<&BTreeSet<ColumnValue>>> {
        self.columns.get(column).map(Option::as_ref)
    }

    pub fn compound_predicates(&self) -> impl Iterator<Item = &str> {
        self.compound_predicates.iter().map(String::as_str)
    }

    /// Canonical string form, usable as a key by external caches
    pub fn cache_key(&self) -> String {
        // Sorted collections make the JSON canonical
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.star, self.measure)?;
        write!(f, "{{")?;
        for (i, (column, values)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match values {
                Some(values) => {
                    let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                    write!(f, "{}=[{}]", column, rendered.join(", "))?;
                }
                None => write!(f, "{}=*", column)?,
            }
        }
        write!(f, "}}")?;
        for predicate in &self.compound_predicates {
            write!(f, " & ({})", predicate)?;
        }
        Ok(())
    }
}
