//! Tabular per-object measurements.
//!
//! [`Counts`] pairs an `obs` table (one row per measured object, e.g. a cell)
//! with a `var` table (one row per measured variable). Both are [`Table`]s: a
//! string index plus named, typed columns as long as the index.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::bits;

// =============================================================================
// Column
// =============================================================================

/// A typed column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum Column {
    Float(#[serde(with = "bits::vec")] Vec<f64>),
    Int(Vec<i64>),
    Str(Vec<String>),
    Bool(Vec<bool>),
}

impl Column {
    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the column type.
    pub const fn kind(&self) -> &'static str {
        match self {
            Column::Float(_) => "float",
            Column::Int(_) => "int",
            Column::Str(_) => "str",
            Column::Bool(_) => "bool",
        }
    }

    fn empty_like(&self) -> Self {
        match self {
            Column::Float(_) => Column::Float(Vec::new()),
            Column::Int(_) => Column::Int(Vec::new()),
            Column::Str(_) => Column::Str(Vec::new()),
            Column::Bool(_) => Column::Bool(Vec::new()),
        }
    }

    /// Keep the values whose flag in `keep` is set.
    fn retain(&mut self, keep: &[bool]) {
        fn filter<T>(values: &mut Vec<T>, keep: &[bool]) {
            let mut flags = keep.iter();
            values.retain(|_| flags.next().copied().unwrap_or(false));
        }
        match self {
            Column::Float(v) => filter(v, keep),
            Column::Int(v) => filter(v, keep),
            Column::Str(v) => filter(v, keep),
            Column::Bool(v) => filter(v, keep),
        }
    }

    /// Overwrite the values at `positions` with `other`, in order.
    fn assign(&mut self, positions: &[usize], other: Column) -> Result<(), StoreError> {
        fn put<T>(values: &mut [T], positions: &[usize], new: Vec<T>) {
            for (&at, value) in positions.iter().zip(new) {
                values[at] = value;
            }
        }
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => put(a, positions, b),
            (Column::Int(a), Column::Int(b)) => put(a, positions, b),
            (Column::Str(a), Column::Str(b)) => put(a, positions, b),
            (Column::Bool(a), Column::Bool(b)) => put(a, positions, b),
            (a, b) => {
                return Err(StoreError::TypeMismatch {
                    expected: a.kind().to_string(),
                    actual: b.kind().to_string(),
                })
            }
        }
        Ok(())
    }

    fn extend(&mut self, other: Column) -> Result<(), StoreError> {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend(b),
            (Column::Int(a), Column::Int(b)) => a.extend(b),
            (Column::Str(a), Column::Str(b)) => a.extend(b),
            (Column::Bool(a), Column::Bool(b)) => a.extend(b),
            (a, b) => {
                return Err(StoreError::TypeMismatch {
                    expected: a.kind().to_string(),
                    actual: b.kind().to_string(),
                })
            }
        }
        Ok(())
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => bits::slices_eq(a, b),
            (Column::Int(a), Column::Int(b)) => a == b,
            (Column::Str(a), Column::Str(b)) => a == b,
            (Column::Bool(a), Column::Bool(b)) => a == b,
            _ => false,
        }
    }
}

// =============================================================================
// Table
// =============================================================================

/// A table with a unique string index and typed columns.
///
/// An empty table (no rows, no columns) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    index: Vec<String>,
    columns: Vec<(String, Column)>,
    /// Row id → position; rebuilt on demand after decoding
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.columns == other.columns
    }
}

impl Table {
    /// Create a table with the given row ids and no columns.
    ///
    /// Fails with `InvalidKey` on an empty id and `DuplicateKey` on a repeated one.
    pub fn new(index: Vec<String>) -> Result<Self, StoreError> {
        check_index(&index)?;
        Ok(Self {
            index,
            columns: Vec::new(),
            positions: HashMap::new(),
        })
    }

    /// Builder form of [`add_column`](Self::add_column).
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self, StoreError> {
        self.add_column(name, column)?;
        Ok(self)
    }

    /// Add a column; it must be as long as the index.
    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> Result<(), StoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::InvalidKey(name));
        }
        if self.column(&name).is_some() {
            return Err(StoreError::DuplicateKey(name));
        }
        if column.len() != self.index.len() {
            return Err(StoreError::ShapeMismatch {
                expected: format!("{} values", self.index.len()),
                actual: format!("{} values in column '{}'", column.len(), name),
            });
        }
        self.columns.push((name, column));
        Ok(())
    }

    /// Row ids.
    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Columns in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Whether the table has neither rows nor columns.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.columns.is_empty()
    }

    /// Append the rows of `other`.
    ///
    /// Appending to an empty table adopts `other`'s columns. Otherwise both
    /// tables must have the same column names, order and types, and the new
    /// row ids must not already be present. On error `self` is unchanged.
    pub fn append(&mut self, other: Table) -> Result<(), StoreError> {
        self.replace_rows(&[], other)
    }

    /// Replace the rows `old` with the rows of `other`.
    ///
    /// Ids in `old` that are not present are ignored. When `other` carries
    /// exactly the ids of `old`, in the same order, the rows are overwritten
    /// in place; otherwise the old rows are dropped and the new ones
    /// appended. The rules of [`append`](Self::append) apply to the rows
    /// that remain. On error `self` is unchanged.
    pub fn replace_rows(&mut self, old: &[String], other: Table) -> Result<(), StoreError> {
        if self.is_empty() {
            *self = other;
            self.positions.clear();
            return Ok(());
        }

        let ours = self.column_names();
        let theirs = other.column_names();
        if ours != theirs {
            return Err(StoreError::ShapeMismatch {
                expected: format!("columns {:?}", ours),
                actual: format!("columns {:?}", theirs),
            });
        }
        for ((name, a), (_, b)) in self.columns.iter().zip(&other.columns) {
            if a.kind() != b.kind() {
                return Err(StoreError::TypeMismatch {
                    expected: format!("{} column '{}'", a.kind(), name),
                    actual: b.kind().to_string(),
                });
            }
        }
        check_index(&other.index)?;

        self.sync_positions();
        let replaced: Vec<&String> = old
            .iter()
            .filter(|id| self.positions.contains_key(id.as_str()))
            .collect();
        let freed: HashSet<&str> = replaced.iter().map(|id| id.as_str()).collect();
        if let Some(dup) = other
            .index
            .iter()
            .find(|id| self.positions.contains_key(id.as_str()) && !freed.contains(id.as_str()))
        {
            return Err(StoreError::DuplicateKey(dup.clone()));
        }

        if !replaced.is_empty() && replaced.iter().copied().eq(other.index.iter()) {
            let at: Vec<usize> = replaced.iter().map(|id| self.positions[id.as_str()]).collect();
            for ((_, a), (_, b)) in self.columns.iter_mut().zip(other.columns) {
                a.assign(&at, b)?;
            }
            return Ok(());
        }

        if !freed.is_empty() {
            let keep: Vec<bool> = self.index.iter().map(|id| !freed.contains(id.as_str())).collect();
            let mut flags = keep.iter();
            self.index.retain(|_| flags.next().copied().unwrap_or(false));
            for (_, column) in &mut self.columns {
                column.retain(&keep);
            }
            self.positions.clear();
        }

        let base = self.index.len();
        self.index.extend(other.index);
        for ((_, a), (_, b)) in self.columns.iter_mut().zip(other.columns) {
            a.extend(b)?;
        }
        if self.positions.len() == base {
            for (i, id) in self.index[base..].iter().enumerate() {
                self.positions.insert(id.clone(), base + i);
            }
        }
        self.sync_positions();
        Ok(())
    }

    /// Rebuild the id lookup if it is out of step with the index.
    fn sync_positions(&mut self) {
        if self.positions.len() != self.index.len() {
            self.positions = self
                .index
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), i))
                .collect();
        }
    }

    /// A table with the same columns and no rows.
    pub fn empty_like(&self) -> Self {
        Self {
            index: Vec::new(),
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.empty_like()))
                .collect(),
            positions: HashMap::new(),
        }
    }

    /// Check the table invariants (used on decoded input).
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        check_index(&self.index)?;
        for (i, (name, column)) in self.columns.iter().enumerate() {
            if name.is_empty() {
                return Err(StoreError::InvalidKey(name.clone()));
            }
            if self.columns[..i].iter().any(|(n, _)| n == name) {
                return Err(StoreError::DuplicateKey(name.clone()));
            }
            if column.len() != self.index.len() {
                return Err(StoreError::ShapeMismatch {
                    expected: format!("{} values", self.index.len()),
                    actual: format!("{} values in column '{}'", column.len(), name),
                });
            }
        }
        Ok(())
    }
}

fn check_index(index: &[String]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(index.len());
    for id in index {
        if id.is_empty() {
            return Err(StoreError::InvalidKey(id.clone()));
        }
        if !seen.insert(id.as_str()) {
            return Err(StoreError::DuplicateKey(id.clone()));
        }
    }
    Ok(())
}

// =============================================================================
// Counts
// =============================================================================

/// Per-object measurements of a slide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counts {
    /// One row per object
    pub obs: Table,
    /// One row per variable
    pub var: Table,
}

impl Counts {
    pub fn new(obs: Table, var: Table) -> Self {
        Self { obs, var }
    }

    /// Encode as a JSON blob.
    pub(crate) fn to_blob(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self)
            .map_err(|e| StoreError::CorruptContainer(format!("encoding counts: {}", e)))
    }

    /// Decode and validate a JSON blob.
    pub(crate) fn from_blob(bytes: &[u8]) -> Result<Self, StoreError> {
        let counts: Counts = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptContainer(format!("counts blob: {}", e)))?;
        counts.obs.validate()?;
        counts.var.validate()?;
        Ok(counts)
    }
}
