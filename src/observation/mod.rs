//! Observation records and the column-oriented data boundary

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when reading columns out of a data table
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Column '{column}' has the wrong type: expected {expected}")]
    TypeMismatch { column: String, expected: String },

    #[error("Ragged table: column '{column}' has {actual} rows, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// Atom indices into the molecular topology that define one observable.
/// The arity is fixed by the observable family: one atom for chemical
/// shifts and protection factors, two for distances, four for couplings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomIndices {
    Single(usize),
    Pair(usize, usize),
    Quad(usize, usize, usize, usize),
}

impl AtomIndices {
    /// Number of atoms defining the observable
    pub fn arity(&self) -> usize {
        match self {
            AtomIndices::Single(_) => 1,
            AtomIndices::Pair(_, _) => 2,
            AtomIndices::Quad(_, _, _, _) => 4,
        }
    }
}

/// One experimental/predicted pair for a single conformation.
///
/// `weight` defaults to 1.0 and is overwritten during ingestion for
/// records that share an equivalency group (each member gets
/// `1/|group|`, so the group contributes one effective degree of
/// freedom). The ambiguity group is stored for posterior resampling by
/// the external sampler and never resolved here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Topology atom indices defining this observable
    pub atoms: AtomIndices,

    /// Measured value
    pub exp: f64,

    /// Model-predicted value for this conformation
    pub model: f64,

    /// Tag shared by chemically equivalent records
    pub equivalency_group: Option<i64>,

    /// Tag shared by ambiguously assigned records
    pub ambiguity_group: Option<i64>,

    /// Effective weight in the SSE
    pub weight: f64,
}

impl Observation {
    /// Create a record with the default weight of 1.0
    pub fn new(atoms: AtomIndices, exp: f64, model: f64) -> Self {
        Self {
            atoms,
            exp,
            model,
            equivalency_group: None,
            ambiguity_group: None,
            weight: 1.0,
        }
    }

    /// Attach an equivalency-group tag
    pub fn with_equivalency_group(mut self, group: i64) -> Self {
        self.equivalency_group = Some(group);
        self
    }

    /// Attach an ambiguity-group tag
    pub fn with_ambiguity_group(mut self, group: i64) -> Self {
        self.ambiguity_group = Some(group);
        self
    }
}

/// A single typed column of tabular data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
        }
    }
}

/// Column-oriented numeric data handed over by the external tabular
/// loader. Each observable family pulls its required columns by name;
/// integer columns coerce to float on demand, but not the reverse.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: HashMap<String, Column>,
    rows: usize,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a column, enforcing a rectangular table
    pub fn insert(&mut self, name: &str, column: Column) -> Result<(), TableError> {
        if self.columns.is_empty() {
            self.rows = column.len();
        } else if column.len() != self.rows {
            return Err(TableError::RaggedColumn {
                column: name.to_string(),
                expected: self.rows,
                actual: column.len(),
            });
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether the named column is present
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Integer column by name
    pub fn ints(&self, name: &str) -> Result<&[i64], TableError> {
        match self.columns.get(name) {
            Some(Column::Int(v)) => Ok(v),
            Some(Column::Float(_)) => Err(TableError::TypeMismatch {
                column: name.to_string(),
                expected: "integer".to_string(),
            }),
            None => Err(TableError::MissingColumn(name.to_string())),
        }
    }

    /// Float column by name; integer columns are widened
    pub fn floats(&self, name: &str) -> Result<Vec<f64>, TableError> {
        match self.columns.get(name) {
            Some(Column::Float(v)) => Ok(v.clone()),
            Some(Column::Int(v)) => Ok(v.iter().map(|&x| x as f64).collect()),
            None => Err(TableError::MissingColumn(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_table() -> DataTable {
        let mut table = DataTable::new();
        table
            .insert("atom_index1", Column::Int(vec![3, 7, 12]))
            .unwrap();
        table
            .insert("exp", Column::Float(vec![1.0, 2.5, 0.3]))
            .unwrap();
        table
            .insert("model", Column::Float(vec![1.1, 2.4, 0.4]))
            .unwrap();
        table
    }

    #[test]
    fn test_typed_column_access() {
        let table = sample_table();

        assert_eq!(table.rows(), 3);
        assert_eq!(table.ints("atom_index1").unwrap(), &[3, 7, 12]);
        assert_approx_eq!(table.floats("exp").unwrap()[1], 2.5);

        // Integer columns widen to float, floats never narrow to int
        assert_approx_eq!(table.floats("atom_index1").unwrap()[2], 12.0);
        assert!(table.ints("exp").is_err());
        assert!(matches!(
            table.ints("missing"),
            Err(TableError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_ragged_column_rejected() {
        let mut table = sample_table();
        let err = table.insert("extra", Column::Float(vec![1.0]));
        assert!(matches!(err, Err(TableError::RaggedColumn { .. })));
    }

    #[test]
    fn test_observation_defaults() {
        let obs = Observation::new(AtomIndices::Pair(1, 4), 3.2, 3.0);
        assert_approx_eq!(obs.weight, 1.0);
        assert_eq!(obs.atoms.arity(), 2);
        assert!(obs.equivalency_group.is_none());
        assert!(obs.ambiguity_group.is_none());

        let grouped = obs.with_equivalency_group(5).with_ambiguity_group(2);
        assert_eq!(grouped.equivalency_group, Some(5));
        assert_eq!(grouped.ambiguity_group, Some(2));
    }
}
