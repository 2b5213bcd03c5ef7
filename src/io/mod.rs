//! Loading observation tables, state energies and configuration files

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::FamilyConfig;
use crate::ensemble::StateInput;
use crate::grid::Tensor;
use crate::observation::{Column, DataTable, TableError};
use crate::restraint::protection_factor::{ContactCountSource, ContactSourceError};
use log::debug;
use thiserror::Error;

/// Errors that can occur while reading input files
#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Observation filename '{0}' is not of the form <state>.<family>")]
    InvalidFilename(String),
}

/// Read a headered CSV file into a column-oriented table. A column
/// whose every entry parses as an integer becomes an integer column;
/// otherwise every entry must parse as a float.
pub fn read_observation_table<P: AsRef<Path>>(path: P) -> Result<DataTable, IoError> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(IoError::Parse {
                path: path.display().to_string(),
                message: format!(
                    "row has {} fields, header has {}",
                    record.len(),
                    headers.len()
                ),
            });
        }
        for (column, field) in raw.iter_mut().zip(record.iter()) {
            column.push(field.trim().to_string());
        }
    }

    let mut table = DataTable::new();
    for (name, fields) in headers.iter().zip(raw) {
        let column = type_column(&fields).ok_or_else(|| IoError::Parse {
            path: path.display().to_string(),
            message: format!("column '{}' contains a non-numeric entry", name),
        })?;
        table.insert(name, column)?;
    }
    debug!("read {} row(s) from {}", table.rows(), path.display());
    Ok(table)
}

fn type_column(fields: &[String]) -> Option<Column> {
    let ints: Result<Vec<i64>, _> = fields.iter().map(|f| f.parse::<i64>()).collect();
    if let Ok(values) = ints {
        return Some(Column::Int(values));
    }
    let floats: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
    floats.ok().map(Column::Float)
}

/// Split an observation filename stem like `"12.cs_H"` into the state
/// index and the family tag.
pub fn parse_state_tag(name: &str) -> Result<(usize, &str), IoError> {
    let (state, tag) = name
        .split_once('.')
        .ok_or_else(|| IoError::InvalidFilename(name.to_string()))?;
    let state: usize = state
        .parse()
        .map_err(|_| IoError::InvalidFilename(name.to_string()))?;
    if tag.is_empty() {
        return Err(IoError::InvalidFilename(name.to_string()));
    }
    Ok((state, tag))
}

/// Collect every observation file in a directory into per-state inputs,
/// ordered by state index. Within a state, families are sorted by tag
/// so that state 0 fixes a deterministic family order.
pub fn collect_state_inputs<P: AsRef<Path>>(dir: P) -> Result<Vec<Vec<StateInput>>, IoError> {
    let mut by_state: BTreeMap<usize, Vec<StateInput>> = BTreeMap::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let (state, tag) = parse_state_tag(name)?;
        let table = read_observation_table(&path)?;
        by_state
            .entry(state)
            .or_default()
            .push(StateInput::new(tag, table));
    }

    let mut states = Vec::with_capacity(by_state.len());
    for (index, mut inputs) in by_state {
        if index != states.len() {
            return Err(IoError::Parse {
                path: dir.as_ref().display().to_string(),
                message: format!("state indices are not contiguous; missing state {}", states.len()),
            });
        }
        inputs.sort_by(|a, b| a.tag.cmp(&b.tag));
        states.push(inputs);
    }
    Ok(states)
}

/// Read whitespace-separated floats, one or more per line. Used for the
/// per-state conformational free energies.
pub fn read_vector<P: AsRef<Path>>(path: P) -> Result<Vec<f64>, IoError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut values = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        for token in line.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| IoError::Parse {
                path: path.display().to_string(),
                message: format!("non-numeric token '{}' on line {}", token, line_no + 1),
            })?;
            values.push(value);
        }
    }
    Ok(values)
}

/// Read a JSON array of per-family configurations
pub fn read_configs<P: AsRef<Path>>(path: P) -> Result<Vec<FamilyConfig>, IoError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Read a JSON-encoded tensor (shape plus row-major data)
pub fn read_tensor<P: AsRef<Path>>(path: P) -> Result<Tensor, IoError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Contact-count supplier backed by per-grid-point files on disk,
/// named `Nc_x{x:.1}_b{b:.0}_state{state:03}.txt` (and `Nh_` for the
/// hydrogen counts), each holding one count per residue.
pub struct DirContactSource {
    dir: std::path::PathBuf,
}

impl DirContactSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read_counts(&self, prefix: &str, x: f64, b: f64, state: usize) -> Result<Vec<f64>, ContactSourceError> {
        let name = format!("{}_x{:.1}_b{:.0}_state{:03}.txt", prefix, x, b, state);
        let path = self.dir.join(&name);
        read_vector(&path).map_err(|e| ContactSourceError(format!("{}: {}", name, e)))
    }
}

impl ContactCountSource for DirContactSource {
    fn carbon_counts(&self, x: f64, b: f64, state: usize) -> Result<Vec<f64>, ContactSourceError> {
        self.read_counts("Nc", x, b, state)
    }

    fn hydrogen_counts(&self, x: f64, b: f64, state: usize) -> Result<Vec<f64>, ContactSourceError> {
        self.read_counts("Nh", x, b, state)
    }
}
