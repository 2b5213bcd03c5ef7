//! Discretized nuisance-parameter grids and dense tensors over them

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with grids and tensors
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Empty grid for parameter '{name}': range [{min}, {max}) with step {step}")]
    EmptyGrid {
        name: String,
        min: f64,
        max: f64,
        step: f64,
    },

    #[error("Invalid grid spec for parameter '{name}': {message}")]
    InvalidSpec { name: String, message: String },

    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Tensor index {index:?} out of bounds for shape {shape:?}")]
    OutOfBounds { index: Vec<usize>, shape: Vec<usize> },

    #[error("Invalid tensor dimension: {0:?}")]
    InvalidDimension(Vec<usize>),
}

/// An ordered, immutable discretization of one nuisance parameter.
///
/// Values cover `[min, max)` with either logarithmic spacing (each value
/// is the previous one multiplied by the step factor) or linear spacing.
/// The external sampler owns the current position; the grid only records
/// where sampling starts (the middle element).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterGrid {
    /// Parameter name, used in error messages
    name: String,

    /// Allowed parameter values, strictly increasing
    values: Vec<f64>,

    /// Index the external sampler starts from (middle of the grid)
    initial_index: usize,
}

impl ParameterGrid {
    /// Build a log-spaced grid: `exp(ln(min) + k * ln(step))` for all
    /// values below `max`. The step is a multiplicative factor > 1.
    pub fn log_spaced(name: &str, min: f64, max: f64, step: f64) -> Result<Self, GridError> {
        if !(min > 0.0 && max > min) || !(step > 1.0) {
            return Err(GridError::InvalidSpec {
                name: name.to_string(),
                message: format!(
                    "log spacing requires 0 < min < max and step > 1, got ({}, {}, {})",
                    min, max, step
                ),
            });
        }

        let dlog = step.ln();
        let start = min.ln();
        // Small tolerance keeps rounding noise in (max - min) / step from
        // adding a value at or past the open upper bound
        let count = (((max.ln() - start) / dlog) - 1e-9).ceil() as usize;
        let values = (0..count)
            .map(|k| (start + k as f64 * dlog).exp())
            .collect();

        Self::from_values(name, values, min, max, step)
    }

    /// Build a linearly spaced grid: `min + k * step` for all values below `max`.
    pub fn linear(name: &str, min: f64, max: f64, step: f64) -> Result<Self, GridError> {
        if !(max > min) || !(step > 0.0) {
            return Err(GridError::InvalidSpec {
                name: name.to_string(),
                message: format!(
                    "linear spacing requires min < max and step > 0, got ({}, {}, {})",
                    min, max, step
                ),
            });
        }

        let count = (((max - min) / step) - 1e-9).ceil() as usize;
        let values = (0..count).map(|k| min + k as f64 * step).collect();

        Self::from_values(name, values, min, max, step)
    }

    fn from_values(
        name: &str,
        values: Vec<f64>,
        min: f64,
        max: f64,
        step: f64,
    ) -> Result<Self, GridError> {
        if values.is_empty() {
            return Err(GridError::EmptyGrid {
                name: name.to_string(),
                min,
                max,
                step,
            });
        }

        let initial_index = values.len() / 2;
        Ok(Self {
            name: name.to_string(),
            values,
            initial_index,
        })
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allowed parameter values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of grid points
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index at which the external sampler starts (middle element)
    pub fn initial_index(&self) -> usize {
        self.initial_index
    }

    /// Value at the initial index
    pub fn initial_value(&self) -> f64 {
        self.values[self.initial_index]
    }
}

/// A dense N-dimensional array of f64 stored in row-major order.
///
/// Used for SSE surfaces, prior penalties and reference corrections over
/// nuisance-parameter grids. Shapes are fixed at construction; combining
/// tensors of different shapes is a fatal contract violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Unvalidated wire form of a tensor; deserialization goes through
/// `Tensor::from_data` so a shape/data mismatch is rejected at the
/// boundary.
#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = GridError;

    fn try_from(raw: RawTensor) -> Result<Self, GridError> {
        Tensor::from_data(&raw.shape, raw.data)
    }
}

impl Tensor {
    /// Create a tensor of the given shape filled with zeros
    pub fn zeros(shape: &[usize]) -> Result<Self, GridError> {
        if shape.is_empty() || shape.iter().any(|&n| n == 0) {
            return Err(GridError::InvalidDimension(shape.to_vec()));
        }

        let total: usize = shape.iter().product();
        Ok(Self {
            shape: shape.to_vec(),
            data: vec![0.0; total],
        })
    }

    /// Create a tensor from existing row-major data
    pub fn from_data(shape: &[usize], data: Vec<f64>) -> Result<Self, GridError> {
        if shape.is_empty() || shape.iter().any(|&n| n == 0) {
            return Err(GridError::InvalidDimension(shape.to_vec()));
        }
        let total: usize = shape.iter().product();
        if data.len() != total {
            return Err(GridError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Tensor shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat view of the row-major data
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat view of the row-major data
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Linear offset for a full multi-index.
    /// Row-major order: the last axis varies fastest.
    fn offset(&self, index: &[usize]) -> Result<usize, GridError> {
        if index.len() != self.shape.len()
            || index.iter().zip(&self.shape).any(|(&i, &n)| i >= n)
        {
            return Err(GridError::OutOfBounds {
                index: index.to_vec(),
                shape: self.shape.clone(),
            });
        }

        let mut offset = 0;
        for (&i, &n) in index.iter().zip(&self.shape) {
            offset = offset * n + i;
        }
        Ok(offset)
    }

    /// Get the value at a multi-index
    pub fn get(&self, index: &[usize]) -> Result<f64, GridError> {
        Ok(self.data[self.offset(index)?])
    }

    /// Set the value at a multi-index
    pub fn set(&mut self, index: &[usize], value: f64) -> Result<(), GridError> {
        let offset = self.offset(index)?;
        self.data[offset] = value;
        Ok(())
    }

    /// Elementwise add another tensor of identical shape
    pub fn add_assign(&mut self, other: &Tensor) -> Result<(), GridError> {
        if self.shape != other.shape {
            return Err(GridError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }
}
