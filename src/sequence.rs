//! A uniform view of time-varying parameters.
//!
//! Parameters may be given as a constant or as an explicit series of values. Both are presented
//! as a [`Sequence`], so the constraint blocks never need to know which one they were given.
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use thiserror::Error;

/// Errors raised when reading a [`Sequence`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequenceError {
    /// The index lies beyond an explicitly given series
    #[error("Index {index} is out of range for a sequence of length {len}")]
    OutOfRange {
        /// The requested index
        index: usize,
        /// The length of the backing series
        len: usize,
    },
}

/// A time series parameter backed by either a constant or an explicit series.
///
/// A constant-backed sequence has no inherent length: reading at index `t` yields the constant
/// and grows the effective length to `t + 1`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "SequenceRaw", into = "SequenceRaw")]
pub enum Sequence {
    /// The same value at every step
    Scalar {
        /// The constant value
        value: f64,
        /// Effective length, i.e. one more than the highest index read so far
        len: Cell<usize>,
    },
    /// An explicit series of values
    Series(Vec<f64>),
}

/// Constants compare by value only; the effective length depends on what has been read
impl PartialEq for Sequence {
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar { value, .. }, Self::Scalar { value: other, .. }) => value == other,
            (Self::Series(values), Self::Series(other)) => values == other,
            _ => false,
        }
    }
}

/// Serialised form of a [`Sequence`]
#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum SequenceRaw {
    Scalar(f64),
    Series(Vec<f64>),
}

impl From<SequenceRaw> for Sequence {
    fn from(raw: SequenceRaw) -> Self {
        match raw {
            SequenceRaw::Scalar(value) => Self::scalar(value),
            SequenceRaw::Series(values) => Self::Series(values),
        }
    }
}

impl From<Sequence> for SequenceRaw {
    fn from(seq: Sequence) -> Self {
        match seq {
            Sequence::Scalar { value, .. } => Self::Scalar(value),
            Sequence::Series(values) => Self::Series(values),
        }
    }
}

impl Sequence {
    /// Create a constant-backed sequence
    pub fn scalar(value: f64) -> Self {
        Self::Scalar {
            value,
            len: Cell::new(0),
        }
    }

    /// Materialise a sequence of length `len` from a function of the time step
    pub fn from_fn<F: Fn(usize) -> f64>(len: usize, f: F) -> Self {
        Self::Series((0..len).map(f).collect())
    }

    /// Whether the sequence is backed by a constant
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar { .. })
    }

    /// The value at step `t`.
    ///
    /// # Panics
    ///
    /// Panics if `t` lies beyond an explicit series. Model construction checks all series
    /// lengths against the time grid before any value is read this way.
    pub fn get(&self, t: usize) -> f64 {
        match self.try_get(t) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// The value at step `t`, or an error if `t` lies beyond an explicit series
    pub fn try_get(&self, t: usize) -> Result<f64, SequenceError> {
        match self {
            Self::Scalar { value, len } => {
                if t >= len.get() {
                    len.set(t + 1);
                }
                Ok(*value)
            }
            Self::Series(values) => values.get(t).copied().ok_or(SequenceError::OutOfRange {
                index: t,
                len: values.len(),
            }),
        }
    }

    /// The effective length of the sequence
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar { len, .. } => len.get(),
            Self::Series(values) => values.len(),
        }
    }

    /// Whether no value has been materialised
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The largest value in the sequence (the constant itself for constant-backed sequences)
    pub fn max(&self) -> f64 {
        match self {
            Self::Scalar { value, .. } => *value,
            Self::Series(values) => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// The smallest value in the sequence (the constant itself for constant-backed sequences)
    pub fn min(&self) -> f64 {
        match self {
            Self::Scalar { value, .. } => *value,
            Self::Series(values) => values.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    /// Check that the sequence can be read at every index in `0..steps`
    pub fn check_len(&self, steps: usize) -> Result<(), SequenceError> {
        match self {
            Self::Series(values) if values.len() < steps => Err(SequenceError::OutOfRange {
                index: steps - 1,
                len: values.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Iterate over the first `steps` values
    pub fn iter(&self, steps: usize) -> impl Iterator<Item = f64> + '_ {
        (0..steps).map(|t| self.get(t))
    }

    /// Whether every value lies in the closed interval `[lower, upper]`
    pub fn within(&self, lower: f64, upper: f64) -> bool {
        match self {
            Self::Scalar { value, .. } => (lower..=upper).contains(value),
            Self::Series(values) => values.iter().all(|v| (lower..=upper).contains(v)),
        }
    }

    /// Whether any value is nonzero
    pub fn any_nonzero(&self) -> bool {
        match self {
            Self::Scalar { value, .. } => *value != 0.0,
            Self::Series(values) => values.iter().any(|v| *v != 0.0),
        }
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::scalar(0.0)
    }
}

impl From<f64> for Sequence {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl From<Vec<f64>> for Sequence {
    fn from(values: Vec<f64>) -> Self {
        Self::Series(values)
    }
}

impl From<&[f64]> for Sequence {
    fn from(values: &[f64]) -> Self {
        Self::Series(values.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Sequence {
    fn from(values: [f64; N]) -> Self {
        Self::Series(values.to_vec())
    }
}
