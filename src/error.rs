use ndarray::ShapeError;
use ndarray_stats::errors::MultiInputError;
use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
pub enum KdTreeError {
    /// A row of the input point set has a different length than the first row.
    #[error("row {row} has {found} coordinates but the point set has dimension {expected}")]
    RaggedRow {
        /// Position of the offending row.
        row: usize,
        /// Dimension established by the first row.
        expected: usize,
        /// Length of the offending row.
        found: usize,
    },
    /// A non-empty point set whose rows have no coordinates.
    #[error("points must have at least one coordinate")]
    ZeroDimension,
    /// An input coordinate is NaN or infinite.
    #[error("coordinate {axis} of point {row} is not finite")]
    NonFinite {
        /// Position of the offending row.
        row: usize,
        /// Axis of the offending coordinate.
        axis: usize,
    },
    /// The query point does not have the dimension of the tree.
    #[error("query has dimension {found} but the tree has dimension {expected}")]
    DimensionMismatch {
        /// Dimension of the tree.
        expected: usize,
        /// Dimension of the query.
        found: usize,
    },
    /// A query coordinate is NaN or infinite.
    #[error("coordinate {axis} of the query is not finite")]
    NonFiniteQuery {
        /// Axis of the offending coordinate.
        axis: usize,
    },
    /// The rows could not be assembled into a matrix.
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// A built-in metric rejected its operands.
    #[error(transparent)]
    Distance(#[from] MultiInputError),
}

impl KdTreeError {
    /// Returns `true` for errors caused by malformed points or queries handed to the tree.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            KdTreeError::RaggedRow { .. }
                | KdTreeError::ZeroDimension
                | KdTreeError::NonFinite { .. }
                | KdTreeError::DimensionMismatch { .. }
                | KdTreeError::NonFiniteQuery { .. }
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, KdTreeError>;
