use thiserror::Error;

/// Structural errors raised by tensor kernels and the autograd graph.
///
/// Every variant signals a caller defect (wrong shapes, wrong axis, bad index).
/// Non-finite values are not errors; they propagate per IEEE-754.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("Shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("Matmul dimension mismatch: {lhs:?} @ {rhs:?}")]
    DimensionMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("Index {index} out of range for axis {axis} with size {size}")]
    IndexOutOfRange {
        axis: usize,
        index: usize,
        size: usize,
    },

    #[error("{op} requires rank >= {required}, got rank {actual}")]
    RankViolation {
        op: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Dimension {dim} out of bounds for shape {shape:?}")]
    DimensionOutOfBounds { dim: usize, shape: Vec<usize> },

    #[error("Shape mismatch: shape {shape:?} has {elements} elements but data length is {len}")]
    ShapeDataMismatch {
        shape: Vec<usize>,
        elements: usize,
        len: usize,
    },

    #[error("Allocation of {requested} elements exceeds the limit of {limit}")]
    AllocationLimit { requested: usize, limit: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl TensorError {
    /// True for any incompatible-shape failure, including matmul inner dims.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(
            self,
            TensorError::ShapeMismatch { .. } | TensorError::DimensionMismatch { .. }
        )
    }

    pub(crate) fn shape_mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Self {
        TensorError::ShapeMismatch {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;
