//! Differentiable operations on [`Variable`].
//!
//! Every operation computes its forward value with the `NdArray` kernels and
//! records one gradient function through [`Variable::from_op`].

pub mod binary;
pub mod conv;
pub mod matmul;
pub mod movement;
pub mod reduce;
pub mod unary;

pub use binary::{BinaryGradFn, ScalarGradFn, ScalarOp};
pub use conv::{Col2ImGradFn, Im2ColGradFn};
pub use matmul::MatMulGradFn;
pub use movement::{MovementGradFn, MovementOp};
pub use reduce::{ReduceGradFn, ReduceOp, SoftmaxGradFn};
pub use unary::{ClipGradFn, UnaryGradFn};

use crate::error::Result;
use crate::tensor::NdArray;
use crate::variable::Variable;

/// Run `f` only when `input` collects a gradient.
pub(crate) fn grad_if<F>(input: &Variable, f: F) -> Result<Option<NdArray>>
where
    F: FnOnce() -> Result<NdArray>,
{
    if input.requires_grad() {
        f().map(Some)
    } else {
        Ok(None)
    }
}
