//! Dense `f32` tensors with a define-by-run reverse-mode autograd graph.
//!
//! - [`NdArray`] is the plain kernel layer: contiguous row-major data plus a
//!   [`Shape`], with broadcasting elementwise ops, reductions, matmul and
//!   im2col-based convolution support.
//! - [`Variable`] wraps an `NdArray` as a node of a computation graph. Every
//!   operation on variables records one [`GradFn`]; [`Variable::backward`]
//!   walks the graph in reverse and accumulates gradients.
//!
//! ```
//! use volta_core::{NdArray, Variable};
//!
//! let x = Variable::parameter(NdArray::from_slice(&[3.0]).unwrap());
//! let y = x.mul(&x).unwrap();
//! y.backward().unwrap();
//! assert_eq!(x.grad().unwrap().data(), &[6.0]);
//! ```

pub mod autograd;
pub mod config;
pub mod error;
pub mod gradcheck;
pub mod ops;
pub mod shape;
pub mod tensor;
pub mod variable;

pub use autograd::{GradFn, NoGradGuard, is_grad_enabled, no_grad};
pub use config::RuntimeConfig;
pub use error::{Result, TensorError};
pub use gradcheck::{GradCheckReport, check_gradients, check_gradients_simple};
pub use shape::Shape;
pub use tensor::{BinaryOp, Conv2dGeometry, NdArray, UnaryOp};
pub use variable::Variable;
