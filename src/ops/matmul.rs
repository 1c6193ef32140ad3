use super::grad_if;
use crate::autograd::GradFn;
use crate::error::Result;
use crate::tensor::NdArray;
use crate::variable::Variable;

/// Gradient function for matrix multiplication
///
/// For C = A @ B:
/// - ∂L/∂A = ∂L/∂C @ Bᵀ
/// - ∂L/∂B = Aᵀ @ ∂L/∂C
///
/// Only the last two axes are transposed. When one side's batch dims were
/// broadcast, its gradient is summed back down with `sum_to`.
pub struct MatMulGradFn;

impl GradFn for MatMulGradFn {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let (a_var, b_var) = (&inputs[0], &inputs[1]);
        let a = a_var.data();
        let b = b_var.data();

        let ga = grad_if(a_var, || {
            out_grad.matmul(&b.swap_last_axes()?)?.sum_to(a.shape())
        })?;
        let gb = grad_if(b_var, || {
            a.swap_last_axes()?.matmul(out_grad)?.sum_to(b.shape())
        })?;
        Ok(vec![ga, gb])
    }
}

impl Variable {
    /// Matrix product over the last two axes, broadcasting any batch axes.
    pub fn matmul(&self, other: &Variable) -> Result<Variable> {
        let data = self.data().matmul(&other.data())?;
        Ok(Variable::from_op(
            data,
            Box::new(MatMulGradFn),
            vec![self.clone(), other.clone()],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TensorError;
    use crate::shape::Shape;

    #[test]
    fn test_matmul_2d_gradients() {
        let a = Variable::parameter(NdArray::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap());
        let b = Variable::parameter(NdArray::from_rows(&[[5.0, 6.0], [7.0, 8.0]]).unwrap());
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.data().data(), &[19.0, 22.0, 43.0, 50.0]);
        c.backward().unwrap();
        // ones @ Bᵀ and Aᵀ @ ones
        assert_eq!(a.grad().unwrap().data(), &[11.0, 15.0, 11.0, 15.0]);
        assert_eq!(b.grad().unwrap().data(), &[4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn test_batched_broadcast_gradient_sums_batches() {
        let a = Variable::parameter(NdArray::ones(&Shape::of(&[3, 2, 4])).unwrap());
        let w = Variable::parameter(NdArray::ones(&Shape::of(&[4, 5])).unwrap());
        let y = a.matmul(&w).unwrap();
        assert_eq!(y.dims(), vec![3, 2, 5]);
        y.backward().unwrap();
        let gw = w.grad().unwrap();
        assert_eq!(gw.dims(), &[4, 5]);
        // Three batches of two rows each contribute one.
        assert!(gw.data().iter().all(|&g| g == 6.0));
        assert!(a.grad().unwrap().data().iter().all(|&g| g == 5.0));
    }

    #[test]
    fn test_inner_mismatch() {
        let a = Variable::parameter(NdArray::ones(&Shape::of(&[2, 3])).unwrap());
        let b = Variable::parameter(NdArray::ones(&Shape::of(&[2, 2])).unwrap());
        let err = a.matmul(&b).unwrap_err();
        assert!(matches!(err, TensorError::DimensionMismatch { .. }));
        assert!(err.is_shape_mismatch());
    }
}
