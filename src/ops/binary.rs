use super::grad_if;
use crate::autograd::GradFn;
use crate::error::Result;
use crate::tensor::{BinaryOp, NdArray};
use crate::variable::Variable;

/// Gradient function for binary operations
///
/// Handles broadcasting during backward pass: each gradient is computed at the
/// output shape, then summed down to its input's shape with `sum_to`.
pub struct BinaryGradFn {
    op: BinaryOp,
}

impl GradFn for BinaryGradFn {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let (x_var, y_var) = (&inputs[0], &inputs[1]);
        let x = x_var.data();
        let y = y_var.data();
        let g = out_grad;

        let (gx, gy) = match self.op {
            BinaryOp::Add => (
                grad_if(x_var, || g.sum_to(x.shape()))?,
                grad_if(y_var, || g.sum_to(y.shape()))?,
            ),
            BinaryOp::Sub => (
                grad_if(x_var, || g.sum_to(x.shape()))?,
                grad_if(y_var, || g.neg().sum_to(y.shape()))?,
            ),
            // ∂(xy)/∂x = y, ∂(xy)/∂y = x
            BinaryOp::Mul => (
                grad_if(x_var, || g.mul(&y)?.sum_to(x.shape()))?,
                grad_if(y_var, || g.mul(&x)?.sum_to(y.shape()))?,
            ),
            // ∂(x/y)/∂x = 1/y, ∂(x/y)/∂y = -x/y²
            BinaryOp::Div => (
                grad_if(x_var, || g.div(&y)?.sum_to(x.shape()))?,
                grad_if(y_var, || {
                    let dy = x.zip_with(&y, "div", |a, b| -a / (b * b))?;
                    g.mul(&dy)?.sum_to(y.shape())
                })?,
            ),
            // ∂(xʸ)/∂x = y·xʸ⁻¹, ∂(xʸ)/∂y = xʸ·ln(x)
            BinaryOp::Pow => (
                grad_if(x_var, || {
                    let dx = x.zip_with(&y, "pow", |a, b| b * a.powf(b - 1.0))?;
                    g.mul(&dx)?.sum_to(x.shape())
                })?,
                grad_if(y_var, || {
                    let dy = x.zip_with(&y, "pow", |a, b| a.powf(b) * a.ln())?;
                    g.mul(&dy)?.sum_to(y.shape())
                })?,
            ),
            // Ties route the gradient to x.
            BinaryOp::Maximum | BinaryOp::Minimum => {
                let x_wins = if self.op == BinaryOp::Maximum {
                    x.greater_equal(&y)?
                } else {
                    x.less_equal(&y)?
                };
                (
                    grad_if(x_var, || g.mul(&x_wins)?.sum_to(x.shape()))?,
                    grad_if(y_var, || {
                        let y_wins = x_wins.map(|m| 1.0 - m);
                        g.mul(&y_wins)?.sum_to(y.shape())
                    })?,
                )
            }
            // Comparisons are never recorded; a hand-built node gets zeros.
            _ => (
                grad_if(x_var, || Ok(x.zeros_like()))?,
                grad_if(y_var, || Ok(y.zeros_like()))?,
            ),
        };
        Ok(vec![gx, gy])
    }
}

/// Operations between a variable and a plain `f32`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarOp {
    Add(f32),
    Sub(f32),
    Mul(f32),
    Div(f32),
    Pow(f32),
}

/// Gradient function for scalar operations
pub struct ScalarGradFn {
    op: ScalarOp,
}

impl GradFn for ScalarGradFn {
    fn name(&self) -> &'static str {
        match self.op {
            ScalarOp::Add(_) => "add_scalar",
            ScalarOp::Sub(_) => "sub_scalar",
            ScalarOp::Mul(_) => "mul_scalar",
            ScalarOp::Div(_) => "div_scalar",
            ScalarOp::Pow(_) => "pow_scalar",
        }
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let x_var = &inputs[0];
        let gx = grad_if(x_var, || match self.op {
            ScalarOp::Add(_) | ScalarOp::Sub(_) => Ok(out_grad.clone()),
            ScalarOp::Mul(s) => Ok(out_grad.mul_scalar(s)),
            ScalarOp::Div(s) => Ok(out_grad.div_scalar(s)),
            ScalarOp::Pow(s) => {
                let x = x_var.data();
                out_grad.zip_with(&x, "pow_scalar", |g, a| g * s * a.powf(s - 1.0))
            }
        })?;
        Ok(vec![gx])
    }
}

// ===== BINARY OPERATIONS =====
impl Variable {
    /// Apply a binary operation with broadcasting.
    ///
    /// Comparisons come back as constants: they have no useful derivative.
    pub fn binary_op(&self, other: &Variable, op: BinaryOp) -> Result<Variable> {
        let data = self.data().binary_op(&other.data(), op)?;
        if op.is_comparison() {
            return Ok(Variable::constant(data));
        }
        Ok(Variable::from_op(
            data,
            Box::new(BinaryGradFn { op }),
            vec![self.clone(), other.clone()],
        ))
    }

    pub fn add(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Add)
    }
    pub fn sub(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Sub)
    }
    pub fn mul(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Mul)
    }
    pub fn div(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Div)
    }
    pub fn pow(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Pow)
    }
    pub fn maximum(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Maximum)
    }
    pub fn minimum(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Minimum)
    }

    pub fn equal(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Eq)
    }
    pub fn not_equal(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Ne)
    }
    pub fn less(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Lt)
    }
    pub fn less_equal(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Le)
    }
    pub fn greater(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Gt)
    }
    pub fn greater_equal(&self, other: &Variable) -> Result<Variable> {
        self.binary_op(other, BinaryOp::Ge)
    }
}

// ===== SCALAR OPERATIONS =====
impl Variable {
    pub fn scalar_op(&self, op: ScalarOp) -> Variable {
        let data = {
            let x = self.data();
            match op {
                ScalarOp::Add(s) => x.add_scalar(s),
                ScalarOp::Sub(s) => x.sub_scalar(s),
                ScalarOp::Mul(s) => x.mul_scalar(s),
                ScalarOp::Div(s) => x.div_scalar(s),
                ScalarOp::Pow(s) => x.pow_scalar(s),
            }
        };
        Variable::from_op(data, Box::new(ScalarGradFn { op }), vec![self.clone()])
    }

    pub fn add_scalar(&self, s: f32) -> Variable {
        self.scalar_op(ScalarOp::Add(s))
    }
    pub fn sub_scalar(&self, s: f32) -> Variable {
        self.scalar_op(ScalarOp::Sub(s))
    }
    pub fn mul_scalar(&self, s: f32) -> Variable {
        self.scalar_op(ScalarOp::Mul(s))
    }
    pub fn div_scalar(&self, s: f32) -> Variable {
        self.scalar_op(ScalarOp::Div(s))
    }
    pub fn pow_scalar(&self, s: f32) -> Variable {
        self.scalar_op(ScalarOp::Pow(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TensorError;
    use approx::assert_relative_eq;

    fn param(data: &[f32], dims: &[usize]) -> Variable {
        Variable::parameter(NdArray::from_vec(data.to_vec(), dims).unwrap())
    }

    #[test]
    fn test_square_via_mul() {
        let x = param(&[3.0], &[1]);
        let y = x.mul(&x).unwrap();
        y.backward().unwrap();
        assert_relative_eq!(x.grad().unwrap().data()[0], 6.0);
    }

    #[test]
    fn test_broadcast_gradients_sum_to_input_shape() {
        let m = param(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let bias = param(&[10.0, 20.0, 30.0], &[3]);
        let y = m.mul(&bias).unwrap();
        y.backward().unwrap();

        let gb = bias.grad().unwrap();
        assert_eq!(gb.dims(), &[3]);
        assert_eq!(gb.data(), &[5.0, 7.0, 9.0]);
        assert_eq!(
            m.grad().unwrap().data(),
            &[10.0, 20.0, 30.0, 10.0, 20.0, 30.0]
        );
    }

    #[test]
    fn test_div_and_pow() {
        let x = param(&[2.0], &[1]);
        let y = param(&[4.0], &[1]);
        x.div(&y).unwrap().backward().unwrap();
        assert_relative_eq!(x.grad().unwrap().data()[0], 0.25);
        assert_relative_eq!(y.grad().unwrap().data()[0], -0.125);

        x.clear_grad();
        y.clear_grad();
        // d(x^y)/dx = y x^(y-1) = 32, d(x^y)/dy = x^y ln x = 16 ln 2
        x.pow(&y).unwrap().backward().unwrap();
        assert_relative_eq!(x.grad().unwrap().data()[0], 32.0, epsilon = 1e-4);
        assert_relative_eq!(y.grad().unwrap().data()[0], 16.0 * 2f32.ln(), epsilon = 1e-4);
    }

    #[test]
    fn test_maximum_routes_to_winner() {
        let a = param(&[1.0, 5.0, 3.0], &[3]);
        let b = param(&[2.0, 4.0, 3.0], &[3]);
        a.maximum(&b).unwrap().backward().unwrap();
        assert_eq!(a.grad().unwrap().data(), &[0.0, 1.0, 1.0]);
        assert_eq!(b.grad().unwrap().data(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mixed_requires_grad() {
        let w = param(&[2.0, 3.0], &[2]);
        let c = Variable::constant(NdArray::from_slice(&[5.0, 7.0]).unwrap());
        w.mul(&c).unwrap().backward().unwrap();
        assert_eq!(w.grad().unwrap().data(), &[5.0, 7.0]);
        assert!(c.grad().is_none());
    }

    #[test]
    fn test_comparisons_are_constants() {
        let a = param(&[1.0, 2.0], &[2]);
        let b = param(&[2.0, 2.0], &[2]);
        let lt = a.less(&b).unwrap();
        assert!(!lt.requires_grad());
        assert!(lt.is_leaf());
        assert_eq!(lt.data().data(), &[1.0, 0.0]);
    }

    #[test]
    fn test_scalar_ops() {
        let x = param(&[1.0, 2.0], &[2]);
        let y = x.mul_scalar(3.0).add_scalar(1.0).pow_scalar(2.0);
        assert_eq!(y.data().data(), &[16.0, 49.0]);
        y.backward().unwrap();
        // d/dx (3x+1)^2 = 6(3x+1)
        assert_eq!(x.grad().unwrap().data(), &[24.0, 42.0]);
    }

    #[test]
    fn test_shape_error_names_op() {
        let a = param(&[1.0, 2.0, 3.0], &[3]);
        let b = param(&[1.0, 2.0], &[2]);
        assert!(matches!(
            a.sub(&b),
            Err(TensorError::ShapeMismatch { op: "sub", .. })
        ));
    }
}
