use super::grad_if;
use crate::autograd::GradFn;
use crate::error::Result;
use crate::tensor::{NdArray, UnaryOp};
use crate::variable::Variable;

/// Derivative of `op` at `x`.
///
/// - Neg: -1
/// - Abs: sign(x), 0 at 0
/// - Recip: -1/x²
/// - Sqrt: 1/(2√x)
/// - Exp: eˣ
/// - Log: 1/x
/// - Sin: cos(x)
/// - Cos: -sin(x)
/// - Tan: 1 + tan²(x)
/// - Tanh: 1 - tanh²(x)
/// - Sigmoid: σ(x)·(1-σ(x))
/// - Relu: 1 where x > 0, else 0
/// - Square: 2x
fn derivative(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Neg => -1.0,
        UnaryOp::Abs => {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        UnaryOp::Recip => -1.0 / (x * x),
        UnaryOp::Sqrt => 0.5 / x.sqrt(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => 1.0 / x,
        UnaryOp::Sin => x.cos(),
        UnaryOp::Cos => -x.sin(),
        UnaryOp::Tan => {
            let t = x.tan();
            1.0 + t * t
        }
        UnaryOp::Tanh => {
            let t = x.tanh();
            1.0 - t * t
        }
        UnaryOp::Sigmoid => {
            let s = op.apply(x);
            s * (1.0 - s)
        }
        UnaryOp::Relu => {
            if x > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        UnaryOp::Square => 2.0 * x,
    }
}

/// Gradient function for unary operations
///
/// Stores which operation was performed so backward can apply the correct derivative.
pub struct UnaryGradFn {
    op: UnaryOp,
}

impl GradFn for UnaryGradFn {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let x_var = &inputs[0];
        let op = self.op;
        let gx = grad_if(x_var, || {
            out_grad.zip_with(&x_var.data(), op.name(), |g, x| g * derivative(op, x))
        })?;
        Ok(vec![gx])
    }
}

/// Gradient of `clip`: passes where `min <= x <= max`, zero where clamped.
pub struct ClipGradFn {
    min: f32,
    max: f32,
}

impl GradFn for ClipGradFn {
    fn name(&self) -> &'static str {
        "clip"
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let x_var = &inputs[0];
        let (min, max) = (self.min, self.max);
        let gx = grad_if(x_var, || {
            out_grad.zip_with(&x_var.data(), "clip", |g, x| {
                if (min..=max).contains(&x) { g } else { 0.0 }
            })
        })?;
        Ok(vec![gx])
    }
}

// ===== UNARY OPERATIONS =====
impl Variable {
    pub fn unary_op(&self, op: UnaryOp) -> Variable {
        let data = self.data().unary_op(op);
        Variable::from_op(data, Box::new(UnaryGradFn { op }), vec![self.clone()])
    }

    pub fn neg(&self) -> Variable {
        self.unary_op(UnaryOp::Neg)
    }
    pub fn abs(&self) -> Variable {
        self.unary_op(UnaryOp::Abs)
    }
    pub fn recip(&self) -> Variable {
        self.unary_op(UnaryOp::Recip)
    }
    pub fn sqrt(&self) -> Variable {
        self.unary_op(UnaryOp::Sqrt)
    }
    pub fn exp(&self) -> Variable {
        self.unary_op(UnaryOp::Exp)
    }
    pub fn log(&self) -> Variable {
        self.unary_op(UnaryOp::Log)
    }
    pub fn sin(&self) -> Variable {
        self.unary_op(UnaryOp::Sin)
    }
    pub fn cos(&self) -> Variable {
        self.unary_op(UnaryOp::Cos)
    }
    pub fn tan(&self) -> Variable {
        self.unary_op(UnaryOp::Tan)
    }
    pub fn tanh(&self) -> Variable {
        self.unary_op(UnaryOp::Tanh)
    }
    pub fn sigmoid(&self) -> Variable {
        self.unary_op(UnaryOp::Sigmoid)
    }
    pub fn relu(&self) -> Variable {
        self.unary_op(UnaryOp::Relu)
    }
    pub fn square(&self) -> Variable {
        self.unary_op(UnaryOp::Square)
    }

    /// Clamp into `[min, max]`. Errors when `min > max`.
    pub fn clip(&self, min: f32, max: f32) -> Result<Variable> {
        let data = self.data().clip(min, max)?;
        Ok(Variable::from_op(
            data,
            Box::new(ClipGradFn { min, max }),
            vec![self.clone()],
        ))
    }
}
