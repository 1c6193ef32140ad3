use super::grad_if;
use crate::autograd::GradFn;
use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::NdArray;
use crate::variable::Variable;

/// Reductions and broadcasts.
///
/// The backward of a reduction stretches the output gradient back over the
/// reduced axis; `SumTo` and `BroadcastTo` are each other's backward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Var,
    SumAxis { axis: usize, keepdim: bool },
    MeanAxis { axis: usize, keepdim: bool },
    VarAxis { axis: usize, keepdim: bool },
    MaxAxis { axis: usize, keepdim: bool },
    MinAxis { axis: usize, keepdim: bool },
    SumTo(Shape),
    BroadcastTo(Shape),
}

impl ReduceOp {
    fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Var => "var",
            ReduceOp::SumAxis { .. } => "sum_axis",
            ReduceOp::MeanAxis { .. } => "mean_axis",
            ReduceOp::VarAxis { .. } => "var_axis",
            ReduceOp::MaxAxis { .. } => "max_axis",
            ReduceOp::MinAxis { .. } => "min_axis",
            ReduceOp::SumTo(_) => "sum_to",
            ReduceOp::BroadcastTo(_) => "broadcast_to",
        }
    }
}

/// Stretch a reduced gradient back to `shape`, restoring the axis first
/// when it was dropped.
fn expand(g: &NdArray, shape: &Shape, axis: usize, keepdim: bool) -> Result<NdArray> {
    if keepdim {
        g.broadcast_to(shape)
    } else {
        g.unsqueeze(axis)?.broadcast_to(shape)
    }
}

/// 1.0 at the position each lane's extreme came from, 0.0 elsewhere.
///
/// Only the first extreme of a lane is marked, so ties do not split the gradient.
fn winner_mask(x: &NdArray, axis: usize, max: bool) -> Result<NdArray> {
    let (outer, len, inner) = x.shape().split_at_axis(axis)?;
    let winners = x.arg_extreme_lanes(axis, max)?;
    let mut mask = vec![0.0; x.size()];
    for o in 0..outer {
        for i in 0..inner {
            let k = winners[o * inner + i];
            mask[o * len * inner + k * inner + i] = 1.0;
        }
    }
    Ok(NdArray::from_parts(mask, x.shape().clone()))
}

/// Gradient function for reductions
pub struct ReduceGradFn {
    op: ReduceOp,
}

impl GradFn for ReduceGradFn {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let x_var = &inputs[0];
        let gx = grad_if(x_var, || {
            let x = x_var.data();
            let shape = x.shape();
            let g = out_grad;
            match self.op {
                ReduceOp::Sum => g.broadcast_to(shape),
                ReduceOp::Mean => Ok(g.broadcast_to(shape)?.div_scalar(x.size() as f32)),
                // ∂var/∂xᵢ = 2(xᵢ - mean)/n
                ReduceOp::Var => {
                    let n = x.size() as f32;
                    let centered = x.sub_scalar(x.mean());
                    centered.mul_scalar(2.0 / n).mul(g)
                }
                ReduceOp::SumAxis { axis, keepdim } => expand(g, shape, axis, keepdim),
                ReduceOp::MeanAxis { axis, keepdim } => {
                    let n = shape.dim(axis)? as f32;
                    Ok(expand(g, shape, axis, keepdim)?.div_scalar(n))
                }
                ReduceOp::VarAxis { axis, keepdim } => {
                    let n = shape.dim(axis)? as f32;
                    let centered = x.sub(&x.mean_axis(axis, true)?)?;
                    centered
                        .mul_scalar(2.0 / n)
                        .mul(&expand(g, shape, axis, keepdim)?)
                }
                ReduceOp::MaxAxis { axis, keepdim } => {
                    winner_mask(&x, axis, true)?.mul(&expand(g, shape, axis, keepdim)?)
                }
                ReduceOp::MinAxis { axis, keepdim } => {
                    winner_mask(&x, axis, false)?.mul(&expand(g, shape, axis, keepdim)?)
                }
                ReduceOp::SumTo(_) => g.broadcast_to(shape),
                ReduceOp::BroadcastTo(_) => g.sum_to(shape),
            }
        })?;
        Ok(vec![gx])
    }
}

/// Gradient function for softmax and log-softmax.
///
/// Keeps the forward output, since both derivatives are expressed through it:
/// - softmax: gx = y·(g - Σ(g·y))
/// - log-softmax: gx = g - softmax(x)·Σg
pub struct SoftmaxGradFn {
    axis: usize,
    log: bool,
    output: NdArray,
}

impl GradFn for SoftmaxGradFn {
    fn name(&self) -> &'static str {
        if self.log { "log_softmax" } else { "softmax" }
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let x_var = &inputs[0];
        let axis = self.axis;
        let gx = grad_if(x_var, || {
            if self.log {
                let probs = self.output.exp();
                let total = out_grad.sum_axis(axis, true)?;
                out_grad.sub(&probs.mul(&total)?)
            } else {
                let y = &self.output;
                let dot = out_grad.mul(y)?.sum_axis(axis, true)?;
                y.mul(&out_grad.sub(&dot)?)
            }
        })?;
        Ok(vec![gx])
    }
}

// ===== REDUCTIONS =====
impl Variable {
    fn reduce(&self, data: NdArray, op: ReduceOp) -> Variable {
        Variable::from_op(data, Box::new(ReduceGradFn { op }), vec![self.clone()])
    }

    /// Sum of every element, as a rank-0 variable.
    pub fn sum(&self) -> Variable {
        let data = NdArray::scalar(self.data().sum());
        self.reduce(data, ReduceOp::Sum)
    }

    pub fn mean(&self) -> Variable {
        let data = NdArray::scalar(self.data().mean());
        self.reduce(data, ReduceOp::Mean)
    }

    /// Population variance of every element.
    pub fn var(&self) -> Variable {
        let data = NdArray::scalar(self.data().var());
        self.reduce(data, ReduceOp::Var)
    }

    pub fn sum_axis(&self, axis: usize, keepdim: bool) -> Result<Variable> {
        let data = self.data().sum_axis(axis, keepdim)?;
        Ok(self.reduce(data, ReduceOp::SumAxis { axis, keepdim }))
    }

    pub fn mean_axis(&self, axis: usize, keepdim: bool) -> Result<Variable> {
        let data = self.data().mean_axis(axis, keepdim)?;
        Ok(self.reduce(data, ReduceOp::MeanAxis { axis, keepdim }))
    }

    pub fn var_axis(&self, axis: usize, keepdim: bool) -> Result<Variable> {
        let data = self.data().var_axis(axis, keepdim)?;
        Ok(self.reduce(data, ReduceOp::VarAxis { axis, keepdim }))
    }

    /// Maximum along `axis`. The gradient goes to the first maximal element.
    pub fn max_axis(&self, axis: usize, keepdim: bool) -> Result<Variable> {
        let data = self.data().max_axis(axis, keepdim)?;
        Ok(self.reduce(data, ReduceOp::MaxAxis { axis, keepdim }))
    }

    /// Minimum along `axis`. The gradient goes to the first minimal element.
    pub fn min_axis(&self, axis: usize, keepdim: bool) -> Result<Variable> {
        let data = self.data().min_axis(axis, keepdim)?;
        Ok(self.reduce(data, ReduceOp::MinAxis { axis, keepdim }))
    }

    /// Global maximum, as a rank-0 variable.
    pub fn max(&self) -> Result<Variable> {
        self.flatten()?.max_axis(0, false)
    }

    /// Global minimum, as a rank-0 variable.
    pub fn min(&self) -> Result<Variable> {
        self.flatten()?.min_axis(0, false)
    }

    fn flatten(&self) -> Result<Variable> {
        let size = self.data().size();
        self.reshape(&[size])
    }

    /// Reverse a broadcast: sum the stretched axes down to `target`.
    pub fn sum_to(&self, target: &Shape) -> Result<Variable> {
        let data = self.data().sum_to(target)?;
        Ok(self.reduce(data, ReduceOp::SumTo(target.clone())))
    }

    pub fn broadcast_to(&self, target: &Shape) -> Result<Variable> {
        let data = self.data().broadcast_to(target)?;
        Ok(self.reduce(data, ReduceOp::BroadcastTo(target.clone())))
    }
}

// ===== SOFTMAX FAMILY =====
impl Variable {
    pub fn softmax(&self, axis: usize) -> Result<Variable> {
        let output = self.data().softmax(axis)?;
        Ok(Variable::from_op(
            output.clone(),
            Box::new(SoftmaxGradFn {
                axis,
                log: false,
                output,
            }),
            vec![self.clone()],
        ))
    }

    pub fn log_softmax(&self, axis: usize) -> Result<Variable> {
        let output = self.data().log_softmax(axis)?;
        Ok(Variable::from_op(
            output.clone(),
            Box::new(SoftmaxGradFn {
                axis,
                log: true,
                output,
            }),
            vec![self.clone()],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matrix() -> Variable {
        Variable::parameter(NdArray::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap())
    }

    #[test]
    fn test_sum_gradient_is_ones() {
        let x = matrix();
        let s = x.sum();
        assert_eq!(s.data().item().unwrap(), 21.0);
        s.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[1.0; 6]);
    }

    #[test]
    fn test_axis_sums_and_gradients() {
        let x = matrix();
        let cols = x.sum_axis(0, false).unwrap();
        assert_eq!(cols.data().data(), &[5.0, 7.0, 9.0]);
        let rows = x.sum_axis(1, false).unwrap();
        assert_eq!(rows.data().data(), &[6.0, 15.0]);

        rows.backward_with(NdArray::from_slice(&[1.0, 10.0]).unwrap())
            .unwrap();
        assert_eq!(
            x.grad().unwrap().data(),
            &[1.0, 1.0, 1.0, 10.0, 10.0, 10.0]
        );
    }

    #[test]
    fn test_mean_axis_keepdim_gradient() {
        let x = matrix();
        let m = x.mean_axis(1, true).unwrap();
        assert_eq!(m.dims(), vec![2, 1]);
        m.backward().unwrap();
        for g in x.grad().unwrap().data() {
            assert_relative_eq!(*g, 1.0 / 3.0);
        }
    }

    #[test]
    fn test_var_gradient() {
        let x = Variable::parameter(NdArray::from_slice(&[1.0, 2.0, 3.0, 4.0]).unwrap());
        let v = x.var();
        assert_relative_eq!(v.data().item().unwrap(), 1.25);
        v.backward().unwrap();
        // 2(x - 2.5)/4
        let expected = [-0.75, -0.25, 0.25, 0.75];
        for (g, e) in x.grad().unwrap().data().iter().zip(expected) {
            assert_relative_eq!(*g, e);
        }
    }

    #[test]
    fn test_max_routes_to_first_winner() {
        let x = Variable::parameter(NdArray::from_rows(&[[3.0, 1.0, 3.0], [0.0, 2.0, 1.0]]).unwrap());
        x.max_axis(1, false).unwrap().backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

        x.clear_grad();
        let m = x.min().unwrap();
        assert_eq!(m.data().item().unwrap(), 0.0);
        m.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sum_to_and_broadcast_to_are_inverse() {
        let b = Variable::parameter(NdArray::from_slice(&[1.0, 2.0, 3.0]).unwrap());
        let wide = b.broadcast_to(&Shape::of(&[4, 3])).unwrap();
        let back = wide.sum_to(&Shape::of(&[3])).unwrap();
        assert_eq!(back.data().data(), &[4.0, 8.0, 12.0]);
        back.backward().unwrap();
        assert_eq!(b.grad().unwrap().data(), &[4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_softmax_gradient_sums_to_zero() {
        let x = Variable::parameter(NdArray::from_slice(&[1000.0, 1001.0, 999.0]).unwrap());
        let y = x.softmax(0).unwrap();
        assert!(y.data().data().iter().all(|p| p.is_finite()));
        assert_relative_eq!(y.data().sum(), 1.0, epsilon = 1e-6);

        // Weighting one output breaks the symmetry; the gradient still sums to zero.
        y.backward_with(NdArray::from_slice(&[1.0, 0.0, 0.0]).unwrap())
            .unwrap();
        let g = x.grad().unwrap();
        assert_relative_eq!(g.sum(), 0.0, epsilon = 1e-6);
        assert!(g.data()[0] > 0.0);
    }

    #[test]
    fn test_log_softmax_gradient() {
        let x = Variable::parameter(NdArray::from_rows(&[[0.0, 0.0]]).unwrap());
        let y = x.log_softmax(1).unwrap();
        assert_relative_eq!(y.data().data()[0], -(2f32.ln()));
        y.backward().unwrap();
        // g - softmax * Σg = 1 - 0.5 * 2
        for g in x.grad().unwrap().data() {
            assert_relative_eq!(*g, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_winner_mask_exact_past_f32_integer_range() {
        // 2^24 + 1 is the first index an f32 cannot hold.
        let len = (1 << 24) + 3;
        let winner = (1 << 24) + 1;
        let mut data = vec![0.0; len];
        data[winner] = 1.0;
        let x = NdArray::from_vec(data, &[len]).unwrap();
        let mask = winner_mask(&x, 0, true).unwrap();
        assert_eq!(mask.data()[winner], 1.0);
        assert_eq!(mask.sum(), 1.0);
    }
}
