use super::grad_if;
use crate::autograd::GradFn;
use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::NdArray;
use crate::variable::Variable;

/// Movement operations: reshape/reorder/slice data without changing values
///
/// Gradients must "undo" these operations during backpropagation: reshape
/// back, permute with the inverse order, pad what was shrunk, scatter-add
/// what was gathered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementOp {
    Reshape,
    Permute { axes: Vec<usize> },
    Squeeze { axis: usize },
    Unsqueeze { axis: usize },
    Shrink { ranges: Vec<(usize, usize)> },
    Pad { padding: Vec<(usize, usize)> },
    TakePoints { rows: Vec<usize>, cols: Vec<usize> },
    Select { rows: Option<Vec<usize>>, cols: Option<Vec<usize>> },
}

impl MovementOp {
    fn name(&self) -> &'static str {
        match self {
            MovementOp::Reshape => "reshape",
            MovementOp::Permute { .. } => "permute",
            MovementOp::Squeeze { .. } => "squeeze_axis",
            MovementOp::Unsqueeze { .. } => "unsqueeze",
            MovementOp::Shrink { .. } => "shrink",
            MovementOp::Pad { .. } => "pad",
            MovementOp::TakePoints { .. } => "take_points",
            MovementOp::Select { .. } => "select",
        }
    }
}

/// Unified gradient function for all movement operations
pub struct MovementGradFn {
    op: MovementOp,
    original_shape: Shape,
}

impl GradFn for MovementGradFn {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let original = &self.original_shape;
        let gx = grad_if(&inputs[0], || match &self.op {
            MovementOp::Reshape => out_grad.clone().into_shape(original.clone()),
            MovementOp::Permute { axes } => {
                let mut inverse = vec![0; axes.len()];
                for (i, &ax) in axes.iter().enumerate() {
                    inverse[ax] = i;
                }
                out_grad.permute(&inverse)
            }
            MovementOp::Squeeze { axis } => out_grad.unsqueeze(*axis),
            MovementOp::Unsqueeze { axis } => out_grad.squeeze_axis(*axis),
            MovementOp::Shrink { ranges } => {
                let padding: Vec<(usize, usize)> = ranges
                    .iter()
                    .zip(original.dims())
                    .map(|(&(start, end), &dim)| (start, dim - end))
                    .collect();
                out_grad.pad(&padding)
            }
            MovementOp::Pad { padding } => {
                let ranges: Vec<(usize, usize)> = padding
                    .iter()
                    .zip(original.dims())
                    .map(|(&(before, _), &dim)| (before, before + dim))
                    .collect();
                out_grad.shrink(&ranges)
            }
            MovementOp::TakePoints { rows, cols } => {
                let mut grad = NdArray::zeros(original)?;
                grad.index_add_points(rows, cols, out_grad)?;
                Ok(grad)
            }
            MovementOp::Select { rows, cols } => {
                let mut grad = NdArray::zeros(original)?;
                grad.index_add_select(rows.as_deref(), cols.as_deref(), out_grad)?;
                Ok(grad)
            }
        })?;
        Ok(vec![gx])
    }
}

// ===== MOVEMENT OPERATIONS =====
impl Variable {
    fn movement(&self, data: NdArray, op: MovementOp) -> Variable {
        let original_shape = self.shape();
        Variable::from_op(
            data,
            Box::new(MovementGradFn { op, original_shape }),
            vec![self.clone()],
        )
    }

    pub fn reshape(&self, dims: &[usize]) -> Result<Variable> {
        let data = self.data().reshape(dims)?;
        Ok(self.movement(data, MovementOp::Reshape))
    }

    /// Reorder axes: output axis `i` is input axis `axes[i]`.
    pub fn permute(&self, axes: &[usize]) -> Result<Variable> {
        let data = self.data().permute(axes)?;
        Ok(self.movement(data, MovementOp::Permute { axes: axes.to_vec() }))
    }

    /// Reverse all axes.
    pub fn transpose(&self) -> Result<Variable> {
        let axes: Vec<usize> = (0..self.data().rank()).rev().collect();
        self.permute(&axes)
    }

    /// Swap the last two axes; needs rank >= 2.
    pub fn swap_last_axes(&self) -> Result<Variable> {
        let data = self.data().swap_last_axes()?;
        let rank = data.rank();
        let mut axes: Vec<usize> = (0..rank).collect();
        axes.swap(rank - 2, rank - 1);
        Ok(self.movement(data, MovementOp::Permute { axes }))
    }

    pub fn squeeze_axis(&self, axis: usize) -> Result<Variable> {
        let data = self.data().squeeze_axis(axis)?;
        Ok(self.movement(data, MovementOp::Squeeze { axis }))
    }

    pub fn unsqueeze(&self, axis: usize) -> Result<Variable> {
        let data = self.data().unsqueeze(axis)?;
        Ok(self.movement(data, MovementOp::Unsqueeze { axis }))
    }

    /// Keep `start..end` along every axis.
    pub fn shrink(&self, ranges: &[(usize, usize)]) -> Result<Variable> {
        let data = self.data().shrink(ranges)?;
        Ok(self.movement(data, MovementOp::Shrink { ranges: ranges.to_vec() }))
    }

    /// Zero-pad `(before, after)` per axis.
    pub fn pad(&self, padding: &[(usize, usize)]) -> Result<Variable> {
        let data = self.data().pad(padding)?;
        Ok(self.movement(data, MovementOp::Pad { padding: padding.to_vec() }))
    }

    /// Gather `self[rows[i], cols[i]]` into a `[1, N]` row.
    pub fn take_points(&self, rows: &[usize], cols: &[usize]) -> Result<Variable> {
        let data = self.data().take_points(rows, cols)?;
        Ok(self.movement(
            data,
            MovementOp::TakePoints {
                rows: rows.to_vec(),
                cols: cols.to_vec(),
            },
        ))
    }

    /// Rectangular gather on a matrix; `None` keeps the whole axis.
    pub fn select(&self, rows: Option<&[usize]>, cols: Option<&[usize]>) -> Result<Variable> {
        let data = self.data().select(rows, cols)?;
        Ok(self.movement(
            data,
            MovementOp::Select {
                rows: rows.map(<[usize]>::to_vec),
                cols: cols.map(<[usize]>::to_vec),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Variable {
        Variable::parameter(NdArray::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap())
    }

    #[test]
    fn test_reshape_gradient_restores_shape() {
        let x = matrix();
        let y = x.reshape(&[3, 2]).unwrap();
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_permute_gradient_is_inverse() {
        let x = Variable::parameter(NdArray::from_vec((0..24).map(|v| v as f32).collect(), &[2, 3, 4]).unwrap());
        let y = x.permute(&[2, 0, 1]).unwrap();
        assert_eq!(y.dims(), vec![4, 2, 3]);
        let seed = y.data().clone();
        y.backward_with(seed).unwrap();
        // Seeding with the permuted values sends each value back to its origin.
        assert_eq!(x.grad().unwrap(), *x.data());
    }

    #[test]
    fn test_transpose_gradient() {
        let x = matrix();
        let t = x.transpose().unwrap();
        assert_eq!(t.data().data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        t.backward_with(NdArray::from_rows(&[[1.0, 0.0], [0.0, 0.0], [0.0, 2.0]]).unwrap())
            .unwrap();
        assert_eq!(x.grad().unwrap().data(), &[1.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_shrink_and_pad_gradients() {
        let x = matrix();
        let s = x.shrink(&[(1, 2), (0, 2)]).unwrap();
        assert_eq!(s.data().data(), &[4.0, 5.0]);
        s.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);

        let v = Variable::parameter(NdArray::from_slice(&[1.0, 2.0]).unwrap());
        let p = v.pad(&[(1, 2)]).unwrap();
        assert_eq!(p.data().data(), &[0.0, 1.0, 2.0, 0.0, 0.0]);
        p.backward_with(NdArray::from_slice(&[9.0, 1.0, 2.0, 9.0, 9.0]).unwrap())
            .unwrap();
        assert_eq!(v.grad().unwrap().data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_take_points_accumulates_duplicates() {
        let x = matrix();
        let y = x.take_points(&[0, 1, 0], &[1, 2, 1]).unwrap();
        assert_eq!(y.dims(), vec![1, 3]);
        assert_eq!(y.data().data(), &[2.0, 6.0, 2.0]);
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[0.0, 2.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_select_gradient() {
        let x = matrix();
        let y = x.select(Some(&[1, 1]), None).unwrap();
        assert_eq!(y.dims(), vec![2, 3]);
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[0.0, 0.0, 0.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_squeeze_unsqueeze_roundtrip_gradient() {
        let x = matrix();
        let y = x.unsqueeze(0).unwrap().squeeze_axis(0).unwrap();
        assert_eq!(y.dims(), vec![2, 3]);
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[1.0; 6]);
    }
}
