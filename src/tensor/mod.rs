//! Dense N-dimensional `f32` arrays and the CPU kernels that operate on them.
//!
//! `NdArray` is a plain value: a flat row-major buffer plus a [`Shape`]. It knows
//! nothing about gradients; the autograd layer in [`crate::variable`] wraps it.

mod conv;
mod elementwise;
mod matmul;
mod movement;
mod reduce;

pub use conv::Conv2dGeometry;
pub use elementwise::{BinaryOp, UnaryOp};

use crate::config::check_alloc;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::fmt;

/// Flat contiguous buffer plus shape. `data.len() == shape.size()` always holds.
#[derive(Clone, PartialEq)]
pub struct NdArray {
    data: Vec<f32>,
    shape: Shape,
}

// ===== CONSTRUCTORS =====
impl NdArray {
    /// Create an array from a row-major buffer.
    pub fn new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        let elements = shape.size();
        if data.len() != elements {
            return Err(TensorError::ShapeDataMismatch {
                shape: shape.dims().to_vec(),
                elements,
                len: data.len(),
            });
        }
        check_alloc(elements)?;
        Ok(NdArray { data, shape })
    }

    /// Create an array from a buffer and literal dims.
    pub fn from_vec(data: Vec<f32>, dims: &[usize]) -> Result<Self> {
        Self::new(data, Shape::new(dims)?)
    }

    /// Kernel-internal constructor for buffers already sized to `shape`.
    pub(crate) fn from_parts(data: Vec<f32>, shape: Shape) -> Self {
        debug_assert_eq!(data.len(), shape.size(), "buffer/shape mismatch");
        NdArray { data, shape }
    }

    /// Rank-0 array holding one value.
    pub fn scalar(value: f32) -> Self {
        NdArray {
            data: vec![value],
            shape: Shape::scalar(),
        }
    }

    /// 1-D array copied from a slice.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        Self::from_vec(values.to_vec(), &[values.len()])
    }

    /// 2-D array from row literals.
    ///
    /// ```
    /// # use volta_core::NdArray;
    /// let m = NdArray::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap();
    /// assert_eq!(m.dims(), &[2, 3]);
    /// ```
    pub fn from_rows<const N: usize>(rows: &[[f32; N]]) -> Result<Self> {
        let data = rows.iter().flatten().copied().collect();
        Self::from_vec(data, &[rows.len(), N])
    }

    /// Array with every element set to `value`.
    pub fn full(shape: &Shape, value: f32) -> Result<Self> {
        check_alloc(shape.size())?;
        Ok(NdArray {
            data: vec![value; shape.size()],
            shape: shape.clone(),
        })
    }

    pub fn zeros(shape: &Shape) -> Result<Self> {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &Shape) -> Result<Self> {
        Self::full(shape, 1.0)
    }

    pub fn zeros_like(&self) -> Self {
        NdArray {
            data: vec![0.0; self.data.len()],
            shape: self.shape.clone(),
        }
    }

    pub fn ones_like(&self) -> Self {
        NdArray {
            data: vec![1.0; self.data.len()],
            shape: self.shape.clone(),
        }
    }

    /// Uniform samples in [0, 1) from the thread-local generator.
    pub fn rand(shape: &Shape) -> Result<Self> {
        Self::uniform_with(shape, 0.0, 1.0, &mut rand::rng())
    }

    /// Uniform samples in [low, high).
    pub fn uniform(shape: &Shape, low: f32, high: f32) -> Result<Self> {
        Self::uniform_with(shape, low, high, &mut rand::rng())
    }

    /// Uniform samples in [low, high) drawn from a caller-supplied generator.
    pub fn uniform_with<R: Rng + ?Sized>(
        shape: &Shape,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Result<Self> {
        if !(low < high) {
            return Err(TensorError::InvalidParameter(format!(
                "uniform range [{low}, {high}) is empty"
            )));
        }
        check_alloc(shape.size())?;
        let data = (0..shape.size())
            .map(|_| rng.random_range(low..high))
            .collect();
        Ok(Self::from_parts(data, shape.clone()))
    }

    /// Samples from the standard normal distribution N(0, 1).
    pub fn randn(shape: &Shape) -> Result<Self> {
        Self::normal_with(shape, 0.0, 1.0, &mut rand::rng())
    }

    /// Samples from N(mean, std²).
    pub fn normal(shape: &Shape, mean: f32, std: f32) -> Result<Self> {
        Self::normal_with(shape, mean, std, &mut rand::rng())
    }

    pub fn normal_with<R: Rng + ?Sized>(
        shape: &Shape,
        mean: f32,
        std: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let normal = Normal::new(mean, std)
            .map_err(|e| TensorError::InvalidParameter(format!("normal({mean}, {std}): {e}")))?;
        check_alloc(shape.size())?;
        let data = (0..shape.size()).map(|_| normal.sample(rng)).collect();
        Ok(Self::from_parts(data, shape.clone()))
    }
}

// ===== ACCESSORS =====
impl NdArray {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Row-major view of the buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable row-major view of the buffer. The shape cannot change through it.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, index: &[usize]) -> Result<f32> {
        Ok(self.data[self.shape.flat_index(index)?])
    }

    pub fn set(&mut self, index: &[usize], value: f32) -> Result<()> {
        let flat = self.shape.flat_index(index)?;
        self.data[flat] = value;
        Ok(())
    }

    /// The single value of a one-element array.
    pub fn item(&self) -> Result<f32> {
        match self.data.as_slice() {
            [v] => Ok(*v),
            _ => Err(TensorError::shape_mismatch("item", self.dims(), &[1])),
        }
    }

    /// Elementwise comparison within `tol`, requiring equal shapes.
    ///
    /// NaN never compares close.
    pub fn all_close(&self, other: &NdArray, tol: f32) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .finish()
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        write!(f, "NdArray{} [", self.shape)?;
        for (i, v) in self.data.iter().take(PREVIEW).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        if self.data.len() > PREVIEW {
            write!(f, ", ... ({} more)", self.data.len() - PREVIEW)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_new_checks_length() {
        let err = NdArray::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(
            err,
            TensorError::ShapeDataMismatch { elements: 4, len: 3, .. }
        ));
    }

    #[test]
    fn test_factories() {
        let s = Shape::of(&[2, 3]);
        assert!(NdArray::zeros(&s).unwrap().data().iter().all(|&v| v == 0.0));
        assert!(NdArray::ones(&s).unwrap().data().iter().all(|&v| v == 1.0));
        assert!(NdArray::full(&s, 2.5).unwrap().data().iter().all(|&v| v == 2.5));
        assert_eq!(NdArray::scalar(3.0).item().unwrap(), 3.0);
        assert!(NdArray::scalar(3.0).shape().is_scalar());
    }

    #[test]
    fn test_from_rows() {
        let m = NdArray::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert_eq!(m.dims(), &[2, 2]);
        assert_eq!(m.get(&[1, 0]).unwrap(), 3.0);

        let empty: [[f32; 2]; 0] = [];
        assert!(NdArray::from_rows(&empty).is_err());
    }

    #[test]
    fn test_random_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let s = Shape::of(&[64]);
        let u = NdArray::uniform_with(&s, -2.0, 2.0, &mut rng).unwrap();
        assert!(u.data().iter().all(|&v| (-2.0..2.0).contains(&v)));
        let r = NdArray::rand(&s).unwrap();
        assert!(r.data().iter().all(|&v| (0.0..1.0).contains(&v)));

        assert!(NdArray::uniform(&s, 1.0, 1.0).is_err());
        assert!(NdArray::normal(&s, 0.0, -1.0).is_err());

        let a = NdArray::normal_with(&s, 0.0, 1.0, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = NdArray::normal_with(&s, 0.0, 1.0, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_get_and_bounds() {
        let mut a = NdArray::zeros(&Shape::of(&[2, 2])).unwrap();
        a.set(&[0, 1], 5.0).unwrap();
        assert_eq!(a.data(), &[0.0, 5.0, 0.0, 0.0]);
        assert!(matches!(
            a.get(&[2, 0]),
            Err(TensorError::IndexOutOfRange { axis: 0, .. })
        ));
        assert!(a.item().is_err());
    }

    #[test]
    fn test_display_preview() {
        let a = NdArray::from_slice(&[1.0, 2.0]).unwrap();
        assert_eq!(a.to_string(), "NdArray(2,) [1, 2]");
    }
}
