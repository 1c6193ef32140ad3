//! Shape, stride and broadcasting utilities.

use crate::error::{Result, TensorError};
use std::fmt;

/// Immutable N-dimensional size vector.
///
/// Every dimension is positive. A rank-0 shape (no dims) describes a scalar
/// and has size 1.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a shape, rejecting zero-sized dimensions.
    pub fn new(dims: &[usize]) -> Result<Self> {
        if let Some(pos) = dims.iter().position(|&d| d == 0) {
            return Err(TensorError::InvalidParameter(format!(
                "dimension {pos} of {dims:?} is zero"
            )));
        }
        Ok(Shape(dims.to_vec()))
    }

    /// Create a shape from literal dims.
    ///
    /// # Panics
    /// Panics if any dimension is zero. Use [`Shape::new`] for untrusted input.
    pub fn of(dims: &[usize]) -> Self {
        assert!(
            dims.iter().all(|&d| d > 0),
            "Shape dims must be positive, got {dims:?}"
        );
        Shape(dims.to_vec())
    }

    /// Rank-0 shape.
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    /// Dims derived from an already valid shape (every entry positive).
    pub(crate) fn from_dims(dims: Vec<usize>) -> Self {
        debug_assert!(dims.iter().all(|&d| d > 0), "zero dim in {dims:?}");
        Shape(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements (product of dims; 1 for a scalar).
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Size of one axis.
    pub fn dim(&self, axis: usize) -> Result<usize> {
        self.0
            .get(axis)
            .copied()
            .ok_or_else(|| TensorError::DimensionOutOfBounds {
                dim: axis,
                shape: self.0.clone(),
            })
    }

    pub(crate) fn check_axis(&self, axis: usize) -> Result<()> {
        self.dim(axis).map(|_| ())
    }

    /// Row-major (C-contiguous) strides.
    ///
    /// For shape [3, 4, 5], strides are [20, 5, 1].
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.0.len()];
        for i in (0..self.0.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }

    /// Flat offset of a multi-index.
    pub fn flat_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.0.len() {
            return Err(TensorError::shape_mismatch("flat_index", &self.0, index));
        }
        let mut flat = 0;
        for (axis, (&i, &d)) in index.iter().zip(&self.0).enumerate() {
            if i >= d {
                return Err(TensorError::IndexOutOfRange {
                    axis,
                    index: i,
                    size: d,
                });
            }
            flat = flat * d + i;
        }
        Ok(flat)
    }

    /// Multi-index of a flat offset.
    pub fn multi_index(&self, flat: usize) -> Result<Vec<usize>> {
        let size = self.size();
        if flat >= size {
            return Err(TensorError::IndexOutOfRange {
                axis: 0,
                index: flat,
                size,
            });
        }
        let mut coords = vec![0; self.0.len()];
        let mut rem = flat;
        for (d, &dim_sz) in self.0.iter().enumerate().rev() {
            coords[d] = rem % dim_sz;
            rem /= dim_sz;
        }
        Ok(coords)
    }

    /// Broadcast two shapes following NumPy rules.
    ///
    /// Shapes are aligned from the trailing edge; two dims are compatible when
    /// equal or when one of them is 1, and the result takes the larger.
    ///
    /// - (3, 1) + (1, 4) -> (3, 4)
    /// - (5, 3, 1) + (1, 4) -> (5, 3, 4)
    pub fn broadcast(a: &Shape, b: &Shape) -> Result<Shape> {
        let rank = a.rank().max(b.rank());
        let mut result = vec![1; rank];
        for i in 0..rank {
            let a_dim = a.trailing(i);
            let b_dim = b.trailing(i);
            result[rank - 1 - i] = if a_dim == b_dim || b_dim == 1 {
                a_dim
            } else if a_dim == 1 {
                b_dim
            } else {
                return Err(TensorError::shape_mismatch("broadcast", &a.0, &b.0));
            };
        }
        Ok(Shape(result))
    }

    pub fn broadcast_with(&self, other: &Shape) -> Result<Shape> {
        Shape::broadcast(self, other)
    }

    /// Dim `i` positions from the right, or 1 past the leading edge.
    fn trailing(&self, i: usize) -> usize {
        if i < self.0.len() {
            self.0[self.0.len() - 1 - i]
        } else {
            1
        }
    }

    /// True when this shape can be stretched to `target` without touching `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        self.rank() <= target.rank()
            && (0..self.rank()).all(|i| {
                let d = self.trailing(i);
                d == 1 || d == target.trailing(i)
            })
    }

    /// Strides of this shape laid over `target`: 0 on stretched or missing axes.
    pub fn broadcast_strides(&self, target: &Shape) -> Result<Vec<usize>> {
        if !self.broadcasts_to(target) {
            return Err(TensorError::shape_mismatch("broadcast_to", &self.0, &target.0));
        }
        let own = self.strides();
        let offset = target.rank() - self.rank();
        let mut strides = vec![0; target.rank()];
        for (i, (&d, &s)) in self.0.iter().zip(&own).enumerate() {
            if d != 1 {
                strides[offset + i] = s;
            }
        }
        Ok(strides)
    }

    /// Iterator yielding, for every element of `target` in row-major order, the
    /// flat offset of the source element of this shape it is broadcast from.
    pub fn broadcast_offsets(&self, target: &Shape) -> Result<BroadcastOffsets> {
        let strides = self.broadcast_strides(target)?;
        Ok(BroadcastOffsets::new(target.0.clone(), strides))
    }

    /// Axes of `self` that collapse when summing down to `target`.
    ///
    /// Leading axes `target` lacks, plus axes where `target` has 1 and `self` does not.
    pub fn reduction_axes_to(&self, target: &Shape) -> Vec<usize> {
        let offset = self.rank().saturating_sub(target.rank());
        let mut axes: Vec<usize> = (0..offset).collect();
        for (i, &t) in target.0.iter().enumerate() {
            if t == 1 && self.0.get(offset + i).is_some_and(|&d| d > 1) {
                axes.push(offset + i);
            }
        }
        axes
    }

    /// Shape with `axis` removed.
    pub(crate) fn without_axis(&self, axis: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.remove(axis);
        Shape(dims)
    }

    /// Shape with `axis` set to `len`.
    pub(crate) fn with_axis_len(&self, axis: usize, len: usize) -> Shape {
        let mut dims = self.0.clone();
        dims[axis] = len;
        Shape(dims)
    }

    /// Split into (outer, axis, inner) extents around `axis`.
    pub(crate) fn split_at_axis(&self, axis: usize) -> Result<(usize, usize, usize)> {
        let len = self.dim(axis)?;
        let outer = self.0[..axis].iter().product();
        let inner = self.0[axis + 1..].iter().product();
        Ok((outer, len, inner))
    }
}

/// Odometer over a target shape that tracks the matching source offset.
#[derive(Debug, Clone)]
pub struct BroadcastOffsets {
    dims: Vec<usize>,
    strides: Vec<usize>,
    coords: Vec<usize>,
    offset: usize,
    remaining: usize,
}

impl BroadcastOffsets {
    /// Walk `dims` row-major, advancing the offset by `strides` per axis.
    pub(crate) fn new(dims: Vec<usize>, strides: Vec<usize>) -> Self {
        let remaining = dims.iter().product();
        let coords = vec![0; dims.len()];
        BroadcastOffsets {
            dims,
            strides,
            coords,
            offset: 0,
            remaining,
        }
    }
}

impl Iterator for BroadcastOffsets {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.offset;
        self.remaining -= 1;
        for d in (0..self.dims.len()).rev() {
            self.coords[d] += 1;
            self.offset += self.strides[d];
            if self.coords[d] < self.dims[d] {
                break;
            }
            self.offset -= self.strides[d] * self.dims[d];
            self.coords[d] = 0;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for BroadcastOffsets {}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = TensorError;

    fn try_from(dims: &[usize]) -> Result<Self> {
        Shape::new(dims)
    }
}

impl TryFrom<Vec<usize>> for Shape {
    type Error = TensorError;

    fn try_from(dims: Vec<usize>) -> Result<Self> {
        Shape::new(&dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::of(&[2, 3, 4]);
        assert_eq!(s.rank(), 3);
        assert_eq!(s.dim(1).unwrap(), 3);
        assert_eq!(s.size(), 24);
        assert!(!s.is_scalar());
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.to_string(), "(2, 3, 4)");
        assert_eq!(Shape::of(&[5]).to_string(), "(5,)");
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.size(), 1);
        assert!(s.strides().is_empty());
    }

    #[test]
    fn test_zero_dim_rejected() {
        assert!(Shape::new(&[2, 0]).is_err());
        assert!(Shape::try_from(vec![3, 1]).is_ok());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(Shape::of(&[2, 3]), Shape::new(&[2, 3]).unwrap());
        assert_ne!(Shape::of(&[2, 3]), Shape::of(&[3, 2]));
    }

    #[test]
    fn test_broadcast_rules() {
        let b = |x: &[usize], y: &[usize]| Shape::broadcast(&Shape::of(x), &Shape::of(y));
        assert_eq!(b(&[3, 1], &[1, 4]).unwrap(), Shape::of(&[3, 4]));
        assert_eq!(b(&[5, 3, 1], &[1, 4]).unwrap(), Shape::of(&[5, 3, 4]));
        assert_eq!(b(&[2, 3], &[2, 3]).unwrap(), Shape::of(&[2, 3]));
        assert_eq!(
            Shape::broadcast(&Shape::of(&[2, 3]), &Shape::scalar()).unwrap(),
            Shape::of(&[2, 3])
        );
        let err = b(&[2, 3], &[2, 4]).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { op: "broadcast", .. }));
    }

    #[test]
    fn test_index_roundtrip() {
        let s = Shape::of(&[2, 3, 4]);
        assert_eq!(s.flat_index(&[1, 2, 3]).unwrap(), 12 + 8 + 3);
        assert_eq!(s.multi_index(23).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            s.flat_index(&[0, 3, 0]),
            Err(TensorError::IndexOutOfRange { axis: 1, index: 3, size: 3 })
        ));
        assert!(s.multi_index(24).is_err());
        assert!(s.flat_index(&[0, 0]).is_err());
    }

    #[test]
    fn test_broadcast_offsets() {
        let src = Shape::of(&[3]);
        let offsets: Vec<usize> = src.broadcast_offsets(&Shape::of(&[2, 3])).unwrap().collect();
        assert_eq!(offsets, vec![0, 1, 2, 0, 1, 2]);

        let col = Shape::of(&[2, 1]);
        let offsets: Vec<usize> = col.broadcast_offsets(&Shape::of(&[2, 3])).unwrap().collect();
        assert_eq!(offsets, vec![0, 0, 0, 1, 1, 1]);

        assert!(Shape::of(&[2]).broadcast_offsets(&Shape::of(&[2, 3])).is_err());
    }

    #[test]
    fn test_reduction_axes() {
        let broadcast = Shape::of(&[3, 4]);
        assert_eq!(broadcast.reduction_axes_to(&Shape::of(&[1, 4])), vec![0]);
        let broadcast = Shape::of(&[2, 3, 4]);
        assert_eq!(broadcast.reduction_axes_to(&Shape::of(&[4])), vec![0, 1]);
        assert_eq!(broadcast.reduction_axes_to(&Shape::of(&[3, 1])), vec![0, 2]);
    }
}
