use super::NdArray;
use super::elementwise::BinaryOp;
use crate::config::{SOFTMAX_PAR_THRESHOLD, check_alloc, threshold};
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use rayon::prelude::*;
use std::iter::{StepBy, Take};
use std::slice::Iter;

/// The values along one axis for a fixed position of every other axis.
type Lane<'a> = Take<StepBy<Iter<'a, f32>>>;

#[inline]
fn nan_max(acc: f32, x: f32) -> f32 {
    BinaryOp::Maximum.apply(acc, x)
}

#[inline]
fn nan_min(acc: f32, x: f32) -> f32 {
    BinaryOp::Minimum.apply(acc, x)
}

/// Index of the extreme element. Strict comparison keeps the first index on
/// ties; a NaN wins immediately.
fn arg_extreme<I, F>(values: I, better: F) -> usize
where
    I: Iterator<Item = f32>,
    F: Fn(f32, f32) -> bool,
{
    let mut best_idx = 0;
    let mut best = f32::NAN;
    for (i, x) in values.enumerate() {
        if x.is_nan() {
            return i;
        }
        if i == 0 || better(x, best) {
            best = x;
            best_idx = i;
        }
    }
    best_idx
}

fn population_var<I>(values: I, len: usize) -> f32
where
    I: Iterator<Item = f32> + Clone,
{
    let n = len as f32;
    let mean = values.clone().sum::<f32>() / n;
    values.map(|x| (x - mean) * (x - mean)).sum::<f32>() / n
}

// ===== GLOBAL REDUCTIONS =====
impl NdArray {
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f32 {
        self.sum() / self.size() as f32
    }

    /// Population variance (divides by n).
    pub fn var(&self) -> f32 {
        population_var(self.data.iter().copied(), self.size())
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, nan_max)
    }

    pub fn min(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, nan_min)
    }

    /// Flat index of the largest element; the first one wins ties.
    pub fn argmax(&self) -> usize {
        arg_extreme(self.data.iter().copied(), |x, best| x > best)
    }

    /// Flat index of the smallest element; the first one wins ties.
    pub fn argmin(&self) -> usize {
        arg_extreme(self.data.iter().copied(), |x, best| x < best)
    }
}

// ===== AXIS REDUCTIONS =====
impl NdArray {
    /// Reduce every lane along `axis` with `f`.
    ///
    /// With `keepdim` the axis stays with length 1, otherwise it is removed.
    fn reduce_lanes<F>(&self, axis: usize, keepdim: bool, f: F) -> Result<NdArray>
    where
        F: Fn(Lane<'_>) -> f32,
    {
        let (outer, len, inner) = self.shape.split_at_axis(axis)?;
        let mut out = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            for i in 0..inner {
                let base = o * len * inner + i;
                out.push(f(self.data[base..].iter().step_by(inner).take(len)));
            }
        }
        let shape = if keepdim {
            self.shape.with_axis_len(axis, 1)
        } else {
            self.shape.without_axis(axis)
        };
        Ok(NdArray::from_parts(out, shape))
    }

    /// Sum along `axis`.
    ///
    /// ```
    /// # use volta_core::NdArray;
    /// let m = NdArray::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap();
    /// assert_eq!(m.sum_axis(0, false).unwrap().data(), &[5.0, 7.0, 9.0]);
    /// assert_eq!(m.sum_axis(1, true).unwrap().dims(), &[2, 1]);
    /// ```
    pub fn sum_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        self.reduce_lanes(axis, keepdim, |lane| lane.sum())
    }

    pub fn mean_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        let len = self.shape.dim(axis)? as f32;
        self.reduce_lanes(axis, keepdim, |lane| lane.sum::<f32>() / len)
    }

    /// Population variance along `axis`.
    pub fn var_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        let len = self.shape.dim(axis)?;
        self.reduce_lanes(axis, keepdim, |lane| population_var(lane.copied(), len))
    }

    pub fn max_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        self.reduce_lanes(axis, keepdim, |lane| {
            lane.copied().fold(f32::NEG_INFINITY, nan_max)
        })
    }

    pub fn min_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        self.reduce_lanes(axis, keepdim, |lane| lane.copied().fold(f32::INFINITY, nan_min))
    }

    /// Index of the maximum along `axis`, stored as `f32`.
    pub fn argmax_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        self.reduce_lanes(axis, keepdim, |lane| {
            arg_extreme(lane.copied(), |x, best| x > best) as f32
        })
    }

    /// Index of the minimum along `axis`, stored as `f32`.
    pub fn argmin_axis(&self, axis: usize, keepdim: bool) -> Result<NdArray> {
        self.reduce_lanes(axis, keepdim, |lane| {
            arg_extreme(lane.copied(), |x, best| x < best) as f32
        })
    }

    /// Exact lane positions of the first maximum (or minimum) along `axis`,
    /// one per lane in row-major order of the remaining axes.
    pub(crate) fn arg_extreme_lanes(&self, axis: usize, max: bool) -> Result<Vec<usize>> {
        let (outer, len, inner) = self.shape.split_at_axis(axis)?;
        let mut out = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            for i in 0..inner {
                let lane = self.data[o * len * inner + i..].iter().step_by(inner).take(len);
                out.push(if max {
                    arg_extreme(lane.copied(), |x, best| x > best)
                } else {
                    arg_extreme(lane.copied(), |x, best| x < best)
                });
            }
        }
        Ok(out)
    }
}

// ===== BROADCAST INVERSES =====
impl NdArray {
    /// Sum away the dimensions that broadcasting to `self.shape` stretched from `target`.
    ///
    /// `target` must broadcast to `self.shape()`. This is the gradient routing
    /// for every broadcasting binary op.
    pub fn sum_to(&self, target: &Shape) -> Result<NdArray> {
        if &self.shape == target {
            return Ok(self.clone());
        }
        if !target.broadcasts_to(&self.shape) {
            return Err(TensorError::shape_mismatch("sum_to", self.dims(), target.dims()));
        }
        let mut out = vec![0.0; target.size()];
        for (&v, off) in self.data.iter().zip(target.broadcast_offsets(&self.shape)?) {
            out[off] += v;
        }
        Ok(NdArray::from_parts(out, target.clone()))
    }

    /// Materialize this array stretched to `target`.
    pub fn broadcast_to(&self, target: &Shape) -> Result<NdArray> {
        if &self.shape == target {
            return Ok(self.clone());
        }
        let offsets = self.shape.broadcast_offsets(target)?;
        check_alloc(target.size())?;
        let data = offsets.map(|off| self.data[off]).collect();
        Ok(NdArray::from_parts(data, target.clone()))
    }
}

// ===== SOFTMAX FAMILY =====

fn softmax_lane(lane: &mut [f32]) {
    let max = lane.iter().copied().fold(f32::NEG_INFINITY, nan_max);
    let mut sum = 0.0;
    for x in lane.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    lane.iter_mut().for_each(|x| *x /= sum);
}

fn log_softmax_lane(lane: &mut [f32]) {
    let max = lane.iter().copied().fold(f32::NEG_INFINITY, nan_max);
    let sum: f32 = lane.iter().map(|&x| (x - max).exp()).sum();
    let lse = max + sum.ln();
    lane.iter_mut().for_each(|x| *x -= lse);
}

impl NdArray {
    /// Rewrite every lane along `axis` in place on a copy of the data.
    ///
    /// Contiguous lanes (last axis) go through rayon above the softmax threshold.
    fn map_lanes<F>(&self, axis: usize, op_name: &str, f: F) -> Result<NdArray>
    where
        F: Fn(&mut [f32]) + Sync,
    {
        let (outer, len, inner) = self.shape.split_at_axis(axis)?;
        let mut out = self.data.clone();

        if inner == 1 {
            if out.len() >= threshold(&SOFTMAX_PAR_THRESHOLD) {
                log::trace!("{op_name}: {outer} lanes of {len} in parallel");
                out.par_chunks_mut(len).for_each(|lane| f(lane));
            } else {
                out.chunks_mut(len).for_each(|lane| f(lane));
            }
        } else {
            let mut lane = vec![0.0; len];
            for o in 0..outer {
                for i in 0..inner {
                    let base = o * len * inner + i;
                    for (k, v) in lane.iter_mut().enumerate() {
                        *v = out[base + k * inner];
                    }
                    f(&mut lane);
                    for (k, &v) in lane.iter().enumerate() {
                        out[base + k * inner] = v;
                    }
                }
            }
        }
        Ok(NdArray::from_parts(out, self.shape.clone()))
    }

    /// Numerically stable softmax along `axis`: the lane maximum is subtracted
    /// before exponentiating.
    pub fn softmax(&self, axis: usize) -> Result<NdArray> {
        self.map_lanes(axis, "softmax", softmax_lane)
    }

    /// `x - max - ln(Σ exp(x - max))` along `axis`.
    pub fn log_softmax(&self, axis: usize) -> Result<NdArray> {
        self.map_lanes(axis, "log_softmax", log_softmax_lane)
    }
}

// ===== TOP-K AND MASKS =====
impl NdArray {
    /// The `k` largest entries of every row along the last axis, in descending
    /// order. Ties go to the lower index.
    ///
    /// Returns the values (last dim replaced by `k`) and the per-row column
    /// indices, flattened row-major.
    pub fn topk(&self, k: usize) -> Result<(NdArray, Vec<usize>)> {
        let rank = self.rank();
        if rank == 0 {
            return Err(TensorError::RankViolation {
                op: "topk",
                required: 1,
                actual: 0,
            });
        }
        let cols = self.dims()[rank - 1];
        if k == 0 || k > cols {
            return Err(TensorError::InvalidParameter(format!(
                "topk: k={k} must be in 1..={cols}"
            )));
        }

        let rows = self.size() / cols;
        let mut values = Vec::with_capacity(rows * k);
        let mut indices = Vec::with_capacity(rows * k);
        let mut order: Vec<usize> = Vec::with_capacity(cols);
        for row in self.data.chunks(cols) {
            order.clear();
            order.extend(0..cols);
            // Stable sort keeps lower indices first among equal values.
            order.sort_by(|&i, &j| row[j].total_cmp(&row[i]));
            for &c in &order[..k] {
                values.push(row[c]);
                indices.push(c);
            }
        }
        Ok((
            NdArray::from_parts(values, self.shape.with_axis_len(rank - 1, k)),
            indices,
        ))
    }

    /// Same shape as `self`, with 1.0 at each row's top-`k` positions and 0.0 elsewhere.
    pub fn topk_mask(&self, k: usize) -> Result<NdArray> {
        let (_, indices) = self.topk(k)?;
        let cols = self.dims()[self.rank() - 1];
        let mut mask = vec![0.0; self.size()];
        for (n, &c) in indices.iter().enumerate() {
            mask[(n / k) * cols + c] = 1.0;
        }
        Ok(NdArray::from_parts(mask, self.shape.clone()))
    }

    /// `[indices.len(), depth]` matrix with a single 1.0 per row.
    pub fn one_hot(indices: &[usize], depth: usize) -> Result<NdArray> {
        let shape = Shape::new(&[indices.len(), depth])?;
        check_alloc(shape.size())?;
        let mut data = vec![0.0; shape.size()];
        for (row, &idx) in indices.iter().enumerate() {
            if idx >= depth {
                return Err(TensorError::IndexOutOfRange {
                    axis: 1,
                    index: idx,
                    size: depth,
                });
            }
            data[row * depth + idx] = 1.0;
        }
        Ok(NdArray::from_parts(data, shape))
    }
}
