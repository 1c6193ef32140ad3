use super::NdArray;
use crate::config::check_alloc;
use crate::error::{Result, TensorError};
use crate::shape::{BroadcastOffsets, Shape};

fn require_rank(op: &'static str, array: &NdArray, required: usize) -> Result<()> {
    if array.rank() != required {
        return Err(TensorError::RankViolation {
            op,
            required,
            actual: array.rank(),
        });
    }
    Ok(())
}

fn check_index(axis: usize, index: usize, size: usize) -> Result<()> {
    if index >= size {
        return Err(TensorError::IndexOutOfRange { axis, index, size });
    }
    Ok(())
}

/// Column indices that form one ascending run can be copied as a slice.
fn contiguous_run(cols: &[usize]) -> Option<(usize, usize)> {
    let first = *cols.first()?;
    cols.windows(2)
        .all(|w| w[1] == w[0] + 1)
        .then_some((first, first + cols.len()))
}

// ===== RESHAPE / AXIS ORDER =====
impl NdArray {
    /// Same data under a new shape with the same element count.
    pub fn reshape(&self, dims: &[usize]) -> Result<NdArray> {
        self.clone().into_shape(Shape::new(dims)?)
    }

    /// Consume the array and relabel its shape, reusing the buffer.
    pub fn into_shape(self, shape: Shape) -> Result<NdArray> {
        if shape.size() != self.size() {
            return Err(TensorError::shape_mismatch("reshape", self.dims(), shape.dims()));
        }
        Ok(NdArray {
            data: self.data,
            shape,
        })
    }

    /// Reorder axes: output axis `i` is input axis `axes[i]`.
    pub fn permute(&self, axes: &[usize]) -> Result<NdArray> {
        let rank = self.rank();
        if axes.len() != rank {
            return Err(TensorError::InvalidParameter(format!(
                "permute: {} axes given for rank {rank}",
                axes.len()
            )));
        }
        let mut seen = vec![false; rank];
        for &ax in axes {
            self.shape.check_axis(ax)?;
            if std::mem::replace(&mut seen[ax], true) {
                return Err(TensorError::InvalidParameter(format!(
                    "permute: axis {ax} repeated in {axes:?}"
                )));
            }
        }

        let strides = self.shape.strides();
        let out_dims: Vec<usize> = axes.iter().map(|&ax| self.dims()[ax]).collect();
        let src_strides: Vec<usize> = axes.iter().map(|&ax| strides[ax]).collect();
        let data = BroadcastOffsets::new(out_dims.clone(), src_strides)
            .map(|off| self.data[off])
            .collect();
        Ok(NdArray::from_parts(data, Shape::from_dims(out_dims)))
    }

    /// Reverse all axes. Rank 0 and 1 come back unchanged.
    pub fn transpose(&self) -> NdArray {
        if self.rank() < 2 {
            return self.clone();
        }
        let axes: Vec<usize> = (0..self.rank()).rev().collect();
        self.permute(&axes)
            .unwrap_or_else(|_| unreachable!("reversed axes form a valid permutation"))
    }

    /// Swap the last two axes, leaving batch axes in place.
    pub fn swap_last_axes(&self) -> Result<NdArray> {
        let rank = self.rank();
        if rank < 2 {
            return Err(TensorError::RankViolation {
                op: "swap_last_axes",
                required: 2,
                actual: rank,
            });
        }
        let mut axes: Vec<usize> = (0..rank).collect();
        axes.swap(rank - 2, rank - 1);
        self.permute(&axes)
    }

    /// Drop `axis`, which must have length 1.
    pub fn squeeze_axis(&self, axis: usize) -> Result<NdArray> {
        let len = self.shape.dim(axis)?;
        if len != 1 {
            return Err(TensorError::InvalidParameter(format!(
                "squeeze_axis: axis {axis} has length {len}"
            )));
        }
        Ok(NdArray::from_parts(self.data.clone(), self.shape.without_axis(axis)))
    }

    /// Insert a length-1 axis at position `axis` (0..=rank).
    pub fn unsqueeze(&self, axis: usize) -> Result<NdArray> {
        if axis > self.rank() {
            return Err(TensorError::DimensionOutOfBounds {
                dim: axis,
                shape: self.dims().to_vec(),
            });
        }
        let mut dims = self.dims().to_vec();
        dims.insert(axis, 1);
        Ok(NdArray::from_parts(self.data.clone(), Shape::from_dims(dims)))
    }
}

// ===== RANGE SLICING =====
impl NdArray {
    fn check_ranges(&self, op: &str, ranges: &[(usize, usize)]) -> Result<()> {
        if ranges.len() != self.rank() {
            return Err(TensorError::InvalidParameter(format!(
                "{op}: {} ranges given for rank {}",
                ranges.len(),
                self.rank()
            )));
        }
        Ok(())
    }

    /// Keep `start..end` along every axis.
    pub fn shrink(&self, ranges: &[(usize, usize)]) -> Result<NdArray> {
        self.check_ranges("shrink", ranges)?;
        let mut base = 0;
        let strides = self.shape.strides();
        let mut out_dims = Vec::with_capacity(ranges.len());
        for (axis, (&(start, end), &dim)) in ranges.iter().zip(self.dims()).enumerate() {
            if start >= end {
                return Err(TensorError::InvalidParameter(format!(
                    "shrink: empty range {start}..{end} on axis {axis}"
                )));
            }
            if end > dim {
                return Err(TensorError::IndexOutOfRange {
                    axis,
                    index: end - 1,
                    size: dim,
                });
            }
            base += start * strides[axis];
            out_dims.push(end - start);
        }
        let data = BroadcastOffsets::new(out_dims.clone(), strides)
            .map(|off| self.data[base + off])
            .collect();
        Ok(NdArray::from_parts(data, Shape::from_dims(out_dims)))
    }

    /// Surround the array with zeros: `(before, after)` per axis.
    pub fn pad(&self, padding: &[(usize, usize)]) -> Result<NdArray> {
        self.check_ranges("pad", padding)?;
        let out_dims: Vec<usize> = padding
            .iter()
            .zip(self.dims())
            .map(|(&(before, after), &d)| before + d + after)
            .collect();
        let out_shape = Shape::from_dims(out_dims);
        check_alloc(out_shape.size())?;

        let out_strides = out_shape.strides();
        let base: usize = padding
            .iter()
            .zip(&out_strides)
            .map(|(&(before, _), &s)| before * s)
            .sum();
        let mut data = vec![0.0; out_shape.size()];
        let dst = BroadcastOffsets::new(self.dims().to_vec(), out_strides);
        for (&v, off) in self.data.iter().zip(dst) {
            data[base + off] = v;
        }
        Ok(NdArray::from_parts(data, out_shape))
    }
}

// ===== INDEXED SLICING =====
impl NdArray {
    /// Point-index gather on a matrix: element `i` of the `[1, N]` result is
    /// `self[rows[i], cols[i]]`.
    pub fn take_points(&self, rows: &[usize], cols: &[usize]) -> Result<NdArray> {
        require_rank("take_points", self, 2)?;
        if rows.len() != cols.len() {
            return Err(TensorError::shape_mismatch("take_points", &[rows.len()], &[cols.len()]));
        }
        let (h, w) = (self.dims()[0], self.dims()[1]);
        let mut data = Vec::with_capacity(rows.len());
        for (&r, &c) in rows.iter().zip(cols) {
            check_index(0, r, h)?;
            check_index(1, c, w)?;
            data.push(self.data[r * w + c]);
        }
        NdArray::new(data, Shape::new(&[1, rows.len()])?)
    }

    /// Scatter-add inverse of [`take_points`](Self::take_points). Repeated
    /// points accumulate.
    pub fn index_add_points(&mut self, rows: &[usize], cols: &[usize], src: &NdArray) -> Result<()> {
        require_rank("index_add_points", self, 2)?;
        if rows.len() != cols.len() || src.size() != rows.len() {
            return Err(TensorError::shape_mismatch(
                "index_add_points",
                &[rows.len(), cols.len()],
                src.dims(),
            ));
        }
        let (h, w) = (self.dims()[0], self.dims()[1]);
        for ((&r, &c), &v) in rows.iter().zip(cols).zip(&src.data) {
            check_index(0, r, h)?;
            check_index(1, c, w)?;
            self.data[r * w + c] += v;
        }
        Ok(())
    }

    /// Rectangular gather on a matrix. `None` selects the whole axis.
    ///
    /// ```
    /// # use volta_core::NdArray;
    /// let m = NdArray::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap();
    /// let s = m.select(Some(&[1]), Some(&[0, 2])).unwrap();
    /// assert_eq!(s.data(), &[4.0, 6.0]);
    /// ```
    pub fn select(&self, rows: Option<&[usize]>, cols: Option<&[usize]>) -> Result<NdArray> {
        require_rank("select", self, 2)?;
        let (h, w) = (self.dims()[0], self.dims()[1]);
        let all_rows: Vec<usize>;
        let rows = match rows {
            Some(r) => r,
            None => {
                all_rows = (0..h).collect();
                &all_rows
            }
        };
        for &r in rows {
            check_index(0, r, h)?;
        }
        let (run, ncols) = match cols {
            None => (Some((0, w)), w),
            Some(c) => {
                for &ci in c {
                    check_index(1, ci, w)?;
                }
                (contiguous_run(c), c.len())
            }
        };

        let out_shape = Shape::new(&[rows.len(), ncols])?;
        check_alloc(out_shape.size())?;
        let mut data = Vec::with_capacity(out_shape.size());
        for &r in rows {
            let row = &self.data[r * w..(r + 1) * w];
            match (run, cols) {
                (Some((start, end)), _) => data.extend_from_slice(&row[start..end]),
                (None, Some(c)) => data.extend(c.iter().map(|&ci| row[ci])),
                (None, None) => unreachable!("no column list means a full run"),
            }
        }
        Ok(NdArray::from_parts(data, out_shape))
    }

    /// Scatter-add inverse of [`select`](Self::select). Repeated indices accumulate.
    pub fn index_add_select(
        &mut self,
        rows: Option<&[usize]>,
        cols: Option<&[usize]>,
        src: &NdArray,
    ) -> Result<()> {
        require_rank("index_add_select", self, 2)?;
        let (h, w) = (self.dims()[0], self.dims()[1]);
        let nrows = rows.map_or(h, <[usize]>::len);
        let ncols = cols.map_or(w, <[usize]>::len);
        if src.dims() != [nrows, ncols].as_slice() {
            return Err(TensorError::shape_mismatch("index_add_select", &[nrows, ncols], src.dims()));
        }
        for (i, src_row) in src.data.chunks(ncols).enumerate() {
            let r = rows.map_or(i, |rs| rs[i]);
            check_index(0, r, h)?;
            for (j, &v) in src_row.iter().enumerate() {
                let c = cols.map_or(j, |cs| cs[j]);
                check_index(1, c, w)?;
                self.data[r * w + c] += v;
            }
        }
        Ok(())
    }
}
