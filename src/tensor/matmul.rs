use super::NdArray;
use crate::config::{BATCHED_MATMUL_PAR_THRESHOLD, MATMUL_PAR_THRESHOLD, check_alloc, threshold};
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use rayon::prelude::*;

/// One output row: `out_row += a_row @ b` with `b` laid out (k, n).
///
/// Inner loop walks `b` and `out_row` contiguously (i-k-j order).
#[inline]
fn row_kernel(a_row: &[f32], b: &[f32], out_row: &mut [f32], n: usize) {
    for (p, &a_ip) in a_row.iter().enumerate() {
        let b_row = &b[p * n..(p + 1) * n];
        for (o, &b_pj) in out_row.iter_mut().zip(b_row) {
            *o += a_ip * b_pj;
        }
    }
}

/// Raw matrix multiplication into `out`: (m,k) @ (k,n) -> (m,n).
fn gemm_into(a: &[f32], b: &[f32], out: &mut [f32], k: usize, n: usize) {
    for (a_row, out_row) in a.chunks(k).zip(out.chunks_mut(n)) {
        row_kernel(a_row, b, out_row, n);
    }
}

// ===== MATRIX MULTIPLICATION =====
impl NdArray {
    /// Matrix product over the last two axes.
    ///
    /// - (m,k) @ (k,n) -> (m,n)
    /// - (..., m,k) @ (..., k,n) -> (..., m,n), batch axes broadcast
    ///
    /// Both operands need rank >= 2. Unequal inner dims fail with
    /// `DimensionMismatch`; batch axes that cannot broadcast fail with `ShapeMismatch`.
    pub fn matmul(&self, other: &NdArray) -> Result<NdArray> {
        for operand in [self, other] {
            if operand.rank() < 2 {
                return Err(TensorError::RankViolation {
                    op: "matmul",
                    required: 2,
                    actual: operand.rank(),
                });
            }
        }
        let (ra, rb) = (self.rank(), other.rank());
        let (m, k) = (self.dims()[ra - 2], self.dims()[ra - 1]);
        let (k2, n) = (other.dims()[rb - 2], other.dims()[rb - 1]);
        if k != k2 {
            return Err(TensorError::DimensionMismatch {
                lhs: self.dims().to_vec(),
                rhs: other.dims().to_vec(),
            });
        }

        if ra == 2 && rb == 2 {
            return self.matmul_2d(other, m, k, n);
        }
        self.matmul_batched(other, m, k, n)
    }

    fn matmul_2d(&self, other: &NdArray, m: usize, k: usize, n: usize) -> Result<NdArray> {
        check_alloc(m * n)?;
        let mut out = vec![0.0; m * n];
        if m > 1 && m * k * n >= threshold(&MATMUL_PAR_THRESHOLD) {
            log::trace!("matmul ({m},{k}) @ ({k},{n}): rows in parallel");
            out.par_chunks_mut(n)
                .zip(self.data.par_chunks(k))
                .for_each(|(out_row, a_row)| row_kernel(a_row, &other.data, out_row, n));
        } else {
            gemm_into(&self.data, &other.data, &mut out, k, n);
        }
        Ok(NdArray::from_parts(out, Shape::from_dims(vec![m, n])))
    }

    fn matmul_batched(&self, other: &NdArray, m: usize, k: usize, n: usize) -> Result<NdArray> {
        let (ra, rb) = (self.rank(), other.rank());
        let batch_a = Shape::from_dims(self.dims()[..ra - 2].to_vec());
        let batch_b = Shape::from_dims(other.dims()[..rb - 2].to_vec());
        let batch = Shape::broadcast(&batch_a, &batch_b)
            .map_err(|_| TensorError::shape_mismatch("matmul", self.dims(), other.dims()))?;

        let mut out_dims = batch.dims().to_vec();
        out_dims.extend([m, n]);
        let out_shape = Shape::from_dims(out_dims);
        check_alloc(out_shape.size())?;

        // Which matrix of each operand feeds output batch `i`.
        let a_idx: Vec<usize> = batch_a.broadcast_offsets(&batch)?.collect();
        let b_idx: Vec<usize> = batch_b.broadcast_offsets(&batch)?.collect();

        let (a_mat, b_mat, o_mat) = (m * k, k * n, m * n);
        let mut out = vec![0.0; out_shape.size()];
        let run = |(bi, chunk): (usize, &mut [f32])| {
            let a = &self.data[a_idx[bi] * a_mat..(a_idx[bi] + 1) * a_mat];
            let b = &other.data[b_idx[bi] * b_mat..(b_idx[bi] + 1) * b_mat];
            gemm_into(a, b, chunk, k, n);
        };

        if batch.size() > 1 && out.len() >= threshold(&BATCHED_MATMUL_PAR_THRESHOLD) {
            log::trace!(
                "batched matmul {} @ {}: {} batches in parallel",
                self.shape,
                other.shape,
                batch.size()
            );
            out.par_chunks_mut(o_mat).enumerate().for_each(run);
        } else {
            out.chunks_mut(o_mat).enumerate().for_each(run);
        }
        Ok(NdArray::from_parts(out, out_shape))
    }
}
