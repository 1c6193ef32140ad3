use super::NdArray;
use crate::config::check_alloc;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Kernel, stride and zero-padding of a 2D sliding window, as (height, width).
///
/// Output size: `H_out` = (`H_in` + 2*padding - kernel) / stride + 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl Conv2dGeometry {
    pub fn new(
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<Self> {
        if kernel.0 == 0 || kernel.1 == 0 || stride.0 == 0 || stride.1 == 0 {
            return Err(TensorError::InvalidParameter(format!(
                "conv geometry needs nonzero kernel and stride, got kernel {kernel:?} stride {stride:?}"
            )));
        }
        Ok(Conv2dGeometry {
            kernel,
            stride,
            padding,
        })
    }

    /// Square kernel, stride and padding.
    pub fn square(kernel: usize, stride: usize, padding: usize) -> Result<Self> {
        Self::new((kernel, kernel), (stride, stride), (padding, padding))
    }

    /// Output (height, width) for an input of (h, w).
    pub fn output_size(&self, h: usize, w: usize) -> Result<(usize, usize)> {
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        if h + 2 * ph < kh || w + 2 * pw < kw {
            return Err(TensorError::InvalidParameter(format!(
                "kernel {:?} larger than padded input ({}, {})",
                self.kernel,
                h + 2 * ph,
                w + 2 * pw
            )));
        }
        Ok(((h + 2 * ph - kh) / sh + 1, (w + 2 * pw - kw) / sw + 1))
    }
}

/// Visit every (column-matrix offset, image offset) pair of the im2col
/// layout. Taps that land in the zero padding are skipped.
fn for_each_tap<F>(dims: [usize; 4], geom: &Conv2dGeometry, oh: usize, ow: usize, mut f: F)
where
    F: FnMut(usize, usize),
{
    let [batch, channels, h, w] = dims;
    let (kh, kw) = geom.kernel;
    let (sh, sw) = geom.stride;
    let (ph, pw) = geom.padding;
    let cols = channels * kh * kw;

    for b in 0..batch {
        for oy in 0..oh {
            for ox in 0..ow {
                let row_idx = b * (oh * ow) + oy * ow + ox;
                for c in 0..channels {
                    for ky in 0..kh {
                        // Position in the padded image
                        let y = oy * sh + ky;
                        if y < ph || y >= h + ph {
                            continue;
                        }
                        for kx in 0..kw {
                            let x = ox * sw + kx;
                            if x < pw || x >= w + pw {
                                continue;
                            }
                            let img_idx = ((b * channels + c) * h + (y - ph)) * w + (x - pw);
                            let col_idx = c * (kh * kw) + ky * kw + kx;
                            f(row_idx * cols + col_idx, img_idx);
                        }
                    }
                }
            }
        }
    }
}

fn image_dims(op: &'static str, shape: &Shape) -> Result<[usize; 4]> {
    match *shape.dims() {
        [b, c, h, w] => Ok([b, c, h, w]),
        _ => Err(TensorError::RankViolation {
            op,
            required: 4,
            actual: shape.rank(),
        }),
    }
}

// ===== CONVOLUTION SUPPORT =====
impl NdArray {
    /// Unfold a (B, C, H, W) image into a matrix of receptive-field patches.
    ///
    /// Output is (B*H_out*W_out, C*KH*KW); out-of-bounds taps read as zero.
    /// Convolution then becomes one matmul against the kernel reshaped to
    /// (C_out, C*KH*KW) and transposed.
    pub fn im2col(&self, geom: &Conv2dGeometry) -> Result<NdArray> {
        let dims = image_dims("im2col", &self.shape)?;
        let [batch, channels, h, w] = dims;
        let (oh, ow) = geom.output_size(h, w)?;
        let out_shape = Shape::new(&[batch * oh * ow, channels * geom.kernel.0 * geom.kernel.1])?;
        check_alloc(out_shape.size())?;

        let mut cols = vec![0.0; out_shape.size()];
        for_each_tap(dims, geom, oh, ow, |col_idx, img_idx| {
            cols[col_idx] = self.data[img_idx];
        });
        Ok(NdArray::from_parts(cols, out_shape))
    }

    /// Fold a patch matrix back onto an image of `image_shape`, summing the
    /// contributions of overlapping windows. Inverse scatter of [`im2col`](Self::im2col).
    pub fn col2im(&self, image_shape: &Shape, geom: &Conv2dGeometry) -> Result<NdArray> {
        let dims = image_dims("col2im", image_shape)?;
        let [batch, channels, h, w] = dims;
        let (oh, ow) = geom.output_size(h, w)?;
        let expected = [batch * oh * ow, channels * geom.kernel.0 * geom.kernel.1];
        if self.dims() != expected.as_slice() {
            return Err(TensorError::shape_mismatch("col2im", &expected, self.dims()));
        }
        check_alloc(image_shape.size())?;

        let mut image = vec![0.0; image_shape.size()];
        for_each_tap(dims, geom, oh, ow, |col_idx, img_idx| {
            image[img_idx] += self.data[col_idx];
        });
        Ok(NdArray::from_parts(image, image_shape.clone()))
    }
}
