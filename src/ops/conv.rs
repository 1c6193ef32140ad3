use super::grad_if;
use crate::autograd::GradFn;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::{Conv2dGeometry, NdArray};
use crate::variable::Variable;

/// Backward of `im2col`: fold the patch gradient back onto the image.
pub struct Im2ColGradFn {
    geom: Conv2dGeometry,
}

impl GradFn for Im2ColGradFn {
    fn name(&self) -> &'static str {
        "im2col"
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let x_var = &inputs[0];
        let gx = grad_if(x_var, || out_grad.col2im(x_var.data().shape(), &self.geom))?;
        Ok(vec![gx])
    }
}

/// Backward of `col2im`: every patch entry reads the gradient of the pixel it landed on.
pub struct Col2ImGradFn {
    geom: Conv2dGeometry,
}

impl GradFn for Col2ImGradFn {
    fn name(&self) -> &'static str {
        "col2im"
    }

    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
        let gx = grad_if(&inputs[0], || out_grad.im2col(&self.geom))?;
        Ok(vec![gx])
    }
}

// ===== CONVOLUTION =====
impl Variable {
    /// Unfold a (B, C, H, W) image into (B*H_out*W_out, C*KH*KW) patches.
    pub fn im2col(&self, geom: &Conv2dGeometry) -> Result<Variable> {
        let data = self.data().im2col(geom)?;
        Ok(Variable::from_op(
            data,
            Box::new(Im2ColGradFn { geom: *geom }),
            vec![self.clone()],
        ))
    }

    /// Fold patches back onto an image of `image_shape`, summing overlaps.
    pub fn col2im(&self, image_shape: &Shape, geom: &Conv2dGeometry) -> Result<Variable> {
        let data = self.data().col2im(image_shape, geom)?;
        Ok(Variable::from_op(
            data,
            Box::new(Col2ImGradFn { geom: *geom }),
            vec![self.clone()],
        ))
    }

    /// 2D convolution (cross-correlation) of a (B, C, H, W) input.
    ///
    /// `weight` is (C_out, C, KH, KW) and `bias`, when given, is (C_out).
    /// Output is (B, C_out, H_out, W_out).
    ///
    /// Built from differentiable pieces: im2col, one matmul against the
    /// flattened kernel, bias add, then a reshape and permute back to NCHW.
    pub fn conv2d(
        &self,
        weight: &Variable,
        bias: Option<&Variable>,
        geom: &Conv2dGeometry,
    ) -> Result<Variable> {
        let input_dims = self.dims();
        let weight_dims = weight.dims();
        let ([batch, channels, h, w], [out_channels, w_channels, kh, kw]) =
            (input_dims.as_slice(), weight_dims.as_slice())
        else {
            let bad = if input_dims.len() != 4 { &input_dims } else { &weight_dims };
            return Err(TensorError::RankViolation {
                op: "conv2d",
                required: 4,
                actual: bad.len(),
            });
        };
        if channels != w_channels || (*kh, *kw) != geom.kernel {
            return Err(TensorError::shape_mismatch("conv2d", &input_dims, &weight_dims));
        }
        if let Some(b) = bias.filter(|b| b.dims() != [*out_channels]) {
            return Err(TensorError::shape_mismatch("conv2d", &[*out_channels], &b.dims()));
        }
        let (oh, ow) = geom.output_size(*h, *w)?;

        let cols = self.im2col(geom)?;
        let kernel = weight
            .reshape(&[*out_channels, channels * kh * kw])?
            .transpose()?;
        let mut out = cols.matmul(&kernel)?;
        if let Some(b) = bias {
            out = out.add(b)?;
        }
        out.reshape(&[*batch, oh, ow, *out_channels])?
            .permute(&[0, 3, 1, 2])
    }
}
