use super::NdArray;
use crate::config::check_alloc;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Binary operations: two inputs, one output, broadcasting on mismatched shapes.
///
/// Comparisons produce 1.0 for true and 0.0 for false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,     // x + y
    Sub,     // x - y
    Mul,     // x * y
    Div,     // x / y
    Pow,     // x ^ y
    Maximum, // max(x, y), NaN-propagating
    Minimum, // min(x, y), NaN-propagating
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, x: f32, y: f32) -> f32 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Pow => x.powf(y),
            BinaryOp::Maximum => {
                if x.is_nan() || y.is_nan() {
                    f32::NAN
                } else {
                    x.max(y)
                }
            }
            BinaryOp::Minimum => {
                if x.is_nan() || y.is_nan() {
                    f32::NAN
                } else {
                    x.min(y)
                }
            }
            BinaryOp::Eq => flag(x == y),
            BinaryOp::Ne => flag(x != y),
            BinaryOp::Lt => flag(x < y),
            BinaryOp::Le => flag(x <= y),
            BinaryOp::Gt => flag(x > y),
            BinaryOp::Ge => flag(x >= y),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
        }
    }

    /// Comparisons have no useful derivative.
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Unary operations applied element by element.
///
/// - Neg: -x
/// - Abs: |x|
/// - Recip: 1/x
/// - Sqrt: √x
/// - Exp / Log: eˣ / ln(x)
/// - Sin / Cos / Tan / Tanh
/// - Sigmoid: 1/(1+e⁻ˣ), evaluated without overflow for large |x|
/// - Relu: max(0, x), NaN passes through
/// - Square: x²
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Recip,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Tanh,
    Sigmoid,
    Relu,
    Square,
}

impl UnaryOp {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Recip => 1.0 / x,
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Sigmoid => sigmoid(x),
            UnaryOp::Relu => {
                if x < 0.0 {
                    0.0
                } else {
                    x
                }
            }
            UnaryOp::Square => x * x,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Recip => "recip",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Relu => "relu",
            UnaryOp::Square => "square",
        }
    }
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

// ===== BINARY OPERATIONS =====
impl NdArray {
    /// Combine two arrays element by element, broadcasting as needed.
    ///
    /// `op_name` labels the error when the shapes cannot broadcast.
    pub(crate) fn zip_with<F>(&self, other: &NdArray, op_name: &'static str, f: F) -> Result<NdArray>
    where
        F: Fn(f32, f32) -> f32,
    {
        // Fast path: identical shapes need no index mapping.
        if self.shape == other.shape {
            let data = self.data.iter().zip(&other.data).map(|(&x, &y)| f(x, y)).collect();
            return Ok(NdArray::from_parts(data, self.shape.clone()));
        }

        let out_shape = Shape::broadcast(&self.shape, &other.shape)
            .map_err(|_| TensorError::shape_mismatch(op_name, self.dims(), other.dims()))?;
        check_alloc(out_shape.size())?;

        let lhs = self.shape.broadcast_offsets(&out_shape)?;
        let rhs = other.shape.broadcast_offsets(&out_shape)?;
        let data = lhs
            .zip(rhs)
            .map(|(i, j)| f(self.data[i], other.data[j]))
            .collect();
        Ok(NdArray::from_parts(data, out_shape))
    }

    /// Apply a binary operation with broadcasting.
    pub fn binary_op(&self, other: &NdArray, op: BinaryOp) -> Result<NdArray> {
        self.zip_with(other, op.name(), |x, y| op.apply(x, y))
    }

    pub fn add(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Add)
    }
    pub fn sub(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Sub)
    }
    pub fn mul(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Mul)
    }
    pub fn div(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Div)
    }
    pub fn pow(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Pow)
    }
    pub fn maximum(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Maximum)
    }
    pub fn minimum(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Minimum)
    }

    // Comparisons return a 1.0/0.0 mask.
    pub fn equal(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Eq)
    }
    pub fn not_equal(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Ne)
    }
    pub fn less(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Lt)
    }
    pub fn less_equal(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Le)
    }
    pub fn greater(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Gt)
    }
    pub fn greater_equal(&self, other: &NdArray) -> Result<NdArray> {
        self.binary_op(other, BinaryOp::Ge)
    }

    // Scalar right-hand side; cannot fail.
    pub fn add_scalar(&self, s: f32) -> NdArray {
        self.map(|x| x + s)
    }
    pub fn sub_scalar(&self, s: f32) -> NdArray {
        self.map(|x| x - s)
    }
    pub fn mul_scalar(&self, s: f32) -> NdArray {
        self.map(|x| x * s)
    }
    pub fn div_scalar(&self, s: f32) -> NdArray {
        self.map(|x| x / s)
    }
    pub fn pow_scalar(&self, s: f32) -> NdArray {
        self.map(|x| x.powf(s))
    }
}

// ===== UNARY OPERATIONS =====
impl NdArray {
    /// Apply `f` to every element, producing a new array of the same shape.
    pub fn map<F>(&self, f: F) -> NdArray
    where
        F: Fn(f32) -> f32,
    {
        NdArray::from_parts(self.data.iter().map(|&x| f(x)).collect(), self.shape.clone())
    }

    pub fn unary_op(&self, op: UnaryOp) -> NdArray {
        self.map(|x| op.apply(x))
    }

    pub fn neg(&self) -> NdArray {
        self.unary_op(UnaryOp::Neg)
    }
    pub fn abs(&self) -> NdArray {
        self.unary_op(UnaryOp::Abs)
    }
    pub fn recip(&self) -> NdArray {
        self.unary_op(UnaryOp::Recip)
    }
    pub fn sqrt(&self) -> NdArray {
        self.unary_op(UnaryOp::Sqrt)
    }
    pub fn exp(&self) -> NdArray {
        self.unary_op(UnaryOp::Exp)
    }
    pub fn log(&self) -> NdArray {
        self.unary_op(UnaryOp::Log)
    }
    pub fn sin(&self) -> NdArray {
        self.unary_op(UnaryOp::Sin)
    }
    pub fn cos(&self) -> NdArray {
        self.unary_op(UnaryOp::Cos)
    }
    pub fn tan(&self) -> NdArray {
        self.unary_op(UnaryOp::Tan)
    }
    pub fn tanh(&self) -> NdArray {
        self.unary_op(UnaryOp::Tanh)
    }
    pub fn sigmoid(&self) -> NdArray {
        self.unary_op(UnaryOp::Sigmoid)
    }
    pub fn relu(&self) -> NdArray {
        self.unary_op(UnaryOp::Relu)
    }
    pub fn square(&self) -> NdArray {
        self.unary_op(UnaryOp::Square)
    }

    /// Clamp every element into `[min, max]`. NaN stays NaN.
    pub fn clip(&self, min: f32, max: f32) -> Result<NdArray> {
        if min > max {
            return Err(TensorError::InvalidParameter(format!(
                "clip bounds inverted: min {min} > max {max}"
            )));
        }
        Ok(self.map(|x| {
            if x < min {
                min
            } else if x > max {
                max
            } else {
                x
            }
        }))
    }
}

// ===== IN-PLACE OPERATIONS =====
//
// These mutate the receiver. The operand must broadcast into the receiver's
// shape; the receiver never grows.
impl NdArray {
    fn zip_assign<F>(&mut self, other: &NdArray, op_name: &'static str, f: F) -> Result<()>
    where
        F: Fn(&mut f32, f32),
    {
        if self.shape == other.shape {
            self.data.iter_mut().zip(&other.data).for_each(|(x, &y)| f(x, y));
            return Ok(());
        }
        if !other.shape.broadcasts_to(&self.shape) {
            return Err(TensorError::shape_mismatch(op_name, self.dims(), other.dims()));
        }
        let offsets = other.shape.broadcast_offsets(&self.shape)?;
        self.data
            .iter_mut()
            .zip(offsets)
            .for_each(|(x, j)| f(x, other.data[j]));
        Ok(())
    }

    /// `self += other`, broadcasting `other` into `self`.
    pub fn add_assign(&mut self, other: &NdArray) -> Result<()> {
        self.zip_assign(other, "add_assign", |x, y| *x += y)
    }

    /// `self -= other`, broadcasting `other` into `self`.
    pub fn sub_assign(&mut self, other: &NdArray) -> Result<()> {
        self.zip_assign(other, "sub_assign", |x, y| *x -= y)
    }

    /// `self *= other`, broadcasting `other` into `self`.
    pub fn mul_assign(&mut self, other: &NdArray) -> Result<()> {
        self.zip_assign(other, "mul_assign", |x, y| *x *= y)
    }

    /// `self *= s`.
    pub fn scale_assign(&mut self, s: f32) {
        self.data.iter_mut().for_each(|x| *x *= s);
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }
}
