use crate::autograd::Node;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::NdArray;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

// ===== RAW VARIABLE STRUCTURE =====

/// The value node behind a [`Variable`].
///
/// Fields:
/// - `data`: the forward value
/// - `grad`: accumulated gradient, same shape as `data`, once a backward pass reached it
/// - `requires_grad`: whether backward stores a gradient here
/// - `creator`: the operation that produced this value, `None` for leaves
/// - `generation`: 0 for leaves, creator generation + 1 otherwise
pub(crate) struct RawVariable {
    pub(crate) data: NdArray,
    pub(crate) grad: Option<NdArray>,
    pub(crate) requires_grad: bool,
    pub(crate) creator: Option<Rc<Node>>,
    pub(crate) generation: usize,
    pub(crate) name: Option<String>,
}

/// Shared handle to a value node in the computation graph.
///
/// Cloning is cheap and aliases the same node. Uses `Rc<RefCell<..>>`, so a
/// graph is confined to the thread that built it.
#[derive(Clone)]
pub struct Variable(pub(crate) Rc<RefCell<RawVariable>>);

// ===== CONSTRUCTORS =====
impl Variable {
    /// Create a leaf.
    pub fn new(data: NdArray, requires_grad: bool) -> Variable {
        Variable(Rc::new(RefCell::new(RawVariable {
            data,
            grad: None,
            requires_grad,
            creator: None,
            generation: 0,
            name: None,
        })))
    }

    /// Leaf that collects gradients, e.g. a trainable weight.
    pub fn parameter(data: NdArray) -> Variable {
        Variable::new(data, true)
    }

    /// Leaf that never collects gradients.
    pub fn constant(data: NdArray) -> Variable {
        Variable::new(data, false)
    }

    pub(crate) fn with_creator(data: NdArray, creator: Rc<Node>) -> Variable {
        let generation = creator.generation + 1;
        Variable(Rc::new(RefCell::new(RawVariable {
            data,
            grad: None,
            requires_grad: true,
            creator: Some(creator),
            generation,
            name: None,
        })))
    }

    /// Attach a label shown in `Debug` output.
    pub fn with_name(self, name: impl Into<String>) -> Variable {
        self.0.borrow_mut().name = Some(name.into());
        self
    }

    /// A new leaf holding a copy of this value, cut from the graph.
    pub fn detach(&self) -> Variable {
        let raw = self.0.borrow();
        Variable::new(raw.data.clone(), false)
    }
}

// ===== ACCESSORS =====
impl Variable {
    /// Borrow the forward value.
    ///
    /// # Panics
    /// If the value is mutably borrowed through [`data_mut`](Self::data_mut).
    pub fn data(&self) -> Ref<'_, NdArray> {
        Ref::map(self.0.borrow(), |raw| &raw.data)
    }

    /// Mutably borrow the forward value, e.g. for an optimizer step.
    ///
    /// Does not touch the graph; mutate only leaves between passes.
    pub fn data_mut(&self) -> RefMut<'_, NdArray> {
        RefMut::map(self.0.borrow_mut(), |raw| &mut raw.data)
    }

    /// Replace the value with one of the same shape.
    pub fn set_data(&self, data: NdArray) -> Result<()> {
        let mut raw = self.0.borrow_mut();
        if data.shape() != raw.data.shape() {
            return Err(TensorError::shape_mismatch("set_data", raw.data.dims(), data.dims()));
        }
        raw.data = data;
        Ok(())
    }

    pub fn shape(&self) -> Shape {
        self.0.borrow().data.shape().clone()
    }

    pub fn dims(&self) -> Vec<usize> {
        self.0.borrow().data.dims().to_vec()
    }

    pub fn requires_grad(&self) -> bool {
        self.0.borrow().requires_grad
    }

    /// Toggle gradient collection on a leaf. Has no effect on ops already recorded.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.0.borrow_mut().requires_grad = requires_grad;
    }

    /// Copy of the accumulated gradient, if any backward pass reached this node.
    pub fn grad(&self) -> Option<NdArray> {
        self.0.borrow().grad.clone()
    }

    pub fn clear_grad(&self) {
        self.0.borrow_mut().grad = None;
    }

    /// True when no operation produced this value (or its link was cut).
    pub fn is_leaf(&self) -> bool {
        self.0.borrow().creator.is_none()
    }

    pub fn generation(&self) -> usize {
        self.0.borrow().generation
    }

    /// Name of the operation that produced this value.
    pub fn creator_name(&self) -> Option<&'static str> {
        self.0.borrow().creator.as_ref().map(|node| node.grad_fn.name())
    }

    pub fn name(&self) -> Option<String> {
        self.0.borrow().name.clone()
    }

    /// Whether two handles alias the same node.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the node for the lifetime of the handle.
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn creator(&self) -> Option<Rc<Node>> {
        self.0.borrow().creator.clone()
    }

    pub(crate) fn take_creator(&self) -> Option<Rc<Node>> {
        self.0.borrow_mut().creator.take()
    }

    /// Add a gradient contribution to the stored gradient.
    pub(crate) fn accumulate_grad(&self, contribution: &NdArray) -> Result<()> {
        let mut guard = self.0.borrow_mut();
        let raw = &mut *guard;
        if !raw.requires_grad {
            return Ok(());
        }
        match raw.grad {
            None => raw.grad = Some(contribution.clone()),
            Some(ref mut existing) => existing.add_assign(contribution)?,
        }
        Ok(())
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.0.borrow();
        f.debug_struct("Variable")
            .field("name", &raw.name)
            .field("shape", raw.data.shape())
            .field("requires_grad", &raw.requires_grad)
            .field("has_grad", &raw.grad.is_some())
            .field("creator", &raw.creator.as_ref().map(|node| node.grad_fn.name()))
            .finish()
    }
}

impl From<NdArray> for Variable {
    /// Wraps the array as a constant.
    fn from(data: NdArray) -> Self {
        Variable::constant(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(dims: &[usize]) -> NdArray {
        NdArray::ones(&Shape::of(dims)).unwrap()
    }

    #[test]
    fn test_leaf_state() {
        let w = Variable::parameter(ones(&[2, 2])).with_name("w");
        assert!(w.is_leaf());
        assert!(w.requires_grad());
        assert_eq!(w.generation(), 0);
        assert!(w.grad().is_none());
        assert_eq!(w.name().as_deref(), Some("w"));
        assert_eq!(w.dims(), vec![2, 2]);
    }

    #[test]
    fn test_accumulate_and_clear() {
        let w = Variable::parameter(ones(&[3]));
        w.accumulate_grad(&ones(&[3])).unwrap();
        w.accumulate_grad(&ones(&[3])).unwrap();
        assert_eq!(w.grad().unwrap().data(), &[2.0, 2.0, 2.0]);
        w.clear_grad();
        assert!(w.grad().is_none());

        let c = Variable::constant(ones(&[3]));
        c.accumulate_grad(&ones(&[3])).unwrap();
        assert!(c.grad().is_none());
    }

    #[test]
    fn test_data_mutation() {
        let w = Variable::parameter(ones(&[2]));
        w.data_mut().scale_assign(3.0);
        assert_eq!(w.data().data(), &[3.0, 3.0]);
        assert!(w.set_data(ones(&[3])).unwrap_err().is_shape_mismatch());
        w.set_data(ones(&[2])).unwrap();
        assert_eq!(w.data().data(), &[1.0, 1.0]);
    }

    #[test]
    fn test_detach_and_aliasing() {
        let w = Variable::parameter(ones(&[2]));
        let alias = w.clone();
        assert!(alias.ptr_eq(&w));
        let d = w.detach();
        assert!(!d.ptr_eq(&w));
        assert!(!d.requires_grad());
        d.data_mut().fill(5.0);
        assert_eq!(w.data().data(), &[1.0, 1.0]);
    }
}
