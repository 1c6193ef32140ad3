use crate::error::{Result, TensorError};
use crate::tensor::NdArray;
use crate::variable::Variable;
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::marker::PhantomData;
use std::rc::Rc;

// ===== GRADIENT FUNCTION TRAIT =====

/// Trait for gradient computation functions.
///
/// Each operation type implements this to define how gradients flow backward.
/// The `backward` method takes:
/// - `out_grad`: gradient of the loss w.r.t. this operation's output
/// - `inputs`: the input variables of this operation, in call order
///
/// Returns one entry per input. `None` is only allowed for inputs that do not
/// require grad; every returned array must have its input's shape.
pub trait GradFn {
    /// Short operation name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Compute gradients for the inputs given the output gradient.
    fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>>;
}

/// A recorded operation: the gradient function plus the variables it consumed.
///
/// Holds its inputs, never its output, so the graph owns nothing cyclically.
pub(crate) struct Node {
    pub(crate) grad_fn: Box<dyn GradFn>,
    pub(crate) inputs: Vec<Variable>,
    pub(crate) generation: usize,
}

impl Drop for Node {
    /// Free the upstream graph with an explicit stack.
    ///
    /// Only inputs this node holds the last handle to are walked; any node
    /// still shared is left to whoever else owns it.
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.inputs);
        while let Some(var) = stack.pop() {
            if Rc::strong_count(&var.0) != 1 {
                continue;
            }
            let creator = match var.0.try_borrow_mut() {
                Ok(mut raw) => raw.creator.take(),
                Err(_) => None,
            };
            if let Some(Ok(mut node)) = creator.map(Rc::try_unwrap) {
                stack.append(&mut node.inputs);
            }
        }
    }
}

// ===== GRAD MODE =====

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on this thread currently record graph nodes.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Guard returned by [`no_grad`]; restores the previous mode on drop.
#[must_use = "graph recording resumes as soon as the guard is dropped"]
pub struct NoGradGuard {
    prev: bool,
    // Thread-local state: the guard must be dropped on the thread that made it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.prev));
    }
}

/// Stop recording graph nodes on this thread until the guard is dropped.
///
/// Values computed inside come out as constants with no creator.
///
/// ```
/// # use volta_core::{no_grad, NdArray, Shape, Variable};
/// let w = Variable::parameter(NdArray::ones(&Shape::of(&[2])).unwrap());
/// let y = {
///     let _guard = no_grad();
///     w.mul_scalar(2.0)
/// };
/// assert!(!y.requires_grad());
/// assert!(y.is_leaf());
/// ```
pub fn no_grad() -> NoGradGuard {
    let prev = GRAD_ENABLED.with(|flag| flag.replace(false));
    NoGradGuard {
        prev,
        _not_send: PhantomData,
    }
}

// ===== GRAPH CONSTRUCTION =====

impl Variable {
    /// Wrap the forward result of an operation, recording a graph node when
    /// any input requires grad and recording is enabled.
    ///
    /// This is the hook for operations defined outside the crate.
    pub fn from_op(data: NdArray, grad_fn: Box<dyn GradFn>, inputs: Vec<Variable>) -> Variable {
        let requires_grad = is_grad_enabled() && inputs.iter().any(Variable::requires_grad);
        if !requires_grad {
            return Variable::constant(data);
        }
        let generation = inputs.iter().map(Variable::generation).max().unwrap_or(0);
        let node = Node {
            grad_fn,
            inputs,
            generation,
        };
        Variable::with_creator(data, Rc::new(node))
    }
}

// ===== BACKPROPAGATION =====

/// Heap entry: later generations pop first.
struct Pending {
    generation: usize,
    seq: usize,
    var: Variable,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.generation, self.seq).cmp(&(other.generation, other.seq))
    }
}

impl Variable {
    /// Run backpropagation from this variable, seeding its gradient with ones.
    ///
    /// Gradients are added to whatever is already stored; call
    /// [`clear_grad`](Variable::clear_grad) between independent passes.
    pub fn backward(&self) -> Result<()> {
        let seed = self.data().ones_like();
        self.backward_with(seed)
    }

    /// Run backpropagation with an explicit output gradient of the output's shape.
    ///
    /// This implements reverse-mode automatic differentiation:
    /// 1. Seed this variable's pass gradient with `seed`
    /// 2. Pop variables from a max-heap keyed by generation, so every variable is
    ///    handled only after all of its consumers have contributed
    /// 3. Add the finished pass gradient into the stored grad of every
    ///    `requires_grad` variable
    /// 4. Call the creator's `grad_fn` and route the results to its inputs
    pub fn backward_with(&self, seed: NdArray) -> Result<()> {
        if !self.requires_grad() {
            return Err(TensorError::InvalidParameter(
                "backward called on a variable that does not require grad".to_string(),
            ));
        }
        if seed.shape() != &self.shape() {
            return Err(TensorError::shape_mismatch(
                "backward",
                self.shape().dims(),
                seed.dims(),
            ));
        }

        let mut grads: HashMap<usize, NdArray> = HashMap::new();
        let mut queued: HashSet<usize> = HashSet::new();
        let mut heap = BinaryHeap::new();
        let mut seq = 0;
        let mut nodes = 0;

        grads.insert(self.id(), seed);
        queued.insert(self.id());
        heap.push(Pending {
            generation: self.generation(),
            seq,
            var: self.clone(),
        });

        while let Some(Pending { var, .. }) = heap.pop() {
            let Some(grad) = grads.remove(&var.id()) else {
                continue;
            };
            var.accumulate_grad(&grad)?;

            let Some(node) = var.creator() else {
                continue;
            };
            nodes += 1;
            let name = node.grad_fn.name();
            log::trace!(
                "backward: {name} (generation {}) -> {} inputs",
                node.generation,
                node.inputs.len()
            );

            let input_grads = node.grad_fn.backward(&grad, &node.inputs)?;
            if input_grads.len() != node.inputs.len() {
                return Err(TensorError::InvalidParameter(format!(
                    "{name} returned {} gradients for {} inputs",
                    input_grads.len(),
                    node.inputs.len()
                )));
            }

            for (input, g) in node.inputs.iter().zip(input_grads) {
                if !input.requires_grad() {
                    continue;
                }
                let Some(g) = g else {
                    return Err(TensorError::InvalidParameter(format!(
                        "{name} produced no gradient for an input that requires grad"
                    )));
                };
                let input_shape = input.shape();
                if g.shape() != &input_shape {
                    return Err(TensorError::shape_mismatch(name, input_shape.dims(), g.dims()));
                }

                match grads.entry(input.id()) {
                    Entry::Occupied(mut slot) => slot.get_mut().add_assign(&g)?,
                    Entry::Vacant(slot) => {
                        slot.insert(g);
                    }
                }
                if queued.insert(input.id()) {
                    seq += 1;
                    heap.push(Pending {
                        generation: input.generation(),
                        seq,
                        var: input.clone(),
                    });
                }
            }
        }

        log::debug!(
            "backward pass finished: {nodes} nodes, {} variables",
            queued.len()
        );
        Ok(())
    }

    /// Cut the creator links of this variable and everything upstream of it.
    ///
    /// Values and stored gradients are untouched; the freed graph can be
    /// dropped once nothing else holds it.
    pub fn unchain(&self) {
        let mut stack = vec![self.clone()];
        let mut seen = HashSet::new();
        while let Some(var) = stack.pop() {
            if !seen.insert(var.id()) {
                continue;
            }
            if let Some(node) = var.take_creator() {
                stack.extend(node.inputs.iter().cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    /// y = 2x, with the gradient shape deliberately wrong when `broken`.
    struct Double {
        broken: bool,
    }

    impl GradFn for Double {
        fn name(&self) -> &'static str {
            "double"
        }

        fn backward(&self, out_grad: &NdArray, _inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
            if self.broken {
                return Ok(vec![Some(NdArray::scalar(1.0))]);
            }
            Ok(vec![Some(out_grad.mul_scalar(2.0))])
        }
    }

    fn double(x: &Variable, broken: bool) -> Variable {
        let data = x.data().mul_scalar(2.0);
        Variable::from_op(data, Box::new(Double { broken }), vec![x.clone()])
    }

    fn vec3() -> NdArray {
        NdArray::from_slice(&[1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn test_custom_op_chain() {
        let x = Variable::parameter(vec3());
        let y = double(&double(&x, false), false);
        assert_eq!(y.generation(), 2);
        assert_eq!(y.creator_name(), Some("double"));
        y.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_gradient_shape_checked() {
        let x = Variable::parameter(vec3());
        let y = double(&x, true);
        let err = y.backward().unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { op: "double", .. }));
    }

    #[test]
    fn test_seed_shape_checked() {
        let x = Variable::parameter(vec3());
        let y = double(&x, false);
        let err = y.backward_with(NdArray::scalar(1.0)).unwrap_err();
        assert!(err.is_shape_mismatch());
        y.backward_with(NdArray::from_slice(&[1.0, 0.0, -1.0]).unwrap()).unwrap();
        assert_eq!(x.grad().unwrap().data(), &[2.0, 0.0, -2.0]);
    }

    #[test]
    fn test_constant_root_rejected() {
        let c = Variable::constant(vec3());
        assert!(c.backward().is_err());
    }

    #[test]
    fn test_no_grad_restores_mode() {
        let x = Variable::parameter(vec3());
        {
            let _outer = no_grad();
            {
                let _inner = no_grad();
                assert!(!is_grad_enabled());
            }
            assert!(!is_grad_enabled());
            let y = double(&x, false);
            assert!(y.is_leaf());
            assert!(!y.requires_grad());
        }
        assert!(is_grad_enabled());
        assert!(!double(&x, false).is_leaf());
    }

    #[test]
    fn test_unchain_is_transitive() {
        let x = Variable::parameter(NdArray::ones(&Shape::of(&[2])).unwrap());
        let a = double(&x, false);
        let b = double(&a, false);
        let c = double(&b, false);
        c.unchain();
        assert!(c.is_leaf() && b.is_leaf() && a.is_leaf());
        assert_eq!(c.data().data(), &[8.0, 8.0]);

        // Backward from a cut root reaches nothing upstream.
        c.backward().unwrap();
        assert!(x.grad().is_none());
        assert_eq!(c.grad().unwrap().data(), &[1.0, 1.0]);
    }
}
