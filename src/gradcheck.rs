use crate::autograd::no_grad;
use crate::error::Result;
use crate::tensor::NdArray;
use crate::variable::Variable;

/// Outcome of [`check_gradients`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheckReport {
    pub max_error: f32,
    pub mean_error: f32,
    pub passed: bool,
    /// Number of elements compared.
    pub checked: usize,
}

// ===== NUMERICAL GRADIENT CHECKING =====

/// Check gradients numerically using finite differences
///
/// For each element of `input`, we compute:
///
/// Analytical gradient: what `backward()` stores on `input`
/// Numerical gradient: (f(x+ε) - f(x-ε)) / (2ε)
///
/// The output of `f` is summed to a scalar first. Errors are measured as
/// `|a - n| / max(1, |a|, |n|)`, so small gradients are compared absolutely
/// and large ones relatively.
///
/// The input's stored gradient is cleared before the analytic pass and holds
/// the analytic gradient afterwards.
///
/// # Arguments
/// * `input` - The variable whose gradient to check; must require grad
/// * `f` - The function under test
/// * `epsilon` - Step size for finite differences (typically 1e-3 to 1e-2)
/// * `tolerance` - Maximum acceptable error (typically 1e-3 to 1e-2)
///
/// # Returns
/// A [`GradCheckReport`]; `Err` only if `f` or the backward pass fails.
pub fn check_gradients<F>(
    input: &Variable,
    f: F,
    epsilon: f32,
    tolerance: f32,
) -> Result<GradCheckReport>
where
    F: Fn(&Variable) -> Result<Variable>,
{
    input.clear_grad();
    f(input)?.sum().backward()?;
    let analytical = match input.grad() {
        Some(g) => g,
        None => input.data().zeros_like(),
    };

    let original = input.data().clone();
    let numerical = {
        let _guard = no_grad();
        let eval = |data: NdArray| -> Result<f32> {
            let out = f(&Variable::constant(data))?;
            let total = out.data().sum();
            Ok(total)
        };

        let mut numerical = Vec::with_capacity(original.size());
        for i in 0..original.size() {
            let mut plus = original.clone();
            plus.data_mut()[i] += epsilon;
            let mut minus = original.clone();
            minus.data_mut()[i] -= epsilon;
            numerical.push((eval(plus)? - eval(minus)?) / (2.0 * epsilon));
        }
        numerical
    };

    let mut max_error: f32 = 0.0;
    let mut total_error: f32 = 0.0;
    for (i, (&a, &n)) in analytical.data().iter().zip(&numerical).enumerate() {
        let error = (a - n).abs() / 1f32.max(a.abs()).max(n.abs());
        if error > tolerance || error.is_nan() {
            log::warn!(
                "gradient mismatch at index {i}: analytical={a:.6e}, numerical={n:.6e}, error={error:.6e}"
            );
        }
        // NaN counts as a failure rather than vanishing inside f32::max.
        max_error = if error.is_nan() { f32::NAN } else { max_error.max(error) };
        total_error += error;
    }

    let checked = numerical.len();
    let mean_error = if checked == 0 { 0.0 } else { total_error / checked as f32 };
    let passed = max_error <= tolerance;
    Ok(GradCheckReport {
        max_error,
        mean_error,
        passed,
        checked,
    })
}

/// Simplified gradient checker with default parameters
///
/// Uses epsilon=1e-2 and tolerance=1e-2, which suit `f32` arithmetic.
pub fn check_gradients_simple<F>(input: &Variable, f: F) -> Result<bool>
where
    F: Fn(&Variable) -> Result<Variable>,
{
    let report = check_gradients(input, f, 1e-2, 1e-2)?;
    if !report.passed {
        log::warn!(
            "gradient check failed: max_error={:.6e}, mean_error={:.6e}",
            report.max_error,
            report.mean_error
        );
    }
    Ok(report.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(values: &[f32]) -> Variable {
        Variable::parameter(NdArray::from_slice(values).unwrap())
    }

    #[test]
    fn test_passes_on_correct_gradient() {
        let x = param(&[0.5, -1.0, 2.0]);
        let report = check_gradients(&x, |x| x.mul(x)?.add(&x.sin()), 1e-2, 1e-2).unwrap();
        assert!(report.passed, "{report:?}");
        assert_eq!(report.checked, 3);
        // The analytic gradient is left on the input.
        assert!(x.grad().is_some());
    }

    /// Claims d(x²)/dx = x, which is wrong everywhere except 0.
    struct WrongSquare;

    impl crate::autograd::GradFn for WrongSquare {
        fn name(&self) -> &'static str {
            "wrong_square"
        }

        fn backward(&self, out_grad: &NdArray, inputs: &[Variable]) -> Result<Vec<Option<NdArray>>> {
            Ok(vec![Some(out_grad.mul(&inputs[0].data())?)])
        }
    }

    #[test]
    fn test_detects_wrong_gradient() {
        let x = param(&[1.0, 2.0, 3.0]);
        let wrong = |x: &Variable| {
            let data = x.data().square();
            Ok(Variable::from_op(data, Box::new(WrongSquare), vec![x.clone()]))
        };
        let report = check_gradients(&x, wrong, 1e-2, 1e-2).unwrap();
        assert!(!report.passed);
        assert!(report.max_error > 0.3);
        assert!(!check_gradients_simple(&x, wrong).unwrap());
    }

    #[test]
    fn test_no_grad_is_restored() {
        let x = param(&[1.0]);
        check_gradients_simple(&x, |x| Ok(x.exp())).unwrap();
        assert!(crate::autograd::is_grad_enabled());
    }
}
