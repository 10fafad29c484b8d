/*!
Assertion helpers used by the tests.
 */

use tch::Tensor;

pub fn assert_eq_tensor(a: &Tensor, b: &Tensor) {
    assert_close_tensor(a, b, 1e-5);
}

pub fn assert_close_tensor(a: &Tensor, b: &Tensor, tolerance: f64) {
    assert_eq!(a.size(), b.size(), "Tensors must have the same shape");
    let delta = f64::from((a - b).abs().max());
    assert!(delta < tolerance, "Tensors differ by {} (tolerance {})", delta, tolerance);
}
