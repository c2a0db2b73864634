//! Numeric comparison helpers for checking kernel output against host
//! references.

use crate::config::JitConfig;

/// `|a - b| <= atol + rtol * |b|`, elementwise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    /// `rtol` from `TESSEL_MOD_RTOL`, `atol` 1e-8.
    fn default() -> Self {
        Self {
            rtol: JitConfig::global().rtol,
            atol: 1e-8,
        }
    }
}

impl Tolerance {
    pub fn rtol(rtol: f64) -> Self {
        Self { rtol, atol: 1e-8 }
    }

    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn close(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        if actual == expected {
            return true;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Index and values of the first mismatch, if any.
pub fn first_mismatch(actual: &[f64], expected: &[f64], tol: Tolerance) -> Option<(usize, f64, f64)> {
    if actual.len() != expected.len() {
        return Some((actual.len().min(expected.len()), f64::NAN, f64::NAN));
    }
    actual
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (a, e))| !tol.close(**a, **e))
        .map(|(i, (a, e))| (i, *a, *e))
}

pub fn allclose(actual: &[f64], expected: &[f64], tol: Tolerance) -> bool {
    first_mismatch(actual, expected, tol).is_none()
}

/// Widen any host float slice for comparison.
pub fn to_f64<T: Copy + Into<f64>>(xs: &[T]) -> Vec<f64> {
    xs.iter().map(|&x| x.into()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close() {
        let tol = Tolerance::rtol(0.01);
        assert!(tol.close(100.5, 100.0));
        assert!(!tol.close(102.0, 100.0));
        assert!(tol.close(f64::NAN, f64::NAN));
        assert!(!tol.close(f64::NAN, 1.0));
        assert!(tol.close(f64::INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_allclose_reports_first_mismatch() {
        let tol = Tolerance::rtol(1e-3);
        assert!(allclose(&[1.0, 2.0], &[1.0, 2.0005], tol));
        assert_eq!(
            first_mismatch(&[1.0, 2.5, 3.0], &[1.0, 2.0, 4.0], tol),
            Some((1, 2.5, 2.0))
        );
        assert!(!allclose(&[1.0], &[1.0, 2.0], tol));
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(to_f64(&[1.5f32, 2.0]), vec![1.5, 2.0]);
    }
}
