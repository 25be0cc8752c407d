// verify.rs -- CPU reference for the vector-add kernel.
//
// Every element must agree with the host sum. Checking stops at the first
// disagreement and only that index is reported.
//
// Addition wraps on overflow, matching the device's 32-bit adder.

use std::fmt;

use crate::buffer::Element;

/// The first index at which the device disagreed with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub index: usize,
    /// Host-computed `a[index] + b[index]`.
    pub expected: Element,
    /// What the device returned.
    pub actual: Element,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "i = {} CPU result = {} Device result = {}",
            self.index, self.expected, self.actual
        )
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(Mismatch),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "PASSED"),
            Verdict::Failed(_) => write!(f, "FAILED"),
        }
    }
}

/// Element-wise `a + b` on the host.
pub fn reference_sum(a: &[Element], b: &[Element]) -> Vec<Element> {
    a.iter().zip(b).map(|(&x, &y)| x.wrapping_add(y)).collect()
}

/// Compare `result` against `a + b`, stopping at the first mismatch.
///
/// Only the common prefix of the three slices is compared; callers check
/// lengths beforehand.
pub fn first_mismatch(a: &[Element], b: &[Element], result: &[Element]) -> Option<Mismatch> {
    a.iter()
        .zip(b)
        .zip(result)
        .enumerate()
        .find_map(|(index, ((&x, &y), &actual))| {
            let expected = x.wrapping_add(y);
            (actual != expected).then_some(Mismatch { index, expected, actual })
        })
}

/// [`first_mismatch`] folded into a [`Verdict`].
pub fn check(a: &[Element], b: &[Element], result: &[Element]) -> Verdict {
    match first_mismatch(a, b, result) {
        None => Verdict::Passed,
        Some(m) => Verdict::Failed(m),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(n: i32) -> Vec<i32> {
        (0..n).collect()
    }

    #[test]
    fn test_reference_is_doubling_for_iota() {
        let a = iota(4096);
        let sum = reference_sum(&a, &a);
        for (i, &v) in sum.iter().enumerate() {
            assert_eq!(v, 2 * i as i32);
        }
    }

    #[test]
    fn test_all_equal_passes() {
        let a = iota(64);
        let r = reference_sum(&a, &a);
        assert_eq!(check(&a, &a, &r), Verdict::Passed);
    }

    #[test]
    fn test_single_mismatch_reported() {
        let a = iota(64);
        let mut r = reference_sum(&a, &a);
        r[17] += 1;
        let m = first_mismatch(&a, &a, &r).unwrap();
        assert_eq!(m, Mismatch { index: 17, expected: 34, actual: 35 });
    }

    #[test]
    fn test_stops_at_first_mismatch() {
        let a = iota(64);
        let r = vec![-1; 64];
        // Every index is wrong; only index 0 is reported.
        let m = first_mismatch(&a, &a, &r).unwrap();
        assert_eq!(m.index, 0);
    }

    #[test]
    fn test_wrapping_add() {
        let a = vec![i32::MAX];
        let b = vec![1];
        assert_eq!(reference_sum(&a, &b), vec![i32::MIN]);
        assert_eq!(check(&a, &b, &[i32::MIN]), Verdict::Passed);
    }

    #[test]
    fn test_mismatch_display() {
        let m = Mismatch { index: 5, expected: 10, actual: 11 };
        assert_eq!(m.to_string(), "i = 5 CPU result = 10 Device result = 11");
        assert_eq!(Verdict::Failed(m).to_string(), "FAILED");
        assert!(Verdict::Passed.passed());
    }
}
