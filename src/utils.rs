use itertools::Itertools;
use std::fmt::{self, Display};

pub const fn is_pow2(x: i64) -> bool {
    if x <= 0 {
        return false;
    }
    x & (x - 1) == 0
}

/// Returns `true` if `x` fills every SIMD of a workgroup processor evenly.
/// A target reporting no SIMDs never matches.
pub const fn is_mult_simd_num(x: i64, simd_num: u32) -> bool {
    simd_num != 0 && x % (simd_num as i64) == 0
}

/// FLOPs per byte moved for an `x`-by-`y`-by-`z` matmul tile.
pub fn arith_intensity(x: i64, y: i64, z: i64) -> f64 {
    let num_flops = 2 * x * y * z;
    let num_byte_access = 2 * (x * y + y * z + x * z);
    num_flops as f64 / num_byte_access as f64
}

/// Returns the factors of an integer, in ascending order.
pub fn factors(x: usize) -> Vec<usize> {
    let mut result = Vec::new();
    let mut i = 1;
    while i * i <= x {
        if x % i == 0 {
            result.push(i);
            if x / i != i {
                result.push(x / i);
            }
        }
        i += 1;
    }
    result.sort_unstable();
    result
}

/// Formats a slice as `[a, b, c]`.
pub struct Bracketed<'a, T>(pub &'a [T]);

impl<T: Display> Display for Bracketed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_is_pow2() {
        for x in [1, 2, 4, 32] {
            assert!(is_pow2(x), "{x} should be a power of two");
        }
        for x in [0, 5, 6, -4] {
            assert!(!is_pow2(x), "{x} should not be a power of two");
        }
    }

    #[test]
    fn test_is_mult_simd_num() {
        assert!(!is_mult_simd_num(6, 4));
        assert!(is_mult_simd_num(8, 4));
        assert!(is_mult_simd_num(6, 2));
        assert!(!is_mult_simd_num(8, 0));
        assert!(!is_mult_simd_num(0, 0));
    }

    #[test]
    fn test_arith_intensity() {
        let ai = arith_intensity(2, 3, 4);
        let expected = (2.0 * 2.0 * 3.0 * 4.0) / (2.0 * (2.0 * 3.0 + 3.0 * 4.0 + 2.0 * 4.0));
        assert!((ai - expected).abs() <= 1e-9 * expected.abs());
    }

    #[test]
    fn test_factors() {
        assert_eq!(factors(1), vec![1]);
        assert_eq!(factors(12), vec![1, 2, 3, 4, 6, 12]);
        assert_eq!(factors(49), vec![1, 7, 49]);
    }

    #[test]
    fn test_bracketed() {
        assert_eq!(Bracketed(&[1, 1, 464, 320]).to_string(), "[1, 1, 464, 320]");
        assert_eq!(Bracketed::<i64>(&[]).to_string(), "[]");
    }

    proptest! {
        #[test]
        fn test_is_pow2_matches_std(x in 1i64..=(1 << 40)) {
            prop_assert_eq!(is_pow2(x), (x as u64).is_power_of_two());
        }

        #[test]
        fn test_factors_all_divide(x in 1usize..5000) {
            let fs = factors(x);
            prop_assert!(fs.iter().all(|f| x % f == 0));
            prop_assert_eq!(fs.first(), Some(&1));
            prop_assert_eq!(fs.last(), Some(&x));
        }
    }
}
