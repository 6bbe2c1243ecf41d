//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Linearly interpolate between `start` and `end`, `frac = 0` giving `start`
/// and `frac = 1` giving `end`.
pub fn lin_interp<T>(start: T, end: T, frac: T) -> T
where
    T: Float,
{
    start + (end - start) * frac
}

/// Return the euclidian norm (distance between) of two points.
///
/// If the points do not have the same number of dimentions then `None` is
/// returned.
pub fn norm<T>(point_0: &[T], point_1: &[T]) -> Option<T>
where
    T: Float,
{
    // Check that the dimentions match
    if point_0.len() != point_1.len() {
        return None;
    }

    let sum = point_0
        .iter()
        .zip(point_1.iter())
        .fold(T::zero(), |acc, (a, b)| acc + (*a - *b).powi(2));

    Some(sum.sqrt())
}

/// Largest absolute value of the elements, zero for an empty slice.
pub fn inf_norm<T>(values: &[T]) -> T
where
    T: Float,
{
    values.iter().fold(T::zero(), |acc, v| acc.max(v.abs()))
}

/// Sum of the absolute values of the elements.
pub fn one_norm<T>(values: &[T]) -> T
where
    T: Float,
{
    values.iter().fold(T::zero(), |acc, v| acc + v.abs())
}

/// Wrap an angle into the range [-pi, pi).
pub fn wrap_pi<T>(angle: T) -> T
where
    T: Float,
{
    let pi_t = T::from(std::f64::consts::PI).unwrap();
    let tau_t = T::from(std::f64::consts::TAU).unwrap();

    // Angles already in range are returned untouched, the shift below would
    // otherwise round them
    if angle >= -pi_t && angle < pi_t {
        return angle;
    }

    rem_euclid(angle + pi_t, tau_t) - pi_t
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()` if `lhs` is much smaller than `rhs.abs()` in
/// magnitude and `lhs < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_interp() {
        assert_eq!(lin_interp(1f64, 3f64, 0f64), 1f64);
        assert_eq!(lin_interp(1f64, 3f64, 0.5f64), 2f64);
        assert_eq!(lin_interp(1f64, 3f64, 1f64), 3f64);
    }

    #[test]
    fn test_norm() {
        assert_eq!(norm(&[0f64, 0f64], &[3f64, 4f64]), Some(5f64));
        assert_eq!(norm(&[0f64], &[3f64, 4f64]), None);
    }

    #[test]
    fn test_inf_and_one_norm() {
        assert_eq!(inf_norm(&[1f64, -4f64, 2f64]), 4f64);
        assert_eq!(inf_norm::<f64>(&[]), 0f64);
        assert_eq!(one_norm(&[1f64, -4f64, 2f64]), 7f64);
    }

    #[test]
    fn test_wrap_pi() {
        const PI: f64 = std::f64::consts::PI;

        assert!((wrap_pi(0.5f64) - 0.5).abs() < 1e-12);
        assert!((wrap_pi(PI + 0.5) - (-PI + 0.5)).abs() < 1e-12);
        assert!((wrap_pi(-PI - 0.5) - (PI - 0.5)).abs() < 1e-12);
        assert!((wrap_pi(4.0 * PI + 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrap_pi_in_range_is_exact() {
        const TAU: f64 = std::f64::consts::TAU;

        assert_eq!(wrap_pi(0.1f64), 0.1);
        assert_eq!(wrap_pi(-0.1f64), -0.1);
        assert_eq!(wrap_pi(-std::f64::consts::PI), -std::f64::consts::PI);
        assert!((wrap_pi(4.0f64) - (4.0 - TAU)).abs() < 1e-12);
    }
}
