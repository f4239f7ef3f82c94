//! Vector algebra for state and measurement vectors that embed a rotation.
//!
//! A vector may carry one angle-axis block. Its components are combined as
//! rotations; every other component is treated as an ordinary real number.

use crate::math::{angle_axis_to_quaternion, quaternion_to_angle_axis, weighted_quaternion_average};
use nalgebra::{SVector, UnitQuaternion, Vector3};

/// Indices of the x, y and z components of an angle-axis block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationBlock(pub [usize; 3]);

impl RotationBlock {
    /// A block occupying three consecutive components starting at `start`.
    pub const fn contiguous(start: usize) -> Self {
        RotationBlock([start, start + 1, start + 2])
    }

    pub fn angle_axis<const D: usize>(&self, v: &SVector<f64, D>) -> Vector3<f64> {
        let [x, y, z] = self.0;
        Vector3::new(v[x], v[y], v[z])
    }

    pub fn set_angle_axis<const D: usize>(&self, v: &mut SVector<f64, D>, angle_axis: &Vector3<f64>) {
        let [x, y, z] = self.0;
        v[x] = angle_axis.x;
        v[y] = angle_axis.y;
        v[z] = angle_axis.z;
    }

    pub fn rotation<const D: usize>(&self, v: &SVector<f64, D>) -> UnitQuaternion<f64> {
        angle_axis_to_quaternion(&self.angle_axis(v))
    }

    pub fn set_rotation<const D: usize>(&self, v: &mut SVector<f64, D>, q: &UnitQuaternion<f64>) {
        self.set_angle_axis(v, &quaternion_to_angle_axis(q));
    }
}

/// `a ⊖ b`: linear components subtract, the rotation block becomes
/// `rot(a)·rot(b)⁻¹`.
pub fn difference<const D: usize>(
    a: &SVector<f64, D>,
    b: &SVector<f64, D>,
    rotation: Option<RotationBlock>,
) -> SVector<f64, D> {
    let mut result = a - b;
    if let Some(block) = rotation {
        let relative = block.rotation(a) * block.rotation(b).inverse();
        block.set_rotation(&mut result, &relative);
    }
    result
}

/// `a ⊕ delta`: linear components add, the rotation block becomes
/// `rot(delta)·rot(a)`.
pub fn addition<const D: usize>(
    a: &SVector<f64, D>,
    delta: &SVector<f64, D>,
    rotation: Option<RotationBlock>,
) -> SVector<f64, D> {
    let mut result = a + delta;
    if let Some(block) = rotation {
        let composed = block.rotation(delta) * block.rotation(a);
        block.set_rotation(&mut result, &composed);
    }
    result
}

/// Weighted mean of `points`. Weights may be negative.
pub fn weighted_average<const D: usize>(
    points: &[SVector<f64, D>],
    weights: &[f64],
    rotation: Option<RotationBlock>,
) -> SVector<f64, D> {
    let count = points.len().min(weights.len());
    let mut result = SVector::<f64, D>::zeros();
    for i in 0..count {
        result += points[i] * weights[i];
    }

    if let Some(block) = rotation {
        let rotations: Vec<UnitQuaternion<f64>> =
            points[..count].iter().map(|p| block.rotation(p)).collect();
        let mean = weighted_quaternion_average(&rotations, &weights[..count]);
        block.set_rotation(&mut result, &mean);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::SVector;

    type Vec6 = SVector<f64, 6>;

    const BLOCK: RotationBlock = RotationBlock([1, 3, 5]);

    fn sample() -> Vec6 {
        Vec6::from_column_slice(&[1.5, 0.3, -2.0, -0.4, 7.0, 0.9])
    }

    #[test]
    fn test_difference_with_self_is_zero() {
        let v = sample();
        let d = difference(&v, &v, Some(BLOCK));
        assert_relative_eq!(d, Vec6::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_small_delta() {
        let v = sample();
        let delta = Vec6::from_column_slice(&[0.01, -0.02, 0.5, 0.03, -0.1, 0.015]);
        let moved = addition(&v, &delta, Some(BLOCK));
        let recovered = difference(&moved, &v, Some(BLOCK));
        assert_relative_eq!(recovered, delta, epsilon = 1e-10);
    }

    #[test]
    fn test_addition_composes_rotation_on_the_left() {
        let a = Vec6::from_column_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2]);
        let delta = Vec6::from_column_slice(&[0.0, std::f64::consts::FRAC_PI_2, 0.0, 0.0, 0.0, 0.0]);
        let sum = addition(&a, &delta, Some(BLOCK));
        let expected = BLOCK.rotation(&delta) * BLOCK.rotation(&a);
        assert_relative_eq!(BLOCK.rotation(&sum).angle_to(&expected), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_average_of_identical_points() {
        let v = sample();
        let points = [v, v, v, v, v];
        let weights = [-0.5, 0.375, 0.375, 0.375, 0.375];
        let avg = weighted_average(&points, &weights, Some(BLOCK));
        assert_relative_eq!(avg, v, epsilon = 1e-9);
    }

    #[test]
    fn test_euclidean_average() {
        let a = Vec6::repeat(1.0);
        let b = Vec6::repeat(3.0);
        let avg = weighted_average(&[a, b], &[0.25, 0.75], None);
        assert_relative_eq!(avg, Vec6::repeat(2.5), epsilon = 1e-12);
    }
}
