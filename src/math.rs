use nalgebra::{Matrix4, Quaternion, SymmetricEigen, Unit, UnitQuaternion, Vector3, Vector4};

// -- Unit conversions --
pub const METERS_TO_CENTIMETERS: f64 = 100.0;
pub const CENTIMETERS_TO_METERS: f64 = 0.01;
/// Standard gravity, m/s² to g.
pub const MS2_TO_G: f64 = 1.0 / 9.80665;

/// Anything below this is treated as zero length.
pub const REAL_EPSILON: f64 = 1.0e-9;

pub fn is_nearly_zero(value: f64) -> bool {
    value.abs() <= REAL_EPSILON
}

/// Interpolate from `a` towards `b` by `u`, clamped to the segment.
pub fn lerp_clamp(a: f64, b: f64, u: f64) -> f64 {
    a + (b - a) * u.clamp(0.0, 1.0)
}

/// Rotation encoded by an angle-axis vector (direction = axis, length = angle).
pub fn angle_axis_to_quaternion(angle_axis: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = angle_axis.norm();
    if angle <= REAL_EPSILON || !angle.is_finite() {
        return UnitQuaternion::identity();
    }
    let axis = Unit::new_unchecked(angle_axis / angle);
    UnitQuaternion::from_axis_angle(&axis, angle)
}

/// Angle-axis encoding of `q`, with the angle in [0, π].
pub fn quaternion_to_angle_axis(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    q.scaled_axis()
}

/// Normalize `q`, falling back to `default` when it has no usable length.
pub fn normalize_with_default(
    q: &Quaternion<f64>,
    default: UnitQuaternion<f64>,
) -> UnitQuaternion<f64> {
    let norm = q.norm();
    if norm <= REAL_EPSILON || !norm.is_finite() {
        default
    } else {
        UnitQuaternion::new_unchecked(q / norm)
    }
}

/// Time derivative of `q` under body angular velocity `omega`: ½·(0, ω)·q.
pub fn angular_velocity_to_quaternion_derivative(
    q: &UnitQuaternion<f64>,
    omega: &Vector3<f64>,
) -> Quaternion<f64> {
    Quaternion::from_imag(*omega) * q.into_inner() * 0.5
}

/// Weighted mean rotation.
///
/// Uses the eigenvector of the largest eigenvalue of `Σ wᵢ·qᵢ·qᵢᵀ`, which is
/// insensitive to the sign of each `qᵢ` and accepts negative weights. The
/// result is canonicalised to a non-negative scalar part.
pub fn weighted_quaternion_average(
    quaternions: &[UnitQuaternion<f64>],
    weights: &[f64],
) -> UnitQuaternion<f64> {
    let count = quaternions.len().min(weights.len());
    let mut accumulator = Matrix4::<f64>::zeros();
    for i in 0..count {
        let q: &Vector4<f64> = &quaternions[i].as_ref().coords;
        accumulator += q * q.transpose() * weights[i];
    }

    if accumulator.iter().all(|v| is_nearly_zero(*v)) {
        return UnitQuaternion::identity();
    }

    let eigen = SymmetricEigen::new(accumulator);
    let principal = eigen.eigenvalues.imax();
    let mut coords: Vector4<f64> = eigen.eigenvectors.column(principal).into_owned();
    if coords.w < 0.0 {
        coords = -coords;
    }

    normalize_with_default(&Quaternion::from(coords), UnitQuaternion::identity())
}
