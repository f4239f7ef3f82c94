use crate::linalg::psd_cholesky;
use crate::math::{angular_velocity_to_quaternion_derivative, lerp_clamp, normalize_with_default};
use crate::state::{self, StateMatrix, StateVector};
use crate::types::PoseFilterConstants;
use crate::{FusionError, Result};

/// State transition used by the sigma-point filter's predict step.
pub trait ProcessModel {
    /// Advance `x` by one time step.
    fn f(&self, x: &StateVector) -> StateVector;

    /// Lower square-root factor of the process noise covariance.
    fn covariance_sqrt(&self) -> &StateMatrix;
}

/// Constant linear acceleration / constant angular velocity motion model.
#[derive(Debug, Clone)]
pub struct PoseProcessModel {
    time_step: f64,
    noise: StateMatrix,
    noise_sqrt: StateMatrix,
}

impl PoseProcessModel {
    /// Model with the most pessimistic process noise from `constants`.
    pub fn new(constants: &PoseFilterConstants) -> Result<Self> {
        let mut model = PoseProcessModel {
            time_step: constants.mean_update_time_delta,
            noise: StateMatrix::zeros(),
            noise_sqrt: StateMatrix::zeros(),
        };
        model.init(constants)?;
        Ok(model)
    }

    pub fn init(&mut self, constants: &PoseFilterConstants) -> Result<()> {
        self.time_step = constants.mean_update_time_delta;
        self.rebuild_noise(
            constants.mean_update_time_delta,
            constants.max_position_variance,
            constants.max_orientation_variance,
        )
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn set_time_step(&mut self, dt: f64) {
        self.time_step = dt;
    }

    /// Process noise covariance `Q`.
    pub fn noise_covariance(&self) -> &StateMatrix {
        &self.noise
    }

    /// Tighten the process noise as tracking quality improves.
    pub fn update_process_covariance(
        &mut self,
        constants: &PoseFilterConstants,
        position_quality: f64,
        orientation_quality: f64,
    ) -> Result<()> {
        let position_variance = lerp_clamp(
            constants.max_position_variance,
            constants.min_position_variance,
            position_quality,
        );
        let orientation_variance = lerp_clamp(
            constants.max_orientation_variance,
            constants.min_orientation_variance,
            orientation_quality,
        );
        self.rebuild_noise(
            constants.mean_update_time_delta,
            position_variance,
            orientation_variance,
        )
    }

    fn rebuild_noise(&mut self, dt: f64, position_variance: f64, orientation_variance: f64) -> Result<()> {
        if !(dt.is_finite() && position_variance.is_finite() && orientation_variance.is_finite()) {
            return Err(FusionError::Configuration(format!(
                "process noise parameters must be finite (dt={}, position={}, orientation={})",
                dt, position_variance, orientation_variance
            )));
        }

        let mut q = StateMatrix::zeros();
        discrete_3rd_order_white_noise(dt, position_variance, state::POSITION_X, &mut q);
        discrete_3rd_order_white_noise(dt, position_variance, state::POSITION_Y, &mut q);
        discrete_3rd_order_white_noise(dt, position_variance, state::POSITION_Z, &mut q);
        discrete_2nd_order_white_noise(dt, orientation_variance, state::ANGLE_AXIS_X, &mut q);
        discrete_2nd_order_white_noise(dt, orientation_variance, state::ANGLE_AXIS_Y, &mut q);
        discrete_2nd_order_white_noise(dt, orientation_variance, state::ANGLE_AXIS_Z, &mut q);

        self.noise_sqrt = psd_cholesky(&q)?;
        self.noise = q;
        Ok(())
    }
}

impl ProcessModel for PoseProcessModel {
    fn f(&self, x: &StateVector) -> StateVector {
        let dt = self.time_step;
        let position = state::position(x);
        let velocity = state::linear_velocity(x);
        let acceleration = state::linear_acceleration(x);
        let orientation = state::orientation(x);
        let angular_velocity = state::angular_velocity(x);

        let derivative = angular_velocity_to_quaternion_derivative(&orientation, &angular_velocity);
        let next_orientation =
            normalize_with_default(&(orientation.into_inner() + derivative * dt), orientation);

        let mut next = *x;
        state::set_position(&mut next, &(position + velocity * dt + acceleration * (0.5 * dt * dt)));
        state::set_linear_velocity(&mut next, &(velocity + acceleration * dt));
        state::set_orientation(&mut next, &next_orientation);
        next
    }

    fn covariance_sqrt(&self) -> &StateMatrix {
        &self.noise_sqrt
    }
}

/// Discretised white-noise kernel for a (position, velocity, acceleration)
/// triple: `var·g·gᵀ` with `g = [½dt², dt, 1]`.
fn discrete_3rd_order_white_noise(dt: f64, var: f64, i: usize, q: &mut StateMatrix) {
    let dt2 = dt * dt;
    let q4 = var * dt2 * dt2;
    let q3 = var * dt2 * dt;
    let q2 = var * dt2;
    let q1 = var * dt;
    let q0 = var;

    q[(i, i)] = 0.25 * q4;
    q[(i, i + 1)] = 0.5 * q3;
    q[(i, i + 2)] = 0.5 * q2;
    q[(i + 1, i)] = 0.5 * q3;
    q[(i + 1, i + 1)] = q2;
    q[(i + 1, i + 2)] = q1;
    q[(i + 2, i)] = 0.5 * q2;
    q[(i + 2, i + 1)] = q1;
    q[(i + 2, i + 2)] = q0;
}

/// Discretised white-noise kernel for an (angle, angular velocity) pair:
/// `var·g·gᵀ` with `g = [½dt², dt]`.
fn discrete_2nd_order_white_noise(dt: f64, var: f64, i: usize, q: &mut StateMatrix) {
    let dt2 = dt * dt;
    let q4 = var * dt2 * dt2;
    let q3 = var * dt2 * dt;
    let q2 = var * dt2;

    q[(i, i)] = 0.25 * q4;
    q[(i, i + 1)] = 0.5 * q3;
    q[(i + 1, i)] = 0.5 * q3;
    q[(i + 1, i + 1)] = q2;
}
