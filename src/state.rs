//! Pose state layout and type aliases.
//!
//! Components are interleaved per axis so that each process-noise kernel
//! covers a contiguous block.

use crate::manifold::RotationBlock;
use nalgebra::{SMatrix, SVector, UnitQuaternion, Vector3};

// -- Dimensions --
pub const STATE_DIM: usize = 15;
pub const MEASUREMENT_DIM: usize = 12;
pub const SIGMA_COUNT: usize = 2 * STATE_DIM + 1;

// -- State component indices --
pub const POSITION_X: usize = 0;
pub const LINEAR_VELOCITY_X: usize = 1;
pub const LINEAR_ACCELERATION_X: usize = 2;
pub const POSITION_Y: usize = 3;
pub const LINEAR_VELOCITY_Y: usize = 4;
pub const LINEAR_ACCELERATION_Y: usize = 5;
pub const POSITION_Z: usize = 6;
pub const LINEAR_VELOCITY_Z: usize = 7;
pub const LINEAR_ACCELERATION_Z: usize = 8;
pub const ANGLE_AXIS_X: usize = 9;
pub const ANGULAR_VELOCITY_X: usize = 10;
pub const ANGLE_AXIS_Y: usize = 11;
pub const ANGULAR_VELOCITY_Y: usize = 12;
pub const ANGLE_AXIS_Z: usize = 13;
pub const ANGULAR_VELOCITY_Z: usize = 14;

pub const STATE_ROTATION: RotationBlock =
    RotationBlock([ANGLE_AXIS_X, ANGLE_AXIS_Y, ANGLE_AXIS_Z]);

// -- Types --
pub type StateVector = SVector<f64, STATE_DIM>;
pub type StateMatrix = SMatrix<f64, STATE_DIM, STATE_DIM>;
pub type MeasurementVector = SVector<f64, MEASUREMENT_DIM>;
pub type MeasurementMatrix = SMatrix<f64, MEASUREMENT_DIM, MEASUREMENT_DIM>;

fn read3(x: &StateVector, ix: usize, iy: usize, iz: usize) -> Vector3<f64> {
    Vector3::new(x[ix], x[iy], x[iz])
}

fn write3(x: &mut StateVector, ix: usize, iy: usize, iz: usize, v: &Vector3<f64>) {
    x[ix] = v.x;
    x[iy] = v.y;
    x[iz] = v.z;
}

/// Position in meters.
pub fn position(x: &StateVector) -> Vector3<f64> {
    read3(x, POSITION_X, POSITION_Y, POSITION_Z)
}

pub fn set_position(x: &mut StateVector, p: &Vector3<f64>) {
    write3(x, POSITION_X, POSITION_Y, POSITION_Z, p);
}

/// Linear velocity in m/s.
pub fn linear_velocity(x: &StateVector) -> Vector3<f64> {
    read3(x, LINEAR_VELOCITY_X, LINEAR_VELOCITY_Y, LINEAR_VELOCITY_Z)
}

pub fn set_linear_velocity(x: &mut StateVector, v: &Vector3<f64>) {
    write3(x, LINEAR_VELOCITY_X, LINEAR_VELOCITY_Y, LINEAR_VELOCITY_Z, v);
}

/// Linear acceleration in m/s².
pub fn linear_acceleration(x: &StateVector) -> Vector3<f64> {
    read3(x, LINEAR_ACCELERATION_X, LINEAR_ACCELERATION_Y, LINEAR_ACCELERATION_Z)
}

pub fn set_linear_acceleration(x: &mut StateVector, a: &Vector3<f64>) {
    write3(x, LINEAR_ACCELERATION_X, LINEAR_ACCELERATION_Y, LINEAR_ACCELERATION_Z, a);
}

pub fn angle_axis(x: &StateVector) -> Vector3<f64> {
    STATE_ROTATION.angle_axis(x)
}

pub fn orientation(x: &StateVector) -> UnitQuaternion<f64> {
    STATE_ROTATION.rotation(x)
}

pub fn set_orientation(x: &mut StateVector, q: &UnitQuaternion<f64>) {
    STATE_ROTATION.set_rotation(x, q);
}

/// Angular velocity in rad/s.
pub fn angular_velocity(x: &StateVector) -> Vector3<f64> {
    read3(x, ANGULAR_VELOCITY_X, ANGULAR_VELOCITY_Y, ANGULAR_VELOCITY_Z)
}

pub fn set_angular_velocity(x: &mut StateVector, w: &Vector3<f64>) {
    write3(x, ANGULAR_VELOCITY_X, ANGULAR_VELOCITY_Y, ANGULAR_VELOCITY_Z, w);
}
