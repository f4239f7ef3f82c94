//! Device measurement models: predicted sensor readings and observation noise.

use crate::manifold::RotationBlock;
use crate::math::{lerp_clamp, MS2_TO_G};
use crate::state::{self, MeasurementMatrix, MeasurementVector, StateVector, MEASUREMENT_DIM};
use crate::types::{DeviceKind, PoseFilterConstants};
use nalgebra::{SMatrix, SVector, UnitQuaternion, Vector3};

// -- Wand measurement layout --
pub const WAND_ACCELEROMETER: usize = 0;
pub const WAND_GYROSCOPE: usize = 3;
pub const WAND_MAGNETOMETER: usize = 6;
pub const WAND_OPTICAL_POSITION: usize = 9;

// -- Pad measurement layout --
pub const PAD_ACCELEROMETER: usize = 0;
pub const PAD_GYROSCOPE: usize = 3;
pub const PAD_OPTICAL_POSITION: usize = 6;
pub const PAD_OPTICAL_ANGLE_AXIS: usize = 9;

pub const PAD_ROTATION: RotationBlock = RotationBlock::contiguous(PAD_OPTICAL_ANGLE_AXIS);

/// Maps a state to the sensor readings it should produce.
pub trait MeasurementModel<const M: usize> {
    /// Predicted measurement for state `x`.
    fn h(&self, x: &StateVector) -> SVector<f64, M>;

    /// Lower square-root factor of the measurement noise covariance.
    fn covariance_sqrt(&self) -> &SMatrix<f64, M, M>;

    /// Angle-axis block of the measurement vector, if it has one.
    fn rotation_block(&self) -> Option<RotationBlock> {
        None
    }
}

pub fn block(z: &MeasurementVector, start: usize) -> Vector3<f64> {
    Vector3::new(z[start], z[start + 1], z[start + 2])
}

pub fn set_block(z: &mut MeasurementVector, start: usize, v: &Vector3<f64>) {
    z[start] = v.x;
    z[start + 1] = v.y;
    z[start + 2] = v.z;
}

/// Diagonal noise kept both as variances and as its square-root factor.
#[derive(Debug, Clone)]
struct DiagonalNoise {
    variances: MeasurementVector,
    sqrt: MeasurementMatrix,
}

impl DiagonalNoise {
    fn new() -> Self {
        DiagonalNoise {
            variances: MeasurementVector::zeros(),
            sqrt: MeasurementMatrix::zeros(),
        }
    }

    fn set(&mut self, start: usize, variance: f64) {
        let variance = variance.max(0.0);
        for i in start..start + 3 {
            self.variances[i] = variance;
            self.sqrt[(i, i)] = variance.sqrt();
        }
    }

    fn covariance(&self) -> MeasurementMatrix {
        MeasurementMatrix::from_diagonal(&self.variances)
    }
}

/// Accelerometer reading predicted for `x`: linear acceleration plus the
/// rest gravity reading, expressed in the controller frame.
fn predict_accelerometer(x: &StateVector, gravity: &Vector3<f64>) -> Vector3<f64> {
    let orientation = state::orientation(x);
    let accel_world = state::linear_acceleration(x) * MS2_TO_G - gravity;
    orientation.inverse_transform_vector(&accel_world)
}

/// Wand-type controller: accelerometer, gyroscope, magnetometer and optical position.
#[derive(Debug, Clone)]
pub struct WandMeasurementModel {
    gravity_direction: Vector3<f64>,
    magnetometer_direction: Vector3<f64>,
    noise: DiagonalNoise,
}

impl WandMeasurementModel {
    pub fn new(constants: &PoseFilterConstants) -> Self {
        let mut model = WandMeasurementModel {
            gravity_direction: Vector3::zeros(),
            magnetometer_direction: Vector3::zeros(),
            noise: DiagonalNoise::new(),
        };
        model.init(constants);
        model
    }

    pub fn init(&mut self, constants: &PoseFilterConstants) {
        self.gravity_direction = Vector3::from(constants.gravity_calibration_direction);
        self.magnetometer_direction = Vector3::from(constants.magnetometer_calibration_direction);
        self.noise.set(WAND_ACCELEROMETER, constants.accelerometer_variance);
        self.noise.set(WAND_GYROSCOPE, constants.gyroscope_variance);
        self.noise.set(WAND_MAGNETOMETER, constants.magnetometer_variance);
        self.noise.set(WAND_OPTICAL_POSITION, constants.max_position_variance);
    }

    /// Rescale the optical position noise. A zero quality leaves it untouched.
    pub fn update_measurement_covariance(&mut self, constants: &PoseFilterConstants, position_quality: f64) {
        if position_quality > 0.0 {
            self.noise.set(
                WAND_OPTICAL_POSITION,
                lerp_clamp(
                    constants.max_position_variance,
                    constants.min_position_variance,
                    position_quality,
                ),
            );
        }
    }

    pub fn covariance(&self) -> MeasurementMatrix {
        self.noise.covariance()
    }
}

impl MeasurementModel<MEASUREMENT_DIM> for WandMeasurementModel {
    fn h(&self, x: &StateVector) -> MeasurementVector {
        let orientation = state::orientation(x);
        let mut z = MeasurementVector::zeros();
        set_block(&mut z, WAND_ACCELEROMETER, &predict_accelerometer(x, &self.gravity_direction));
        set_block(&mut z, WAND_GYROSCOPE, &state::angular_velocity(x));
        set_block(
            &mut z,
            WAND_MAGNETOMETER,
            &orientation.inverse_transform_vector(&self.magnetometer_direction),
        );
        set_block(&mut z, WAND_OPTICAL_POSITION, &state::position(x));
        z
    }

    fn covariance_sqrt(&self) -> &MeasurementMatrix {
        &self.noise.sqrt
    }
}

/// Pad-type controller: accelerometer, gyroscope, optical position and orientation.
#[derive(Debug, Clone)]
pub struct PadMeasurementModel {
    gravity_direction: Vector3<f64>,
    noise: DiagonalNoise,
}

impl PadMeasurementModel {
    pub fn new(constants: &PoseFilterConstants) -> Self {
        let mut model = PadMeasurementModel {
            gravity_direction: Vector3::zeros(),
            noise: DiagonalNoise::new(),
        };
        model.init(constants);
        model
    }

    pub fn init(&mut self, constants: &PoseFilterConstants) {
        self.gravity_direction = Vector3::from(constants.gravity_calibration_direction);
        self.noise.set(PAD_ACCELEROMETER, constants.accelerometer_variance);
        self.noise.set(PAD_GYROSCOPE, constants.gyroscope_variance);
        self.noise.set(PAD_OPTICAL_POSITION, constants.max_position_variance);
        self.noise.set(PAD_OPTICAL_ANGLE_AXIS, constants.max_orientation_variance);
    }

    /// Rescale the optical noise entries whose quality is positive.
    pub fn update_measurement_covariance(
        &mut self,
        constants: &PoseFilterConstants,
        position_quality: f64,
        orientation_quality: f64,
    ) {
        if position_quality > 0.0 {
            self.noise.set(
                PAD_OPTICAL_POSITION,
                lerp_clamp(
                    constants.max_position_variance,
                    constants.min_position_variance,
                    position_quality,
                ),
            );
        }
        if orientation_quality > 0.0 {
            self.noise.set(
                PAD_OPTICAL_ANGLE_AXIS,
                lerp_clamp(
                    constants.max_orientation_variance,
                    constants.min_orientation_variance,
                    orientation_quality,
                ),
            );
        }
    }

    pub fn covariance(&self) -> MeasurementMatrix {
        self.noise.covariance()
    }
}

impl MeasurementModel<MEASUREMENT_DIM> for PadMeasurementModel {
    fn h(&self, x: &StateVector) -> MeasurementVector {
        let mut z = MeasurementVector::zeros();
        set_block(&mut z, PAD_ACCELEROMETER, &predict_accelerometer(x, &self.gravity_direction));
        set_block(&mut z, PAD_GYROSCOPE, &state::angular_velocity(x));
        set_block(&mut z, PAD_OPTICAL_POSITION, &state::position(x));
        set_block(&mut z, PAD_OPTICAL_ANGLE_AXIS, &state::angle_axis(x));
        z
    }

    fn covariance_sqrt(&self) -> &MeasurementMatrix {
        &self.noise.sqrt
    }

    fn rotation_block(&self) -> Option<RotationBlock> {
        Some(PAD_ROTATION)
    }
}

/// The measurement model of one controller family.
#[derive(Debug, Clone)]
pub enum DeviceMeasurementModel {
    Wand(WandMeasurementModel),
    Pad(PadMeasurementModel),
}

impl DeviceMeasurementModel {
    pub fn new(kind: DeviceKind, constants: &PoseFilterConstants) -> Self {
        match kind {
            DeviceKind::Wand => DeviceMeasurementModel::Wand(WandMeasurementModel::new(constants)),
            DeviceKind::Pad => DeviceMeasurementModel::Pad(PadMeasurementModel::new(constants)),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceMeasurementModel::Wand(_) => DeviceKind::Wand,
            DeviceMeasurementModel::Pad(_) => DeviceKind::Pad,
        }
    }

    pub fn init(&mut self, constants: &PoseFilterConstants) {
        match self {
            DeviceMeasurementModel::Wand(model) => model.init(constants),
            DeviceMeasurementModel::Pad(model) => model.init(constants),
        }
    }

    /// Rescale optical noise. Wands have no optical orientation row, so
    /// `orientation_quality` only matters for pads.
    pub fn update_measurement_covariance(
        &mut self,
        constants: &PoseFilterConstants,
        position_quality: f64,
        orientation_quality: f64,
    ) {
        match self {
            DeviceMeasurementModel::Wand(model) => {
                model.update_measurement_covariance(constants, position_quality)
            }
            DeviceMeasurementModel::Pad(model) => {
                model.update_measurement_covariance(constants, position_quality, orientation_quality)
            }
        }
    }

    pub fn covariance(&self) -> MeasurementMatrix {
        match self {
            DeviceMeasurementModel::Wand(model) => model.covariance(),
            DeviceMeasurementModel::Pad(model) => model.covariance(),
        }
    }

    /// Overwrite the rows of `z` that `packet` actually observed.
    ///
    /// IMU rows are always present. Optical rows are written only when their
    /// quality is positive; `optical_position_m` is already in meters.
    pub fn overlay_observation(
        &self,
        z: &mut MeasurementVector,
        accelerometer: &Vector3<f64>,
        gyroscope: &Vector3<f64>,
        magnetometer: &Vector3<f64>,
        optical_position_m: Option<&Vector3<f64>>,
        optical_orientation: Option<&UnitQuaternion<f64>>,
    ) {
        match self {
            DeviceMeasurementModel::Wand(_) => {
                set_block(z, WAND_ACCELEROMETER, accelerometer);
                set_block(z, WAND_GYROSCOPE, gyroscope);
                set_block(z, WAND_MAGNETOMETER, magnetometer);
                if let Some(position) = optical_position_m {
                    set_block(z, WAND_OPTICAL_POSITION, position);
                }
            }
            DeviceMeasurementModel::Pad(_) => {
                set_block(z, PAD_ACCELEROMETER, accelerometer);
                set_block(z, PAD_GYROSCOPE, gyroscope);
                if let Some(position) = optical_position_m {
                    set_block(z, PAD_OPTICAL_POSITION, position);
                }
                if let Some(orientation) = optical_orientation {
                    PAD_ROTATION.set_rotation(z, orientation);
                }
            }
        }
    }
}

impl MeasurementModel<MEASUREMENT_DIM> for DeviceMeasurementModel {
    fn h(&self, x: &StateVector) -> MeasurementVector {
        match self {
            DeviceMeasurementModel::Wand(model) => model.h(x),
            DeviceMeasurementModel::Pad(model) => model.h(x),
        }
    }

    fn covariance_sqrt(&self) -> &MeasurementMatrix {
        match self {
            DeviceMeasurementModel::Wand(model) => model.covariance_sqrt(),
            DeviceMeasurementModel::Pad(model) => model.covariance_sqrt(),
        }
    }

    fn rotation_block(&self) -> Option<RotationBlock> {
        match self {
            DeviceMeasurementModel::Wand(model) => model.rotation_block(),
            DeviceMeasurementModel::Pad(model) => model.rotation_block(),
        }
    }
}
