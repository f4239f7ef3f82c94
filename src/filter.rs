use crate::config::FilterTuning;
use crate::math::{
    angular_velocity_to_quaternion_derivative, is_nearly_zero, normalize_with_default,
    CENTIMETERS_TO_METERS, METERS_TO_CENTIMETERS,
};
use crate::measurement::{DeviceMeasurementModel, MeasurementModel};
use crate::process::PoseProcessModel;
use crate::state::{self, StateVector};
use crate::types::{DeviceKind, PoseFilterConstants, SensorPacket};
use crate::ukf::SquareRootUkf;
use crate::Result;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Pose estimator for one tracked controller.
///
/// The filter starts invalid and bootstraps from the first packet that
/// carries an optical position. Positions are reported in centimeters
/// relative to the last recenter.
#[derive(Debug, Clone)]
pub struct PoseFilter {
    constants: PoseFilterConstants,
    is_valid: bool,
    reset_orientation: UnitQuaternion<f64>,
    /// In meters.
    origin_position: Vector3<f64>,
    process: PoseProcessModel,
    measurement: DeviceMeasurementModel,
    ukf: SquareRootUkf,
}

impl PoseFilter {
    /// Create a filter with the default sigma-point tuning.
    pub fn new(kind: DeviceKind, constants: PoseFilterConstants) -> Result<PoseFilter> {
        Self::with_tuning(kind, constants, &FilterTuning::default())
    }

    pub fn with_tuning(
        kind: DeviceKind,
        constants: PoseFilterConstants,
        tuning: &FilterTuning,
    ) -> Result<PoseFilter> {
        let ukf = SquareRootUkf::new(tuning)?;
        let process = PoseProcessModel::new(&constants)?;
        let measurement = DeviceMeasurementModel::new(kind, &constants);

        let mut filter = PoseFilter {
            constants,
            is_valid: false,
            reset_orientation: UnitQuaternion::identity(),
            origin_position: Vector3::zeros(),
            process,
            measurement,
            ukf,
        };
        filter.reset_state()?;
        Ok(filter)
    }

    pub fn kind(&self) -> DeviceKind {
        self.measurement.kind()
    }

    pub fn constants(&self) -> &PoseFilterConstants {
        &self.constants
    }

    pub fn is_state_valid(&self) -> bool {
        self.is_valid
    }

    /// Raw filter state (meters, m/s, angle-axis radians).
    pub fn state(&self) -> &StateVector {
        self.ukf.state()
    }

    /// Return to the uninitialised state: identity reference, zero state,
    /// recomputed noise models.
    pub fn reset_state(&mut self) -> Result<()> {
        self.is_valid = false;
        self.reset_orientation = UnitQuaternion::identity();
        self.origin_position = Vector3::zeros();
        self.process.init(&self.constants)?;
        self.measurement.init(&self.constants);
        self.ukf.init(StateVector::zeros());
        Ok(())
    }

    /// Make the current pose the reference for subsequently reported poses.
    pub fn recenter_state(&mut self) {
        let x = self.ukf.state();
        let inverse = state::orientation(x).inverse();
        self.reset_orientation =
            normalize_with_default(inverse.as_ref(), UnitQuaternion::identity());
        self.origin_position = state::position(x);
        log::debug!("Pose filter recentered at {:?} m", self.origin_position);
    }

    /// Feed one sensor packet.
    ///
    /// A numerical failure invalidates the filter; it re-bootstraps from the
    /// next packet with an optical position.
    pub fn update(&mut self, delta_time: f64, packet: &SensorPacket) -> Result<()> {
        if self.is_valid {
            if let Err(e) = self.predict_and_update(delta_time, packet) {
                log::warn!("Pose filter invalidated: {}", e);
                self.reset_state()?;
                return Err(e);
            }
        } else if packet.optical_position_quality > 0.0 {
            self.bootstrap(packet);
        }
        Ok(())
    }

    fn bootstrap(&mut self, packet: &SensorPacket) {
        let mut x = StateVector::zeros();
        let position = Vector3::from(packet.optical_position) * CENTIMETERS_TO_METERS;
        state::set_position(&mut x, &position);

        let orientation = if packet.optical_orientation_quality > 0.0 {
            packet_orientation(packet)
        } else {
            UnitQuaternion::identity()
        };
        state::set_orientation(&mut x, &orientation);

        self.ukf.init(x);
        self.is_valid = true;
        log::info!(
            "Pose filter ({:?}) bootstrapped at {:?} m",
            self.measurement.kind(),
            position
        );
    }

    fn predict_and_update(&mut self, delta_time: f64, packet: &SensorPacket) -> Result<()> {
        let position_quality = packet.optical_position_quality;
        let orientation_quality = packet.optical_orientation_quality;

        if position_quality > 0.0 || orientation_quality > 0.0 {
            self.measurement.update_measurement_covariance(
                &self.constants,
                position_quality,
                orientation_quality,
            );
            self.process.update_process_covariance(
                &self.constants,
                position_quality,
                orientation_quality,
            )?;
        }

        self.process.set_time_step(delta_time);
        self.ukf.predict(&self.process)?;

        // Rows without a fresh observation keep the prediction.
        let mut z = self.measurement.h(self.ukf.state());
        let optical_position = (position_quality > 0.0)
            .then(|| Vector3::from(packet.optical_position) * CENTIMETERS_TO_METERS);
        let optical_orientation = (orientation_quality > 0.0).then(|| packet_orientation(packet));
        self.measurement.overlay_observation(
            &mut z,
            &Vector3::from(packet.imu_accelerometer),
            &Vector3::from(packet.imu_gyroscope),
            &Vector3::from(packet.imu_magnetometer),
            optical_position.as_ref(),
            optical_orientation.as_ref(),
        );

        self.ukf.update(&self.measurement, &z)?;
        log::trace!("Pose filter state: {:?}", self.ukf.state().as_slice());
        Ok(())
    }

    /// Orientation relative to the recenter reference, extrapolated `time`
    /// seconds ahead. Identity while the filter is invalid.
    pub fn orientation(&self, time: f64) -> UnitQuaternion<f64> {
        if !self.is_valid {
            return UnitQuaternion::identity();
        }

        let current = state::orientation(self.ukf.state());
        let predicted = if is_nearly_zero(time) {
            current
        } else {
            let derivative =
                angular_velocity_to_quaternion_derivative(&current, &self.angular_velocity());
            normalize_with_default(&(current.into_inner() + derivative * time), current)
        };

        self.reset_orientation * predicted
    }

    /// Position in centimeters relative to the recenter origin, extrapolated
    /// `time` seconds ahead. Zero while the filter is invalid.
    pub fn position(&self, time: f64) -> Vector3<f64> {
        if !self.is_valid {
            return Vector3::zeros();
        }

        let x = self.ukf.state();
        let current = state::position(x);
        let predicted = if is_nearly_zero(time) {
            current
        } else {
            current + state::linear_velocity(x) * time
        };

        (predicted - self.origin_position) * METERS_TO_CENTIMETERS
    }

    /// Linear velocity in cm/s.
    pub fn velocity(&self) -> Vector3<f64> {
        state::linear_velocity(self.ukf.state()) * METERS_TO_CENTIMETERS
    }

    /// Linear acceleration in cm/s².
    pub fn acceleration(&self) -> Vector3<f64> {
        state::linear_acceleration(self.ukf.state()) * METERS_TO_CENTIMETERS
    }

    /// Angular velocity in rad/s.
    pub fn angular_velocity(&self) -> Vector3<f64> {
        state::angular_velocity(self.ukf.state())
    }

    /// Not modelled by the state; always zero.
    pub fn angular_acceleration(&self) -> Vector3<f64> {
        Vector3::zeros()
    }
}

fn packet_orientation(packet: &SensorPacket) -> UnitQuaternion<f64> {
    let [qx, qy, qz, qw] = packet.optical_orientation;
    normalize_with_default(&Quaternion::new(qw, qx, qy, qz), UnitQuaternion::identity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn resting_packet(constants: &PoseFilterConstants) -> SensorPacket {
        let g = constants.gravity_calibration_direction;
        SensorPacket {
            imu_accelerometer: [-g[0], -g[1], -g[2]],
            imu_magnetometer: constants.magnetometer_calibration_direction,
            ..SensorPacket::default()
        }
    }

    #[test]
    fn test_starts_invalid() {
        let filter = PoseFilter::new(DeviceKind::Wand, PoseFilterConstants::default()).unwrap();
        assert!(!filter.is_state_valid());
        assert_eq!(filter.position(0.0), Vector3::zeros());
        assert_relative_eq!(filter.orientation(0.0).angle(), 0.0);
    }

    #[test]
    fn test_packet_without_optical_keeps_invalid() {
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Pad, constants).unwrap();
        filter.update(1.0 / 60.0, &resting_packet(&constants)).unwrap();
        assert!(!filter.is_state_valid());
    }

    #[test]
    fn test_cold_start_then_imu_only_update() {
        init_logging();
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Wand, constants).unwrap();

        let mut first = resting_packet(&constants);
        first.optical_position = [10.0, 20.0, -30.0];
        first.optical_position_quality = 0.8;
        filter.update(1.0 / 60.0, &first).unwrap();

        assert!(filter.is_state_valid());
        assert_relative_eq!(
            state::position(filter.state()),
            Vector3::new(0.1, 0.2, -0.3),
            epsilon = 1e-12
        );
        assert_relative_eq!(filter.orientation(0.0).angle(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(filter.position(0.0), Vector3::new(10.0, 20.0, -30.0), epsilon = 1e-9);

        let second = resting_packet(&constants);
        filter.update(1.0 / 60.0, &second).unwrap();

        assert!(filter.is_state_valid());
        let position = filter.position(0.0);
        assert!(position.iter().all(|v| v.is_finite()));
        assert!((position - Vector3::new(10.0, 20.0, -30.0)).norm() < 1.0);
    }

    #[test]
    fn test_pad_bootstraps_with_optical_orientation() {
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Pad, constants).unwrap();
        let q = UnitQuaternion::from_euler_angles(0.0, 0.3, 0.0);

        let mut packet = resting_packet(&constants);
        packet.optical_position = [0.0, 0.0, 100.0];
        packet.optical_position_quality = 1.0;
        packet.optical_orientation = [q.i, q.j, q.k, q.w];
        packet.optical_orientation_quality = 0.5;
        filter.update(1.0 / 60.0, &packet).unwrap();

        assert!(filter.is_state_valid());
        assert_relative_eq!(filter.orientation(0.0).angle_to(&q), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tracks_repeated_optical_position() {
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Pad, constants).unwrap();

        let mut packet = resting_packet(&constants);
        packet.optical_position = [5.0, 0.0, 50.0];
        packet.optical_position_quality = 1.0;
        packet.optical_orientation_quality = 1.0;
        for _ in 0..30 {
            filter.update(1.0 / 60.0, &packet).unwrap();
        }

        assert!(filter.is_state_valid());
        assert!((filter.position(0.0) - Vector3::new(5.0, 0.0, 50.0)).norm() < 1.0);
        assert!(filter.orientation(0.0).angle() < 0.1);
    }

    #[test]
    fn test_recenter_zeroes_reported_pose() {
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Pad, constants).unwrap();
        let q = UnitQuaternion::from_euler_angles(0.2, 0.0, -0.4);

        let mut packet = resting_packet(&constants);
        packet.optical_position = [3.0, 4.0, 5.0];
        packet.optical_position_quality = 1.0;
        packet.optical_orientation = [q.i, q.j, q.k, q.w];
        packet.optical_orientation_quality = 1.0;
        filter.update(1.0 / 60.0, &packet).unwrap();

        filter.recenter_state();
        assert_relative_eq!(filter.position(0.0), Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(filter.orientation(0.0).angle(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(state::position(filter.state()), Vector3::new(0.03, 0.04, 0.05), epsilon = 1e-12);
    }

    #[test]
    fn test_position_extrapolation() {
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Wand, constants).unwrap();
        let mut packet = resting_packet(&constants);
        packet.optical_position_quality = 1.0;
        filter.update(1.0 / 60.0, &packet).unwrap();

        let mut x = *filter.state();
        state::set_linear_velocity(&mut x, &Vector3::new(0.5, 0.0, 0.0));
        filter.ukf.set_state(x);

        assert_relative_eq!(filter.position(0.1), Vector3::new(5.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(filter.velocity(), Vector3::new(50.0, 0.0, 0.0), epsilon = 1e-9);
        assert_eq!(filter.angular_acceleration(), Vector3::zeros());
    }

    #[test]
    fn test_numerical_failure_invalidates_then_rebootstraps() {
        init_logging();
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Wand, constants).unwrap();
        let mut packet = resting_packet(&constants);
        packet.optical_position = [10.0, 0.0, 40.0];
        packet.optical_position_quality = 1.0;
        filter.update(1.0 / 60.0, &packet).unwrap();
        assert!(filter.is_state_valid());

        let mut corrupt = resting_packet(&constants);
        corrupt.imu_accelerometer = [f64::NAN, 0.0, 0.0];
        let result = filter.update(1.0 / 60.0, &corrupt);
        assert!(matches!(result, Err(crate::FusionError::Numerical(_))));
        assert!(!filter.is_state_valid());
        assert_eq!(*filter.state(), StateVector::zeros());

        packet.optical_position = [-5.0, 2.0, 30.0];
        filter.update(1.0 / 60.0, &packet).unwrap();
        assert!(filter.is_state_valid());
        assert_relative_eq!(filter.position(0.0), Vector3::new(-5.0, 2.0, 30.0), epsilon = 1e-9);
    }

    #[test]
    fn test_reset_state() {
        let constants = PoseFilterConstants::default();
        let mut filter = PoseFilter::new(DeviceKind::Wand, constants).unwrap();
        let mut packet = resting_packet(&constants);
        packet.optical_position = [1.0, 1.0, 1.0];
        packet.optical_position_quality = 1.0;
        filter.update(1.0 / 60.0, &packet).unwrap();
        filter.recenter_state();

        filter.reset_state().unwrap();
        assert!(!filter.is_state_valid());
        assert_eq!(*filter.state(), StateVector::zeros());
    }
}
