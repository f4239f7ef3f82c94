/// One update step's worth of sensor readings for a controller.
///
/// Optical fields carry a quality in [0..1]; a quality of zero means the
/// tracker had no observation this step.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorPacket {
    /// Accelerometer [x, y, z] in g.
    pub imu_accelerometer: [f64; 3],
    /// Gyroscope [x, y, z] in rad/s.
    pub imu_gyroscope: [f64; 3],
    /// Magnetometer [x, y, z], unit length. Ignored for pad-type controllers.
    pub imu_magnetometer: [f64; 3],
    /// Optical position [x, y, z] in centimeters.
    pub optical_position: [f64; 3],
    pub optical_position_quality: f64,
    /// Optical orientation quaternion [qx, qy, qz, qw].
    pub optical_orientation: [f64; 4],
    pub optical_orientation_quality: f64,
}

impl Default for SensorPacket {
    fn default() -> Self {
        Self {
            imu_accelerometer: [0.0; 3],
            imu_gyroscope: [0.0; 3],
            imu_magnetometer: [0.0; 3],
            optical_position: [0.0; 3],
            optical_position_quality: 0.0,
            optical_orientation: [0.0, 0.0, 0.0, 1.0],
            optical_orientation_quality: 0.0,
        }
    }
}

/// Tuning constants for a pose filter. Supplied once at construction.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFilterConstants {
    /// Expected time between filter updates, in seconds.
    pub mean_update_time_delta: f64,
    /// Position variance (m²) at optical quality 1.
    pub min_position_variance: f64,
    /// Position variance (m²) at optical quality 0.
    pub max_position_variance: f64,
    /// Orientation variance (rad²) at optical quality 1.
    pub min_orientation_variance: f64,
    /// Orientation variance (rad²) at optical quality 0.
    pub max_orientation_variance: f64,
    pub accelerometer_variance: f64,
    pub gyroscope_variance: f64,
    pub magnetometer_variance: f64,
    /// Accelerometer reading (g units) of the controller at rest in its identity pose.
    pub gravity_calibration_direction: [f64; 3],
    /// Magnetometer reading of the controller in its identity pose.
    pub magnetometer_calibration_direction: [f64; 3],
}

impl Default for PoseFilterConstants {
    fn default() -> Self {
        Self {
            mean_update_time_delta: 1.0 / 60.0,
            min_position_variance: 1.0e-5,
            max_position_variance: 2.5e-3,
            min_orientation_variance: 1.0e-3,
            max_orientation_variance: 5.0e-2,
            accelerometer_variance: 5.0e-3,
            gyroscope_variance: 1.0e-3,
            magnetometer_variance: 2.5e-3,
            gravity_calibration_direction: [0.0, 1.0, 0.0],
            magnetometer_calibration_direction: [0.0, -0.6, 0.8],
        }
    }
}

/// Controller family, which selects the measurement layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Wand-type controller: accelerometer, gyroscope, magnetometer, optical position.
    Wand = 0,
    /// Pad-type controller: accelerometer, gyroscope, optical position and orientation.
    Pad = 1,
}

/// Completion code of a single USB transfer or register chain.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbResultCode {
    Started = 0,
    Canceled,
    Completed,
    GeneralError,
    BadHandle,
    NoMemory,
    SubmitFailed,
    DeviceNotOpen,
    TransferNotActive,
    TransferAlreadyStarted,
    Overflow,
    Pipe,
    TimedOut,
}

impl UsbResultCode {
    pub fn is_success(self) -> bool {
        matches!(self, UsbResultCode::Started | UsbResultCode::Completed)
    }
}

impl From<&rusb::Error> for UsbResultCode {
    fn from(err: &rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => UsbResultCode::TimedOut,
            rusb::Error::Pipe => UsbResultCode::Pipe,
            rusb::Error::Overflow => UsbResultCode::Overflow,
            rusb::Error::NoDevice | rusb::Error::NotFound => UsbResultCode::BadHandle,
            rusb::Error::NoMem => UsbResultCode::NoMemory,
            rusb::Error::Interrupted => UsbResultCode::Canceled,
            rusb::Error::Busy => UsbResultCode::TransferAlreadyStarted,
            rusb::Error::Access | rusb::Error::InvalidParam | rusb::Error::NotSupported => {
                UsbResultCode::SubmitFailed
            }
            _ => UsbResultCode::GeneralError,
        }
    }
}

bitflags::bitflags! {
    /// Image flip applied by the camera sensor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct FlipFlags: u8 {
        const HORIZONTAL = 1 << 0;
        const VERTICAL   = 1 << 1;
    }
}

/// Cached camera settings. Values are what the camera will converge to once
/// the queued register chains have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSettings {
    pub autogain: bool,
    pub auto_white_balance: bool,
    pub gain: u8,
    pub exposure: u8,
    pub sharpness: u8,
    pub hue: u8,
    pub brightness: u8,
    pub contrast: u8,
    pub red_balance: u8,
    pub green_balance: u8,
    pub blue_balance: u8,
    pub flip: FlipFlags,
    pub frame_rate: u8,
    pub led: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            autogain: false,
            auto_white_balance: false,
            gain: 20,
            exposure: 120,
            sharpness: 0,
            hue: 143,
            brightness: 20,
            contrast: 37,
            red_balance: 128,
            green_balance: 128,
            blue_balance: 128,
            flip: FlipFlags::empty(),
            frame_rate: 0,
            led: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rusb_error_mapping() {
        assert_eq!(UsbResultCode::from(&rusb::Error::Timeout), UsbResultCode::TimedOut);
        assert_eq!(UsbResultCode::from(&rusb::Error::Pipe), UsbResultCode::Pipe);
        assert_eq!(UsbResultCode::from(&rusb::Error::NoDevice), UsbResultCode::BadHandle);
        assert_eq!(UsbResultCode::from(&rusb::Error::Other), UsbResultCode::GeneralError);
        assert!(UsbResultCode::Completed.is_success());
        assert!(!UsbResultCode::Overflow.is_success());
    }

    #[test]
    fn test_default_packet_has_no_optical_data() {
        let packet = SensorPacket::default();
        assert_eq!(packet.optical_position_quality, 0.0);
        assert_eq!(packet.optical_orientation[3], 1.0);
    }
}
