//! C FFI layer for motionfusion.
//!
//! Provides an opaque handle-based pose filter API for C/C++ consumers.
//! The generated C header is written to `include/motionfusion.h` by cbindgen.

use crate::error::LastError;
use crate::filter::PoseFilter;
use crate::types::{DeviceKind, PoseFilterConstants, SensorPacket};
use crate::FusionError;
use std::ffi::{c_char, c_int};

static LAST_ERROR: LastError = LastError::new();

/// Opaque pose filter handle for C consumers.
pub struct MfPoseFilter(PoseFilter);

/// Filtered pose in C-compatible layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MfPose {
    /// Position [x, y, z] in centimeters relative to the recenter origin.
    pub position: [f64; 3],
    /// Orientation quaternion [qx, qy, qz, qw].
    pub orientation: [f64; 4],
    /// Linear velocity [x, y, z] in cm/s.
    pub velocity: [f64; 3],
    /// Linear acceleration [x, y, z] in cm/s².
    pub acceleration: [f64; 3],
    /// Angular velocity [x, y, z] in rad/s.
    pub angular_velocity: [f64; 3],
    /// Nonzero once the filter has bootstrapped from an optical observation.
    pub is_valid: c_int,
}

/// Create a pose filter.
/// `kind`: 0 = wand, 1 = pad. `constants` may be null for defaults.
/// Returns NULL on error (check mf_last_error()).
///
/// # Safety
/// `constants` must point to a valid `PoseFilterConstants`, or be null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_create(
    kind: c_int,
    constants: *const PoseFilterConstants,
) -> *mut MfPoseFilter {
    let kind = match kind {
        0 => DeviceKind::Wand,
        1 => DeviceKind::Pad,
        _ => {
            LAST_ERROR.set(&FusionError::InvalidArgument("kind must be 0 (wand) or 1 (pad)"));
            return std::ptr::null_mut();
        }
    };
    let constants = if constants.is_null() {
        PoseFilterConstants::default()
    } else {
        *constants
    };

    match PoseFilter::new(kind, constants) {
        Ok(filter) => Box::into_raw(Box::new(MfPoseFilter(filter))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Free a pose filter.
///
/// # Safety
/// `filter` must be a pointer returned by `mf_pose_filter_create`, or null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_destroy(filter: *mut MfPoseFilter) {
    if !filter.is_null() {
        drop(Box::from_raw(filter));
    }
}

/// Return the filter to its invalid, unbootstrapped state.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `filter` must be a valid filter pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_reset(filter: *mut MfPoseFilter) -> c_int {
    if filter.is_null() {
        return -1;
    }
    let filter = &mut *filter;
    match filter.0.reset_state() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Run one predict/update cycle.
/// Returns 0 on success, -1 on error. A numerical failure resets the filter.
///
/// # Safety
/// `filter` and `packet` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_update(
    filter: *mut MfPoseFilter,
    delta_time: f64,
    packet: *const SensorPacket,
) -> c_int {
    if filter.is_null() || packet.is_null() {
        return -1;
    }
    let filter = &mut *filter;
    match filter.0.update(delta_time, &*packet) {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Make the current pose the origin and reference orientation.
///
/// # Safety
/// `filter` must be a valid filter pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_recenter(filter: *mut MfPoseFilter) {
    if filter.is_null() {
        return;
    }
    let filter = &mut *filter;
    filter.0.recenter_state();
}

/// Check if the filter has bootstrapped.
///
/// # Safety
/// `filter` must be a valid filter pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_is_valid(filter: *const MfPoseFilter) -> bool {
    if filter.is_null() {
        return false;
    }
    let filter = &*filter;
    filter.0.is_state_valid()
}

/// Read the pose extrapolated `time` seconds ahead.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `filter` and `pose` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn mf_pose_filter_get_pose(
    filter: *const MfPoseFilter,
    time: f64,
    pose: *mut MfPose,
) -> c_int {
    if filter.is_null() || pose.is_null() {
        return -1;
    }
    let filter = &(*filter).0;

    let position = filter.position(time);
    let orientation = filter.orientation(time);
    let velocity = filter.velocity();
    let acceleration = filter.acceleration();
    let angular_velocity = filter.angular_velocity();

    pose.write(MfPose {
        position: [position.x, position.y, position.z],
        orientation: [orientation.i, orientation.j, orientation.k, orientation.w],
        velocity: [velocity.x, velocity.y, velocity.z],
        acceleration: [acceleration.x, acceleration.y, acceleration.z],
        angular_velocity: [angular_velocity.x, angular_velocity.y, angular_velocity.z],
        is_valid: filter.is_state_valid() as c_int,
    });
    0
}

/// Default filter constants, for callers that tweak only a few fields.
#[no_mangle]
pub extern "C" fn mf_pose_filter_default_constants() -> PoseFilterConstants {
    PoseFilterConstants::default()
}

/// Get the most recent error message. Returns NULL if no call has failed yet.
/// The returned pointer is valid until the next motionfusion API call.
#[no_mangle]
pub extern "C" fn mf_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_lifecycle() {
        unsafe {
            let filter = mf_pose_filter_create(0, std::ptr::null());
            assert!(!filter.is_null());
            assert!(!mf_pose_filter_is_valid(filter));

            let packet = SensorPacket {
                imu_accelerometer: [0.0, 1.0, 0.0],
                imu_magnetometer: [0.0, -0.6, 0.8],
                optical_position: [10.0, 20.0, 30.0],
                optical_position_quality: 1.0,
                ..SensorPacket::default()
            };
            assert_eq!(mf_pose_filter_update(filter, 1.0 / 60.0, &packet), 0);
            assert!(mf_pose_filter_is_valid(filter));

            let mut pose = MfPose::default();
            assert_eq!(mf_pose_filter_get_pose(filter, 0.0, &mut pose), 0);
            assert_eq!(pose.is_valid, 1);
            assert!((pose.position[0] - 10.0).abs() < 1e-6);
            assert!((pose.orientation[3] - 1.0).abs() < 1e-6);

            assert_eq!(mf_pose_filter_reset(filter), 0);
            assert!(!mf_pose_filter_is_valid(filter));
            mf_pose_filter_destroy(filter);
        }
    }

    #[test]
    fn test_ffi_rejects_bad_arguments() {
        unsafe {
            assert!(mf_pose_filter_create(7, std::ptr::null()).is_null());
            assert!(!mf_last_error().is_null());
            assert_eq!(mf_pose_filter_update(std::ptr::null_mut(), 0.01, std::ptr::null()), -1);
            assert!(!mf_pose_filter_is_valid(std::ptr::null()));
            mf_pose_filter_destroy(std::ptr::null_mut());
        }
    }
}
