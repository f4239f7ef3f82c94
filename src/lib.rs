//! # motionfusion - controller pose fusion and PS3Eye camera control
//!
//! Provides:
//! - Square-root unscented Kalman filter fusing IMU and optical tracking
//!   into a controller pose (wand and pad layouts)
//! - Serialized, callback-driven OV534/SCCB register programming for the
//!   PS3Eye tracking camera over libusb
//! - C FFI for integration with C/C++/Unity
//!
//! ## Quick Start
//! ```no_run
//! use motionfusion::{DeviceKind, PoseFilter, PoseFilterConstants, SensorPacket, UsbDeviceManager};
//!
//! let mut filter = PoseFilter::new(DeviceKind::Wand, PoseFilterConstants::default()).unwrap();
//! let packet = SensorPacket {
//!     optical_position: [0.0, 100.0, 50.0],
//!     optical_position_quality: 1.0,
//!     ..SensorPacket::default()
//! };
//! filter.update(1.0 / 60.0, &packet).unwrap();
//! println!("pos: {:?} cm", filter.position(0.0));
//!
//! let manager = UsbDeviceManager::ps3eye();
//! for info in manager.list_devices().unwrap() {
//!     println!("{} at {:?}", info.device_path, info.port_path);
//! }
//! let mut camera = manager.open_camera("USB\\VID_1415&PID_2000\\0", 640).unwrap();
//! let fps = camera.set_frame_rate(60);
//! camera.set_exposure(80);
//! println!("streaming at {} fps", fps);
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod math;
pub mod linalg;
pub mod manifold;
pub mod state;
pub mod process;
pub mod measurement;
pub mod ukf;
pub mod filter;
pub mod protocol;
pub mod chain;
pub mod transport;
pub mod task_queue;
pub mod camera;
pub mod usb_manager;
pub mod ffi;

pub use error::FusionError;
pub use types::*;
pub use config::{FilterTuning, TransportConfig};
pub use filter::PoseFilter;
pub use ukf::SquareRootUkf;
pub use chain::{ChainFailure, ChainOutcome, RegisterChain};
pub use transport::{ControlRequest, ControlTransport, TransferResult, UsbTransport};
pub use task_queue::TaskQueue;
pub use camera::Ps3EyeCamera;
pub use usb_manager::{UsbDeviceFilter, UsbDeviceInfo, UsbDeviceManager};

/// Result type alias for motionfusion operations.
pub type Result<T> = std::result::Result<T, FusionError>;
