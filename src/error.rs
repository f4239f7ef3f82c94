use std::fmt;

/// Errors that can occur while fusing poses or talking to the camera.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Invalid filter configuration: {0}")]
    Configuration(String),

    #[error("Numerical failure in {0}")]
    Numerical(&'static str),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("USB transport stopped")]
    TransportStopped,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &FusionError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
