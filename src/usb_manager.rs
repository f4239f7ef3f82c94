use crate::camera::Ps3EyeCamera;
use crate::config::TransportConfig;
use crate::protocol::{PID, VID};
use crate::transport::UsbTransport;
use crate::{FusionError, Result};
use rusb::UsbContext;
use std::sync::Arc;

/// Vendor/product pair accepted by a [`UsbDeviceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// A whitelisted device found on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// Position among the whitelisted devices, in enumeration order.
    pub index: usize,
    pub vendor_id: u16,
    pub product_id: u16,
    /// `USB\VID_xxxx&PID_xxxx\{index}`
    pub device_path: String,
    /// `b{bus}_p{port}.{port}...`, if the platform reports port numbers.
    pub port_path: Option<String>,
}

/// Explicitly constructed owner of device discovery and transport setup.
pub struct UsbDeviceManager {
    whitelist: Vec<UsbDeviceFilter>,
    config: TransportConfig,
}

impl UsbDeviceManager {
    pub fn new(whitelist: Vec<UsbDeviceFilter>) -> Self {
        Self::with_config(whitelist, TransportConfig::from_env())
    }

    pub fn with_config(whitelist: Vec<UsbDeviceFilter>, config: TransportConfig) -> Self {
        Self { whitelist, config }
    }

    /// Manager accepting only PS3Eye cameras.
    pub fn ps3eye() -> Self {
        Self::new(vec![UsbDeviceFilter {
            vendor_id: VID,
            product_id: PID,
        }])
    }

    pub fn whitelist(&self) -> &[UsbDeviceFilter] {
        &self.whitelist
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// List connected whitelisted devices.
    pub fn list_devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        Ok(self
            .whitelisted_devices()?
            .into_iter()
            .map(|(info, _)| info)
            .collect())
    }

    /// Open the device whose device path or port path equals `path`.
    pub fn open(&self, path: &str) -> Result<UsbTransport> {
        let device = self
            .whitelisted_devices()?
            .into_iter()
            .find(|(info, _)| info.device_path == path || info.port_path.as_deref() == Some(path))
            .map(|(_, device)| device)
            .ok_or_else(|| FusionError::DeviceNotFound(path.to_string()))?;
        self.open_device(device, path)
    }

    /// Open the first whitelisted device.
    pub fn open_first(&self) -> Result<UsbTransport> {
        let (info, device) = self
            .whitelisted_devices()?
            .into_iter()
            .next()
            .ok_or_else(|| FusionError::DeviceNotFound("no whitelisted USB device connected".into()))?;
        self.open_device(device, &info.device_path)
    }

    /// Open `path` and wrap it in a camera controller.
    pub fn open_camera(&self, path: &str, frame_width: u32) -> Result<Ps3EyeCamera<UsbTransport>> {
        let transport = self.open(path)?;
        Ok(Ps3EyeCamera::new(Arc::new(transport), frame_width))
    }

    fn is_whitelisted(&self, vendor_id: u16, product_id: u16) -> bool {
        self.whitelist
            .iter()
            .any(|f| f.vendor_id == vendor_id && f.product_id == product_id)
    }

    fn whitelisted_devices(&self) -> Result<Vec<(UsbDeviceInfo, rusb::Device<rusb::GlobalContext>)>> {
        let devices = rusb::GlobalContext::default().devices()?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    log::debug!("Skipping device without descriptor: {}", e);
                    continue;
                }
            };
            if !self.is_whitelisted(desc.vendor_id(), desc.product_id()) {
                continue;
            }

            let index = found.len();
            let ports = device.port_numbers().unwrap_or_default();
            let info = UsbDeviceInfo {
                index,
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                device_path: device_path(desc.vendor_id(), desc.product_id(), index),
                port_path: port_path(device.bus_number(), &ports),
            };
            found.push((info, device));
        }

        Ok(found)
    }

    fn open_device(&self, device: rusb::Device<rusb::GlobalContext>, path: &str) -> Result<UsbTransport> {
        let handle = device.open()?;

        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::warn!("Auto-detach on {} failed: {}", path, e),
        }
        if let Err(e) = handle.claim_interface(0) {
            log::error!("Failed to claim USB interface 0 on {}: {}", path, e);
            return Err(e.into());
        }

        log::info!("Opened USB device {}", path);
        UsbTransport::start(handle, self.config)
    }
}

fn device_path(vendor_id: u16, product_id: u16, index: usize) -> String {
    format!("USB\\VID_{:04X}&PID_{:04X}\\{}", vendor_id, product_id, index)
}

fn port_path(bus: u8, ports: &[u8]) -> Option<String> {
    let (first, rest) = ports.split_first()?;
    let mut path = format!("b{}_p{}", bus, first);
    for port in rest {
        path.push_str(&format!(".{}", port));
    }
    Some(path)
}
