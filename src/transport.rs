use crate::config::TransportConfig;
use crate::protocol::{CONTROL_REQUEST, CONTROL_VALUE};
use crate::types::UsbResultCode;
use crate::{FusionError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Direction of a one-byte vendor control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Read,
    Write,
}

/// One-byte vendor control transfer against an OV534 bridge register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub direction: TransferDirection,
    pub register: u16,
    /// Byte to write. Ignored for reads.
    pub value: u8,
}

impl ControlRequest {
    pub fn write(register: u16, value: u8) -> Self {
        Self {
            direction: TransferDirection::Write,
            register,
            value,
        }
    }

    pub fn read(register: u16) -> Self {
        Self {
            direction: TransferDirection::Read,
            register,
            value: 0,
        }
    }
}

/// Completion of a [`ControlRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    pub code: UsbResultCode,
    /// Byte read from the device. Zero for writes and failures.
    pub data: u8,
}

impl TransferResult {
    pub fn completed(data: u8) -> Self {
        Self {
            code: UsbResultCode::Completed,
            data,
        }
    }

    pub fn failed(code: UsbResultCode) -> Self {
        Self { code, data: 0 }
    }
}

pub type TransferCallback = Box<dyn FnOnce(TransferResult) + Send>;

/// Asynchronous control-transfer backend.
///
/// `submit` must invoke `on_complete` exactly once, either synchronously or
/// later from another thread. Implementations must not hold internal locks
/// while calling it.
pub trait ControlTransport: Send + Sync + 'static {
    fn submit(&self, request: ControlRequest, on_complete: TransferCallback);

    /// Submit `request` and wait for its completion.
    ///
    /// Must not be called from a completion callback of the same transport.
    fn transfer_blocking(&self, request: ControlRequest) -> Result<TransferResult> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.submit(
            request,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        );
        receiver.recv().map_err(|_| FusionError::TransportStopped)
    }
}

struct Job {
    request: ControlRequest,
    on_complete: TransferCallback,
}

/// Control transfers over a libusb handle, executed on a dedicated worker
/// thread. Completion callbacks run on that thread.
pub struct UsbTransport {
    sender: Option<Sender<Job>>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl UsbTransport {
    pub(crate) fn start(handle: DeviceHandle<GlobalContext>, config: TransportConfig) -> Result<UsbTransport> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("motionfusion-usb".into())
            .spawn(move || {
                transfer_worker_loop(handle, config, receiver, stop_clone);
            })
            .map_err(|e| FusionError::WorkerSpawn(e.to_string()))?;

        Ok(UsbTransport {
            sender: Some(sender),
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Check if the worker is still accepting transfers.
    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Stop the worker and wait for it to finish. Queued transfers complete
    /// as canceled.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        drop(self.sender.take());
        if let Some(thread) = self.thread.take() {
            join_worker(thread);
        }
    }
}

/// Join `thread` unless it is the calling thread, which happens when a
/// completion callback releases the last reference to the transport. The
/// worker then exits on its own once the current callback returns.
///
/// Returns true if the thread was joined.
fn join_worker(thread: std::thread::JoinHandle<()>) -> bool {
    if thread.thread().id() == std::thread::current().id() {
        log::debug!("USB transport released on its worker thread, detaching");
        return false;
    }
    if thread.join().is_err() {
        log::warn!("USB transfer worker panicked");
    }
    true
}

impl ControlTransport for UsbTransport {
    fn submit(&self, request: ControlRequest, on_complete: TransferCallback) {
        let job = Job { request, on_complete };
        let rejected = match &self.sender {
            Some(sender) if self.is_active() => match sender.send(job) {
                Ok(()) => return,
                Err(crossbeam_channel::SendError(job)) => job,
            },
            _ => job,
        };
        log::warn!("USB transport stopped, rejecting transfer to 0x{:02x}", request.register);
        (rejected.on_complete)(TransferResult::failed(UsbResultCode::DeviceNotOpen));
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transfer_worker_loop(
    handle: DeviceHandle<GlobalContext>,
    config: TransportConfig,
    receiver: Receiver<Job>,
    stop_flag: Arc<AtomicBool>,
) {
    log::info!("USB transfer worker started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("USB transfer worker stopping (stop flag set)");
            break;
        }

        // 100ms so the stop flag is checked periodically
        let job = match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("USB transfer channel disconnected, stopping worker");
                break;
            }
        };

        let result = execute_control(&handle, &job.request, &config);
        (job.on_complete)(result);
    }

    for job in receiver.try_iter() {
        (job.on_complete)(TransferResult::failed(UsbResultCode::Canceled));
    }
}

fn execute_control(
    handle: &DeviceHandle<GlobalContext>,
    request: &ControlRequest,
    config: &TransportConfig,
) -> TransferResult {
    let result = match request.direction {
        TransferDirection::Write => handle
            .write_control(
                rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
                CONTROL_REQUEST,
                CONTROL_VALUE,
                request.register,
                &[request.value],
                config.timeout,
            )
            .map(|len| (len, 0u8)),
        TransferDirection::Read => {
            let mut buf = [0u8; 1];
            handle
                .read_control(
                    rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device),
                    CONTROL_REQUEST,
                    CONTROL_VALUE,
                    request.register,
                    &mut buf,
                    config.timeout,
                )
                .map(|len| (len, buf[0]))
        }
    };

    match result {
        Ok((1, data)) => {
            if config.trace_transfers {
                log::trace!(
                    "{:?} reg 0x{:02x} value 0x{:02x} data 0x{:02x}",
                    request.direction,
                    request.register,
                    request.value,
                    data
                );
            }
            TransferResult::completed(data)
        }
        Ok((len, _)) => {
            log::warn!(
                "Short control transfer on reg 0x{:02x}: {} bytes",
                request.register,
                len
            );
            TransferResult::failed(UsbResultCode::GeneralError)
        }
        Err(e) => {
            log::warn!("Control transfer on reg 0x{:02x} failed: {}", request.register, e);
            TransferResult::failed(UsbResultCode::from(&e))
        }
    }
}
