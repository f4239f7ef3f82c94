//! Register chains: an ordered list of [`RegisterStep`]s advanced one
//! transfer at a time.

use crate::protocol::{RegisterStep, SccbStatus, OV534_REG_STATUS, SCCB_MAX_STATUS_POLLS};
use crate::transport::{ControlRequest, ControlTransport, TransferResult};
use crate::types::UsbResultCode;
use std::sync::{Arc, Mutex, MutexGuard};

/// Why a chain stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFailureKind {
    /// The transport reported a failed transfer.
    Transfer(UsbResultCode),
    /// The SCCB status poll ended on a non-idle byte (error, unknown, or
    /// still busy after the last attempt).
    SccbStatus(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainFailure {
    /// Index of the step that failed.
    pub step: usize,
    pub kind: ChainFailureKind,
}

impl ChainFailure {
    /// Result code reported to completion callbacks.
    pub fn result_code(&self) -> UsbResultCode {
        match self.kind {
            ChainFailureKind::Transfer(code) => code,
            ChainFailureKind::SccbStatus(_) => UsbResultCode::GeneralError,
        }
    }
}

impl std::fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ChainFailureKind::Transfer(code) => write!(f, "step {}: transfer {:?}", self.step, code),
            ChainFailureKind::SccbStatus(status) => {
                write!(f, "step {}: SCCB status 0x{:02x}", self.step, status)
            }
        }
    }
}

/// Final byte read by the chain (zero if it never read), or the failure.
pub type ChainOutcome = std::result::Result<u8, ChainFailure>;

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainProgress {
    Submit(ControlRequest),
    Finished(ChainOutcome),
}

/// State machine over a list of register steps.
#[derive(Debug, Clone)]
pub struct RegisterChain {
    steps: Vec<RegisterStep>,
    index: usize,
    poll_attempts: u8,
    last_read: u8,
    last_status: u8,
}

impl RegisterChain {
    pub fn new(steps: Vec<RegisterStep>) -> Self {
        Self {
            steps,
            index: 0,
            poll_attempts: 0,
            last_read: 0,
            last_status: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_status(&self) -> u8 {
        self.last_status
    }

    /// First request, or an immediate finish for an empty chain.
    pub fn start(&mut self) -> ChainProgress {
        self.index = 0;
        self.poll_attempts = 0;
        self.current_request()
    }

    /// Feed the result of the request last returned by `start`/`complete`.
    pub fn complete(&mut self, result: TransferResult) -> ChainProgress {
        if !result.code.is_success() {
            return self.fail(ChainFailureKind::Transfer(result.code));
        }

        let step = match self.steps.get(self.index) {
            Some(step) => *step,
            None => return ChainProgress::Finished(Ok(self.last_read)),
        };

        match step {
            RegisterStep::Write { .. } => self.advance(),
            RegisterStep::Read { .. } => {
                self.last_read = result.data;
                self.advance()
            }
            RegisterStep::PollStatus => self.poll_result(result.data),
        }
    }

    fn poll_result(&mut self, status: u8) -> ChainProgress {
        self.last_status = status;
        self.poll_attempts += 1;
        match SccbStatus::from_byte(status) {
            SccbStatus::Idle => self.advance(),
            SccbStatus::Busy if self.poll_attempts < SCCB_MAX_STATUS_POLLS => {
                ChainProgress::Submit(ControlRequest::read(OV534_REG_STATUS))
            }
            SccbStatus::Busy => {
                log::debug!("SCCB still busy after {} polls", self.poll_attempts);
                self.fail(ChainFailureKind::SccbStatus(status))
            }
            SccbStatus::Error => self.fail(ChainFailureKind::SccbStatus(status)),
            SccbStatus::Unknown(byte) => {
                log::warn!("Unknown SCCB status 0x{:02x}", byte);
                self.fail(ChainFailureKind::SccbStatus(status))
            }
        }
    }

    fn advance(&mut self) -> ChainProgress {
        self.index += 1;
        self.poll_attempts = 0;
        self.current_request()
    }

    fn fail(&mut self, kind: ChainFailureKind) -> ChainProgress {
        ChainProgress::Finished(Err(ChainFailure {
            step: self.index,
            kind,
        }))
    }

    fn current_request(&self) -> ChainProgress {
        let request = match self.steps.get(self.index) {
            Some(RegisterStep::Write { register, value }) => {
                ControlRequest::write(*register, value.resolve(self.last_read))
            }
            Some(RegisterStep::Read { register }) => ControlRequest::read(*register),
            Some(RegisterStep::PollStatus) => ControlRequest::read(OV534_REG_STATUS),
            None => return ChainProgress::Finished(Ok(self.last_read)),
        };
        ChainProgress::Submit(request)
    }
}

pub type ChainCallback = Box<dyn FnOnce(ChainOutcome) + Send>;

/// Drive `chain` to completion over `transport`, then call `on_done`.
///
/// Each step is submitted from the previous step's completion, so at most
/// one transfer of this chain is in flight. Completions delivered from
/// inside `submit` are consumed by a loop, so stack depth does not grow with
/// chain length.
pub fn run_chain<T: ControlTransport + ?Sized>(
    transport: Arc<T>,
    mut chain: RegisterChain,
    on_done: ChainCallback,
) {
    let progress = chain.start();
    drive(transport, chain, progress, on_done);
}

struct Suspended<T: ?Sized> {
    transport: Arc<T>,
    chain: RegisterChain,
    on_done: ChainCallback,
}

/// Hand-off between a `submit` call and the completion it triggers.
enum Handoff<T: ?Sized> {
    /// `submit` has not returned yet.
    Submitting,
    /// Completed before `submit` returned.
    Completed(TransferResult),
    /// `submit` returned first; the completion resumes the chain.
    Parked(Suspended<T>),
    Resumed,
}

fn drive<T: ControlTransport + ?Sized>(
    transport: Arc<T>,
    mut chain: RegisterChain,
    mut progress: ChainProgress,
    on_done: ChainCallback,
) {
    loop {
        let request = match progress {
            ChainProgress::Finished(outcome) => return on_done(outcome),
            ChainProgress::Submit(request) => request,
        };

        let handoff = Arc::new(Mutex::new(Handoff::<T>::Submitting));
        let completion = handoff.clone();
        transport.submit(
            request,
            Box::new(move |result| {
                let parked = {
                    let mut slot = lock(&completion);
                    match std::mem::replace(&mut *slot, Handoff::Resumed) {
                        Handoff::Parked(suspended) => suspended,
                        _ => {
                            *slot = Handoff::Completed(result);
                            return;
                        }
                    }
                };
                let Suspended {
                    transport,
                    mut chain,
                    on_done,
                } = parked;
                let progress = chain.complete(result);
                drive(transport, chain, progress, on_done);
            }),
        );

        let mut slot = lock(&handoff);
        match std::mem::replace(&mut *slot, Handoff::Resumed) {
            Handoff::Completed(result) => {
                drop(slot);
                progress = chain.complete(result);
            }
            _ => {
                *slot = Handoff::Parked(Suspended {
                    transport,
                    chain,
                    on_done,
                });
                return;
            }
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
