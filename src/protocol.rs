//! OV534 bridge and SCCB (sensor register) protocol.
//!
//! Every camera setting is expressed as a list of [`RegisterStep`]s. The
//! steps are plain data; [`crate::chain::RegisterChain`] runs them.

// -- USB identifiers --
pub const VID: u16 = 0x1415;
pub const PID: u16 = 0x2000;

// -- Control transfer --
pub const CONTROL_REQUEST: u8 = 0x01;
pub const CONTROL_VALUE: u16 = 0x0000;

// -- OV534 bridge registers --
pub const OV534_REG_ADDRESS: u16 = 0xf1;
pub const OV534_REG_SUBADDR: u16 = 0xf2;
pub const OV534_REG_WRITE: u16 = 0xf3;
pub const OV534_REG_READ: u16 = 0xf4;
pub const OV534_REG_OPERATION: u16 = 0xf5;
pub const OV534_REG_STATUS: u16 = 0xf6;

// -- OV534 SCCB operations --
pub const OV534_OP_WRITE_3: u8 = 0x37;
pub const OV534_OP_WRITE_2: u8 = 0x33;
pub const OV534_OP_READ_2: u8 = 0xf9;

// -- SCCB status poll --
pub const SCCB_STATUS_IDLE: u8 = 0x00;
pub const SCCB_STATUS_BUSY: u8 = 0x03;
pub const SCCB_STATUS_ERROR: u8 = 0x04;
pub const SCCB_MAX_STATUS_POLLS: u8 = 5;

// -- OV534 LED control bits --
pub const OV534_REG_LED_DIRECTION: u16 = 0x21;
pub const OV534_REG_LED_OUTPUT: u16 = 0x23;
pub const OV534_LED_BIT: u8 = 0x80;
pub const OV534_REG_FRAME_RATE: u16 = 0xe5;

// -- Sensor (SCCB) registers --
pub const SENSOR_REG_GAIN: u8 = 0x00;
pub const SENSOR_REG_HUE: u8 = 0x01;
pub const SENSOR_REG_EXPOSURE_HIGH: u8 = 0x08;
pub const SENSOR_REG_FLIP: u8 = 0x0c;
pub const SENSOR_REG_FRAME_RATE_0D: u8 = 0x0d;
pub const SENSOR_REG_EXPOSURE_LOW: u8 = 0x10;
pub const SENSOR_REG_FRAME_RATE_11: u8 = 0x11;
pub const SENSOR_REG_AUTO_CONTROL: u8 = 0x13;
pub const SENSOR_REG_BLUE_BALANCE: u8 = 0x42;
pub const SENSOR_REG_RED_BALANCE: u8 = 0x43;
pub const SENSOR_REG_GREEN_BALANCE: u8 = 0x44;
pub const SENSOR_REG_AWB: u8 = 0x63;
pub const SENSOR_REG_AUTO_EXTRA: u8 = 0x64;
pub const SENSOR_REG_SHARPNESS_2: u8 = 0x8e;
pub const SENSOR_REG_SHARPNESS_1: u8 = 0x91;
pub const SENSOR_REG_BRIGHTNESS: u8 = 0x9b;
pub const SENSOR_REG_CONTRAST: u8 = 0x9c;
/// A sequence entry with this register means "read the value register, then
/// write 0x00 here".
pub const SENSOR_REG_SEQUENCE_RESET: u8 = 0xff;

const FLIP_MIRROR_OFF: u8 = 0x40;
const FLIP_VERTICAL_OFF: u8 = 0x80;

/// Interpretation of an OV534 status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SccbStatus {
    Idle,
    Busy,
    Error,
    Unknown(u8),
}

impl SccbStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            SCCB_STATUS_IDLE => SccbStatus::Idle,
            SCCB_STATUS_BUSY => SccbStatus::Busy,
            SCCB_STATUS_ERROR => SccbStatus::Error,
            other => SccbStatus::Unknown(other),
        }
    }
}

/// Where a register write gets its byte from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Literal(u8),
    /// `(last_read & and) | or`, using the chain's most recent read.
    FromLastRead { and: u8, or: u8 },
}

impl ValueSource {
    pub fn resolve(self, last_read: u8) -> u8 {
        match self {
            ValueSource::Literal(value) => value,
            ValueSource::FromLastRead { and, or } => (last_read & and) | or,
        }
    }
}

/// One primitive operation against the OV534 bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStep {
    /// Write one byte to a bridge register.
    Write { register: u16, value: ValueSource },
    /// Read one byte from a bridge register; the chain remembers it.
    Read { register: u16 },
    /// Poll the SCCB status register until idle (at most 5 reads).
    PollStatus,
}

pub fn ov534_write(register: u16, value: u8) -> Vec<RegisterStep> {
    vec![RegisterStep::Write {
        register,
        value: ValueSource::Literal(value),
    }]
}

pub fn ov534_read(register: u16) -> Vec<RegisterStep> {
    vec![RegisterStep::Read { register }]
}

/// Bridge register writes in order.
pub fn ov534_write_sequence(sequence: &[(u16, u8)]) -> Vec<RegisterStep> {
    sequence
        .iter()
        .flat_map(|&(register, value)| ov534_write(register, value))
        .collect()
}

/// Sensor register write: sub-address, value, trigger, status poll.
pub fn sccb_write(register: u8, value: ValueSource) -> Vec<RegisterStep> {
    vec![
        RegisterStep::Write {
            register: OV534_REG_SUBADDR,
            value: ValueSource::Literal(register),
        },
        RegisterStep::Write {
            register: OV534_REG_WRITE,
            value,
        },
        RegisterStep::Write {
            register: OV534_REG_OPERATION,
            value: ValueSource::Literal(OV534_OP_WRITE_3),
        },
        RegisterStep::PollStatus,
    ]
}

/// Sensor register read. The chain's last read byte is the register value
/// once these steps complete.
pub fn sccb_read(register: u8) -> Vec<RegisterStep> {
    vec![
        RegisterStep::Write {
            register: OV534_REG_SUBADDR,
            value: ValueSource::Literal(register),
        },
        RegisterStep::Write {
            register: OV534_REG_OPERATION,
            value: ValueSource::Literal(OV534_OP_WRITE_2),
        },
        RegisterStep::PollStatus,
        RegisterStep::Write {
            register: OV534_REG_OPERATION,
            value: ValueSource::Literal(OV534_OP_READ_2),
        },
        RegisterStep::PollStatus,
        RegisterStep::Read {
            register: OV534_REG_READ,
        },
    ]
}

/// Read-modify-write of a sensor register.
pub fn sccb_update(register: u8, and: u8, or: u8) -> Vec<RegisterStep> {
    let mut steps = sccb_read(register);
    steps.extend(sccb_write(register, ValueSource::FromLastRead { and, or }));
    steps
}

/// Sensor register writes in order; see [`SENSOR_REG_SEQUENCE_RESET`].
pub fn sccb_write_sequence(sequence: &[(u8, u8)]) -> Vec<RegisterStep> {
    let mut steps = Vec::new();
    for &(register, value) in sequence {
        if register == SENSOR_REG_SEQUENCE_RESET {
            steps.extend(sccb_read(value));
            steps.extend(sccb_write(SENSOR_REG_SEQUENCE_RESET, ValueSource::Literal(0x00)));
        } else {
            steps.extend(sccb_write(register, ValueSource::Literal(value)));
        }
    }
    steps
}

/// Sensor gain byte for a 0..=63 style gain setting.
pub fn gain_register_value(gain: u8) -> u8 {
    let low = gain & 0x0f;
    match gain & 0x30 {
        0x00 => low,
        0x10 => low | 0x30,
        0x20 => low | 0x70,
        _ => low | 0xf0,
    }
}

pub fn gain_steps(gain: u8) -> Vec<RegisterStep> {
    sccb_write(SENSOR_REG_GAIN, ValueSource::Literal(gain_register_value(gain)))
}

pub fn exposure_steps(exposure: u8) -> Vec<RegisterStep> {
    let mut steps = sccb_write(SENSOR_REG_EXPOSURE_HIGH, ValueSource::Literal(exposure >> 7));
    steps.extend(sccb_write(SENSOR_REG_EXPOSURE_LOW, ValueSource::Literal(exposure << 1)));
    steps
}

/// Automatic gain/exposure/white balance on or off. Turning it off restores
/// the manual `gain` and `exposure`.
pub fn autogain_steps(enabled: bool, gain: u8, exposure: u8) -> Vec<RegisterStep> {
    if enabled {
        let mut steps = sccb_write(SENSOR_REG_AUTO_CONTROL, ValueSource::Literal(0xf7));
        steps.extend(sccb_update(SENSOR_REG_AUTO_EXTRA, 0xff, 0x03));
        steps
    } else {
        let mut steps = sccb_write(SENSOR_REG_AUTO_CONTROL, ValueSource::Literal(0xf0));
        steps.extend(sccb_update(SENSOR_REG_AUTO_EXTRA, 0xfc, 0x00));
        steps.extend(gain_steps(gain));
        steps.extend(exposure_steps(exposure));
        steps
    }
}

pub fn auto_white_balance_steps(enabled: bool) -> Vec<RegisterStep> {
    let value = if enabled { 0xe0 } else { 0xaa };
    sccb_write(SENSOR_REG_AWB, ValueSource::Literal(value))
}

pub fn sharpness_steps(sharpness: u8) -> Vec<RegisterStep> {
    let mut steps = sccb_write(SENSOR_REG_SHARPNESS_1, ValueSource::Literal(sharpness));
    steps.extend(sccb_write(SENSOR_REG_SHARPNESS_2, ValueSource::Literal(sharpness)));
    steps
}

/// Single-register sensor setting (contrast, brightness, hue, balances).
pub fn sensor_value_steps(register: u8, value: u8) -> Vec<RegisterStep> {
    sccb_write(register, ValueSource::Literal(value))
}

/// Mirror/flip bits live in the top of register 0x0c and are active low.
pub fn flip_steps(horizontal: bool, vertical: bool) -> Vec<RegisterStep> {
    let mut or = 0;
    if !horizontal {
        or |= FLIP_MIRROR_OFF;
    }
    if !vertical {
        or |= FLIP_VERTICAL_OFF;
    }
    sccb_update(SENSOR_REG_FLIP, !(FLIP_MIRROR_OFF | FLIP_VERTICAL_OFF), or)
}

/// Status LED, driven by bit 7 of two bridge registers.
pub fn led_steps(on: bool) -> Vec<RegisterStep> {
    let mut steps = ov534_read(OV534_REG_LED_DIRECTION);
    steps.push(RegisterStep::Write {
        register: OV534_REG_LED_DIRECTION,
        value: ValueSource::FromLastRead {
            and: 0xff,
            or: OV534_LED_BIT,
        },
    });
    steps.extend(ov534_read(OV534_REG_LED_OUTPUT));
    steps.push(RegisterStep::Write {
        register: OV534_REG_LED_OUTPUT,
        value: if on {
            ValueSource::FromLastRead {
                and: 0xff,
                or: OV534_LED_BIT,
            }
        } else {
            ValueSource::FromLastRead {
                and: !OV534_LED_BIT,
                or: 0x00,
            }
        },
    });
    if !on {
        steps.extend(ov534_read(OV534_REG_LED_DIRECTION));
        steps.push(RegisterStep::Write {
            register: OV534_REG_LED_DIRECTION,
            value: ValueSource::FromLastRead {
                and: !OV534_LED_BIT,
                or: 0x00,
            },
        });
    }
    steps
}

/// Clock settings for one supported frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub fps: u8,
    pub r11: u8,
    pub r0d: u8,
    pub re5: u8,
}

const fn rate(fps: u8, r11: u8, r0d: u8, re5: u8) -> FrameRate {
    FrameRate { fps, r11, r0d, re5 }
}

/// 640x480, fastest first.
pub const FRAME_RATES_VGA: [FrameRate; 5] = [
    rate(60, 0x01, 0xc1, 0x04),
    rate(50, 0x01, 0x41, 0x02),
    rate(40, 0x02, 0xc1, 0x04),
    rate(30, 0x04, 0x81, 0x02),
    rate(15, 0x03, 0x41, 0x04),
];

/// 320x240, fastest first. 205 fps streams partly corrupt video.
pub const FRAME_RATES_QVGA: [FrameRate; 11] = [
    rate(205, 0x01, 0xc1, 0x02),
    rate(187, 0x01, 0x81, 0x02),
    rate(150, 0x01, 0xc1, 0x04),
    rate(137, 0x02, 0xc1, 0x02),
    rate(125, 0x02, 0x81, 0x02),
    rate(100, 0x02, 0xc1, 0x04),
    rate(75, 0x03, 0xc1, 0x04),
    rate(60, 0x04, 0xc1, 0x04),
    rate(50, 0x02, 0x41, 0x04),
    rate(37, 0x03, 0x41, 0x04),
    rate(30, 0x04, 0x41, 0x04),
];

/// Fastest supported rate not above `fps`, or the slowest one.
pub fn select_frame_rate(frame_width: u32, fps: u8) -> FrameRate {
    let table: &[FrameRate] = if frame_width == 640 {
        &FRAME_RATES_VGA
    } else {
        &FRAME_RATES_QVGA
    };
    let slowest = table[table.len() - 1];
    table.iter().copied().find(|r| fps >= r.fps).unwrap_or(slowest)
}

pub fn frame_rate_steps(rate: &FrameRate) -> Vec<RegisterStep> {
    let mut steps = sccb_write(SENSOR_REG_FRAME_RATE_11, ValueSource::Literal(rate.r11));
    steps.extend(sccb_write(SENSOR_REG_FRAME_RATE_0D, ValueSource::Literal(rate.r0d)));
    steps.extend(ov534_write(OV534_REG_FRAME_RATE, rate.re5));
    steps
}
