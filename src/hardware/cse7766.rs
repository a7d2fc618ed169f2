//! # CSE7766 energy metering chip
//!
//! The chip streams a 24-byte frame roughly every 50ms over a 4800 baud UART:
//!
//! | bytes  | content                                         |
//! |--------|-------------------------------------------------|
//! | 0      | state: 0x55 ok, 0xAA uncalibrated, 0xFx flags   |
//! | 1      | check byte, always 0x5A                         |
//! | 2..5   | voltage coefficient (24-bit BE)                 |
//! | 5..8   | voltage cycle                                   |
//! | 8..11  | current coefficient                             |
//! | 11..14 | current cycle                                   |
//! | 14..17 | power coefficient                               |
//! | 17..20 | power cycle                                     |
//! | 20     | adjust: 0x40 voltage, 0x20 current, 0x10 power  |
//! | 21..23 | CF pulse counter (16-bit BE, wraps)             |
//! | 23     | checksum: low byte of the sum of bytes 2..=22   |

use byteorder::{BigEndian, ByteOrder};
use std::io::{ErrorKind, Read};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{PowerMeter, PowerReading};

pub const FRAME_LEN: usize = 24;

pub const HEADER_OK: u8 = 0x55;
const HEADER_UNCALIBRATED: u8 = 0xAA;
const CHECK_BYTE: u8 = 0x5A;

pub const ADJ_VOLTAGE: u8 = 0x40;
pub const ADJ_CURRENT: u8 = 0x20;
pub const ADJ_POWER: u8 = 0x10;

/// Status bits in a 0xFx header
const STATUS_VOLTAGE_OVERFLOW: u8 = 1 << 3;
const STATUS_CURRENT_OVERFLOW: u8 = 1 << 2;
const STATUS_POWER_OVERFLOW: u8 = 1 << 1;
const STATUS_COEFFICIENT_FAULT: u8 = 1 << 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame length {0}, expected {FRAME_LEN}")]
    Length(usize),
    #[error("invalid header {0:#04x}")]
    BadHeader(u8),
    #[error("checksum mismatch: computed {computed:#04x}, frame has {received:#04x}")]
    Checksum { computed: u8, received: u8 },
    #[error("chip reports it is not calibrated")]
    NotCalibrated,
    #[error("chip reports abnormal circuit or damage (status {0:#04x})")]
    ChipFault(u8),
}

fn is_header(byte: u8) -> bool {
    byte == HEADER_OK || byte == HEADER_UNCALIBRATED || byte & 0xF0 == 0xF0
}

fn checksum(raw: &[u8]) -> u8 {
    raw[2..23].iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn write_u24(buf: &mut [u8], value: u32) {
    BigEndian::write_u24(buf, value.min(0x00FF_FFFF));
}

/// One decoded measurement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cse7766Frame {
    pub header: u8,
    pub voltage_coef: u32,
    pub voltage_cycle: u32,
    pub current_coef: u32,
    pub current_cycle: u32,
    pub power_coef: u32,
    pub power_cycle: u32,
    pub adjust: u8,
    pub cf_pulses: u16,
}

impl Cse7766Frame {
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() != FRAME_LEN {
            return Err(FrameError::Length(raw.len()));
        }
        let header = raw[0];
        if !is_header(header) || raw[1] != CHECK_BYTE {
            return Err(FrameError::BadHeader(header));
        }
        let computed = checksum(raw);
        if computed != raw[23] {
            return Err(FrameError::Checksum {
                computed,
                received: raw[23],
            });
        }
        if header == HEADER_UNCALIBRATED {
            return Err(FrameError::NotCalibrated);
        }
        if header & 0xF0 == 0xF0
            && header & (STATUS_VOLTAGE_OVERFLOW | STATUS_CURRENT_OVERFLOW | STATUS_COEFFICIENT_FAULT)
                != 0
        {
            return Err(FrameError::ChipFault(header));
        }

        Ok(Self {
            header,
            voltage_coef: BigEndian::read_u24(&raw[2..5]),
            voltage_cycle: BigEndian::read_u24(&raw[5..8]),
            current_coef: BigEndian::read_u24(&raw[8..11]),
            current_cycle: BigEndian::read_u24(&raw[11..14]),
            power_coef: BigEndian::read_u24(&raw[14..17]),
            power_cycle: BigEndian::read_u24(&raw[17..20]),
            adjust: raw[20],
            cf_pulses: BigEndian::read_u16(&raw[21..23]),
        })
    }

    /// Serialise with a freshly computed checksum. 24-bit fields saturate.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut raw = [0u8; FRAME_LEN];
        raw[0] = self.header;
        raw[1] = CHECK_BYTE;
        write_u24(&mut raw[2..5], self.voltage_coef);
        write_u24(&mut raw[5..8], self.voltage_cycle);
        write_u24(&mut raw[8..11], self.current_coef);
        write_u24(&mut raw[11..14], self.current_cycle);
        write_u24(&mut raw[14..17], self.power_coef);
        write_u24(&mut raw[17..20], self.power_cycle);
        raw[20] = self.adjust;
        BigEndian::write_u16(&mut raw[21..23], self.cf_pulses);
        raw[23] = checksum(&raw);
        raw
    }

    fn power_cycle_overflow(&self) -> bool {
        self.header & 0xF0 == 0xF0 && self.header & STATUS_POWER_OVERFLOW != 0
    }

    pub fn voltage_v(&self) -> f64 {
        if self.adjust & ADJ_VOLTAGE == 0 || self.voltage_cycle == 0 {
            return 0.0;
        }
        self.voltage_coef as f64 / self.voltage_cycle as f64
    }

    pub fn current_a(&self) -> f64 {
        if self.adjust & ADJ_CURRENT == 0 || self.current_cycle == 0 {
            return 0.0;
        }
        self.current_coef as f64 / self.current_cycle as f64
    }

    /// Active power; zero when the chip flags no load or a cycle overflow.
    pub fn active_power_w(&self) -> f64 {
        if self.adjust & ADJ_POWER == 0 || self.power_cycle == 0 || self.power_cycle_overflow() {
            return 0.0;
        }
        self.power_coef as f64 / self.power_cycle as f64
    }

    /// Energy represented by one CF pulse (watt-seconds).
    pub fn energy_per_pulse_ws(&self) -> f64 {
        self.power_coef as f64 / 1_000_000.0
    }
}

/// Byte-stream framer. Resynchronises on the header/check byte pair.
#[derive(Debug, Default)]
pub struct Cse7766Decoder {
    buf: Vec<u8>,
}

impl Cse7766Decoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN),
        }
    }

    /// Feed one byte; returns a result whenever a full frame was collected.
    pub fn push(&mut self, byte: u8) -> Option<Result<Cse7766Frame, FrameError>> {
        match self.buf.len() {
            0 => {
                if is_header(byte) {
                    self.buf.push(byte);
                }
                None
            }
            1 => {
                if byte == CHECK_BYTE {
                    self.buf.push(byte);
                } else {
                    self.buf.clear();
                    if is_header(byte) {
                        self.buf.push(byte);
                    }
                }
                None
            }
            _ => {
                self.buf.push(byte);
                if self.buf.len() < FRAME_LEN {
                    return None;
                }
                let result = Cse7766Frame::decode(&self.buf);
                self.buf.clear();
                Some(result)
            }
        }
    }
}

/// Power meter reading a CSE7766 through a non-blocking byte source.
///
/// `port` must return `ErrorKind::WouldBlock` (or `Ok(0)`) when no bytes
/// are pending.
pub struct Cse7766Meter<R> {
    port: R,
    decoder: Cse7766Decoder,
    latest: PowerReading,
    last_cf: Option<u16>,
    energy_ws: f64,
    frames: u64,
    rejected: u64,
}

impl<R: Read + Send> Cse7766Meter<R> {
    pub fn new(port: R) -> Self {
        Self {
            port,
            decoder: Cse7766Decoder::new(),
            latest: PowerReading::default(),
            last_cf: None,
            energy_ws: 0.0,
            frames: 0,
            rejected: 0,
        }
    }

    /// Valid frames decoded since boot.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames dropped for checksum, header or chip errors.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn ingest(&mut self, frame: Cse7766Frame) {
        self.frames += 1;

        // The pulse counter is only 16 bits and wraps
        if let Some(last) = self.last_cf {
            let pulses = frame.cf_pulses.wrapping_sub(last);
            self.energy_ws += pulses as f64 * frame.energy_per_pulse_ws();
        }
        self.last_cf = Some(frame.cf_pulses);

        let voltage_v = frame.voltage_v();
        let current_a = frame.current_a();
        let active_power_w = frame.active_power_w();
        let apparent_power_va = voltage_v * current_a;
        let (reactive_power_var, power_factor) = if apparent_power_va > 0.0 {
            let active = active_power_w.min(apparent_power_va);
            (
                (apparent_power_va.powi(2) - active.powi(2)).sqrt(),
                active / apparent_power_va,
            )
        } else {
            (0.0, if active_power_w > 0.0 { 1.0 } else { 0.0 })
        };

        self.latest = PowerReading {
            active_power_w,
            voltage_v,
            current_a,
            apparent_power_va,
            reactive_power_var,
            power_factor,
            energy_ws: self.energy_ws,
        };
    }
}

impl<R: Read + Send> PowerMeter for Cse7766Meter<R> {
    fn poll(&mut self) {
        let mut chunk = [0u8; 64];
        loop {
            let n = match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "meter UART read failed");
                    break;
                }
            };
            for &byte in &chunk[..n] {
                match self.decoder.push(byte) {
                    Some(Ok(frame)) => self.ingest(frame),
                    Some(Err(e)) => {
                        self.rejected += 1;
                        debug!(error = %e, "meter frame rejected");
                    }
                    None => {}
                }
            }
        }
    }

    fn latest(&self) -> PowerReading {
        self.latest
    }
}
