//! Control-board frame codec.
//!
//! The analog control board reports one fixed 18-byte frame per control
//! cycle:
//!
//! ```text
//! ┌────────┬───────┬─────────┬─────────┬─────────┬─────────┬─────────┬──────────┐
//! │ header │ flags │ brew hi │ brew lo │ svc hi  │ svc lo  │ level   │ checksum │
//! │ 0x81   │ 1 B   │ 3 B     │ 3 B     │ 3 B     │ 3 B     │ 3 B     │ seed 0x01│
//! └────────┴───────┴─────────┴─────────┴─────────┴─────────┴─────────┴──────────┘
//! ```
//!
//! Each 3-byte "triplet" carries a 24-bit big-endian sensor word. The
//! byte order is a fixed wire convention shared with the board firmware;
//! it is not free to change.
//!
//! Temperatures come out of an ADC reading a sense resistor in series
//! with an NTC thermistor; conversion goes ADC code → resistance
//! (rational-polynomial curve fitted to the board's divider) → °C (Beta
//! equation). All curve math is done in double precision and truncated
//! to `f32` at the end.

use crate::checksum::{CONTROL_BOARD_SEED, packet_checksum};

pub const PACKET_LEN: usize = 18;

/// Frame header byte.
const HEADER: u8 = 0x81;

/// Flag bits with defined meaning; anything in the complement mask 0xBD
/// is unexpected.
const FLAG_BREW_SWITCH: u8 = 0x02;
const FLAG_WATER_TANK_EMPTY: u8 = 0x40;
const FLAG_RESERVED_MASK: u8 = 0xBD;

/// Both boiler probes share one curve.
const NTC_R25_OHM: f64 = 50_000.0;
const NTC_BETA: f64 = 4018.0;

/// Service-boiler level probe reads above this raw value when the water
/// is below the fill line.
const LEVEL_LOW_THRESHOLD: u32 = 256;

/// Safety ceilings checked during validation.
const BREW_OVERTEMP_C: f32 = 140.0;
const SERVICE_OVERTEMP_C: f32 = 150.0;

// Byte offsets of the triplet fields.
const OFF_BREW_HIGH_GAIN: usize = 2;
const OFF_BREW_LOW_GAIN: usize = 5;
const OFF_SERVICE_HIGH_GAIN: usize = 8;
const OFF_SERVICE_LOW_GAIN: usize = 11;
const OFF_SERVICE_LEVEL: usize = 14;

// ── Validation faults ─────────────────────────────────────────

/// Validation fault bits; accumulated into a bitmask so one frame can
/// carry several faults at once. Zero means valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlBoardFault {
    InvalidHeader = 1 << 1,
    InvalidChecksum = 1 << 2,
    UnexpectedFlags = 1 << 3,
    BrewBoilerOvertemp = 1 << 4,
    ServiceBoilerOvertemp = 1 << 5,
}

impl ControlBoardFault {
    pub const fn mask(self) -> u16 {
        self as u16
    }
}

// ── Raw packet ────────────────────────────────────────────────

/// One 18-byte frame as received off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlBoardRawPacket {
    pub bytes: [u8; PACKET_LEN],
}

impl ControlBoardRawPacket {
    pub fn from_bytes(bytes: [u8; PACKET_LEN]) -> Self {
        Self { bytes }
    }

    pub fn header(&self) -> u8 {
        self.bytes[0]
    }

    pub fn flags(&self) -> u8 {
        self.bytes[1]
    }

    pub fn stored_checksum(&self) -> u8 {
        self.bytes[PACKET_LEN - 1]
    }

    /// Checksum recomputed over bytes [1, len-2].
    pub fn computed_checksum(&self) -> u8 {
        packet_checksum(&self.bytes[1..PACKET_LEN - 1], CONTROL_BOARD_SEED)
    }

    pub fn brew_high_gain(&self) -> u32 {
        self.triplet(OFF_BREW_HIGH_GAIN)
    }

    pub fn brew_low_gain(&self) -> u32 {
        self.triplet(OFF_BREW_LOW_GAIN)
    }

    pub fn service_high_gain(&self) -> u32 {
        self.triplet(OFF_SERVICE_HIGH_GAIN)
    }

    pub fn service_low_gain(&self) -> u32 {
        self.triplet(OFF_SERVICE_LOW_GAIN)
    }

    pub fn service_level(&self) -> u32 {
        self.triplet(OFF_SERVICE_LEVEL)
    }

    fn triplet(&self, off: usize) -> u32 {
        triplet_to_u32([self.bytes[off], self.bytes[off + 1], self.bytes[off + 2]])
    }

    fn set_triplet(&mut self, off: usize, value: u32) {
        let b = u32_to_triplet(value);
        self.bytes[off..off + 3].copy_from_slice(&b);
    }
}

/// Decoded view of one frame. Derived fresh every cycle, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlBoardParsedPacket {
    pub brew_boiler_temperature: f32,
    pub service_boiler_temperature: f32,
    pub brew_switch: bool,
    pub water_tank_empty: bool,
    pub service_boiler_low: bool,
}

// ── Triplet helpers ───────────────────────────────────────────

/// 24-bit big-endian sensor word. Fixed wire convention.
pub fn triplet_to_u32(b: [u8; 3]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

pub fn u32_to_triplet(v: u32) -> [u8; 3] {
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

// ── Physical-unit conversion ──────────────────────────────────

fn polynomial4(a: f64, b: f64, c: f64, d: f64, x: f64) -> f64 {
    a * x * x * x + b * x * x + c * x + d
}

/// High-gain ADC code → sense resistance (Ω), from the fitted rational
/// curve for the board's divider.
fn high_gain_adc_to_ohm(adc: f64) -> f64 {
    7181.23 * (-(adc - 1018.15) / (adc - 1.56789)).powf(8000.0 / 8043.0)
}

/// Inverse of [`high_gain_adc_to_ohm`], used when synthesizing frames.
fn ohm_to_high_gain_adc(ohm: f64) -> f64 {
    1.567889 + (1018.146 - 1.567889) / (1.0 + (ohm / 7181.235).powf(1.005375))
}

/// NTC Beta equation, referenced to 25 °C.
fn ntc_ohm_to_celsius(ohm: f64, r25: f64, beta: f64) -> f64 {
    1.0 / ((ohm / r25).ln() / beta + 1.0 / 298.15) - 273.15
}

fn celsius_to_ntc_ohm(celsius: f64, r25: f64, beta: f64) -> f64 {
    let kelvin = celsius + 273.15;
    r25 * (beta / kelvin - beta / 298.15).exp()
}

/// Low-gain channel uses a direct cubic fit (°C → ADC code); only the
/// synthesis direction is needed, the parser reads the high-gain channel.
fn celsius_to_low_gain_adc(celsius: f64) -> f64 {
    polynomial4(1.94759e-06, -0.000294428, 1.812604664, 31.49048711, celsius)
}

fn adc_to_celsius(adc: u32) -> f32 {
    ntc_ohm_to_celsius(high_gain_adc_to_ohm(f64::from(adc)), NTC_R25_OHM, NTC_BETA) as f32
}

// ── Codec operations ──────────────────────────────────────────

/// Validate a raw frame. Returns a bitmask of [`ControlBoardFault`]s;
/// zero means valid. Several bits may be set at once.
pub fn validate(packet: &ControlBoardRawPacket) -> u16 {
    let mut error = 0u16;

    if packet.header() != HEADER {
        error |= ControlBoardFault::InvalidHeader.mask();
    }

    if packet.computed_checksum() != packet.stored_checksum() {
        error |= ControlBoardFault::InvalidChecksum.mask();
    }

    if packet.flags() & FLAG_RESERVED_MASK != 0 {
        error |= ControlBoardFault::UnexpectedFlags.mask();
    }

    if adc_to_celsius(packet.brew_high_gain()) > BREW_OVERTEMP_C {
        error |= ControlBoardFault::BrewBoilerOvertemp.mask();
    }

    if adc_to_celsius(packet.service_high_gain()) > SERVICE_OVERTEMP_C {
        error |= ControlBoardFault::ServiceBoilerOvertemp.mask();
    }

    error
}

/// Decode a raw frame into physical units.
pub fn parse(raw: &ControlBoardRawPacket) -> ControlBoardParsedPacket {
    ControlBoardParsedPacket {
        brew_boiler_temperature: adc_to_celsius(raw.brew_high_gain()),
        service_boiler_temperature: adc_to_celsius(raw.service_high_gain()),
        brew_switch: raw.flags() & FLAG_BREW_SWITCH != 0,
        water_tank_empty: raw.flags() & FLAG_WATER_TANK_EMPTY != 0,
        service_boiler_low: raw.service_level() > LEVEL_LOW_THRESHOLD,
    }
}

/// Encode a parsed packet back into a raw frame (header, flags and
/// checksum recomputed). Used to synthesize frames for the simulator and
/// tests; the real board is the producer in the field.
pub fn unparse(parsed: &ControlBoardParsedPacket) -> ControlBoardRawPacket {
    let mut raw = ControlBoardRawPacket::default();
    raw.bytes[0] = HEADER;

    let mut flags = 0u8;
    if parsed.brew_switch {
        flags |= FLAG_BREW_SWITCH;
    }
    if parsed.water_tank_empty {
        flags |= FLAG_WATER_TANK_EMPTY;
    }
    raw.bytes[1] = flags;

    let brew_c = f64::from(parsed.brew_boiler_temperature);
    let service_c = f64::from(parsed.service_boiler_temperature);

    let brew_adc =
        ohm_to_high_gain_adc(celsius_to_ntc_ohm(brew_c, NTC_R25_OHM, NTC_BETA)).round() as u32;
    let service_adc =
        ohm_to_high_gain_adc(celsius_to_ntc_ohm(service_c, NTC_R25_OHM, NTC_BETA)).round() as u32;

    raw.set_triplet(OFF_BREW_HIGH_GAIN, brew_adc);
    raw.set_triplet(OFF_BREW_LOW_GAIN, celsius_to_low_gain_adc(brew_c).round() as u32);
    raw.set_triplet(OFF_SERVICE_HIGH_GAIN, service_adc);
    raw.set_triplet(OFF_SERVICE_LOW_GAIN, celsius_to_low_gain_adc(service_c).round() as u32);
    raw.set_triplet(
        OFF_SERVICE_LEVEL,
        if parsed.service_boiler_low { 650 } else { 90 },
    );

    raw.bytes[PACKET_LEN - 1] = raw.computed_checksum();
    raw
}
