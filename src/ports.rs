//! Port traits: the boundary between the control core and the hardware.
//!
//! ```text
//!   Adapter (UART / SPI flash / I2C probe) ──▶ Port trait ──▶ core logic
//! ```
//!
//! Driven adapters implement these traits; the core consumes them via
//! generics, so it never touches a register. Host-side tests and the
//! simulator substitute scripted or in-memory implementations.

use crate::time::Instant;

// ── Serial links ──────────────────────────────────────────────

/// A byte-oriented serial link (control board, relay board or companion
/// module). Framing and validation live above this trait.
///
/// Electrical quirks are the adapter's problem; in particular the
/// control-board link runs with inverted signal polarity on both lines,
/// which the UART driver must configure at pin level.
pub trait SerialPort {
    /// Write the whole buffer.
    fn write_all(&mut self, bytes: &[u8]);

    /// Read exactly `buf.len()` bytes, giving up at `deadline`.
    /// Returns `false` on timeout; `buf` contents are then unspecified.
    fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> bool;

    /// Drop any bytes already buffered on the receive side, so the next
    /// read starts at a frame boundary.
    fn discard_input(&mut self);
}

// ── Settings flash ────────────────────────────────────────────

/// Byte-addressable persistent flash used for the settings page.
pub trait FlashPort {
    /// Program/read granularity of the backing store, in bytes.
    fn page_size(&self) -> usize;

    /// Whether a flash chip responds at all.
    fn is_present(&mut self) -> bool;

    /// Manufacturer/device identification word.
    fn device_id(&mut self) -> u16;

    fn read(&mut self, addr: u32, buf: &mut [u8]);

    fn sector_erase(&mut self, addr: u32);

    /// Program one page; `data` must not exceed [`page_size`](Self::page_size).
    fn page_program(&mut self, addr: u32, data: &[u8]);
}

// ── External temperature probes ───────────────────────────────

/// A point temperature sensor (e.g. a thermocouple amplifier on the
/// accessory bus). Readings ride along in the companion status broadcast.
pub trait TemperatureProbe {
    fn is_connected(&mut self) -> bool;

    /// Latest reading in °C, or `None` when the probe is absent or the
    /// conversion failed.
    fn read_celsius(&mut self) -> Option<f32>;
}

// ── Liveness backstops ────────────────────────────────────────

/// Hardware watchdog; must be fed every loop iteration. A missed outer
/// deadline hard-resets the whole device, below any software bail logic.
pub trait WatchdogPort {
    fn feed(&mut self);
}

/// Handle to the supervisory execution context, used by the control
/// context to restart it when the status queue stays full (evidence the
/// consumer has wedged).
pub trait CompanionCoreHandle {
    fn restart(&mut self);
}
