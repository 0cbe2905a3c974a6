//! Host-side simulation adapters.
//!
//! In-memory implementations of the hardware ports, used by the
//! `duetto-sim` binary and the test suites. The simulated control board
//! runs a crude first-order thermal model so the whole control loop can
//! be exercised end to end on a workstation: closed-loop heating,
//! power sharing, brews, bails.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::ports::{CompanionCoreHandle, FlashPort, SerialPort, TemperatureProbe, WatchdogPort};
use crate::protocol::{control_board, relay_board};
use crate::queue::SpscQueue;
use crate::time::{Clock, Duration, Instant};

// ── In-memory serial pair ─────────────────────────────────────

const SERIAL_BUFFER: usize = 8192;

pub type ByteQueue = SpscQueue<u8, SERIAL_BUFFER>;

/// One end of a duplex in-memory serial link.
pub struct SimSerial<C: Clock> {
    rx: Arc<ByteQueue>,
    tx: Arc<ByteQueue>,
    clock: C,
}

impl<C: Clock> SimSerial<C> {
    /// Create a connected pair of serial endpoints.
    pub fn duplex(clock: C) -> (SimSerial<C>, SimSerial<C>) {
        let a_to_b: Arc<ByteQueue> = Arc::new(SpscQueue::new());
        let b_to_a: Arc<ByteQueue> = Arc::new(SpscQueue::new());
        let a = SimSerial {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            clock: clock.clone(),
        };
        let b = SimSerial {
            rx: a_to_b,
            tx: b_to_a,
            clock,
        };
        (a, b)
    }

    /// Received-byte count, for tests that poke at pacing.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl<C: Clock> SerialPort for SimSerial<C> {
    fn write_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            // A full peer buffer drops bytes, like an unread UART FIFO.
            let _ = self.tx.try_add(b);
        }
    }

    fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> bool {
        while self.rx.len() < buf.len() {
            if self.clock.now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
        for slot in buf.iter_mut() {
            *slot = self.rx.remove_blocking();
        }
        true
    }

    fn discard_input(&mut self) {
        while self.rx.try_remove().is_some() {}
    }
}

// ── Simulated control board ───────────────────────────────────

/// Shared toggles so a scenario driver (or a UI thread) can poke the
/// simulated machine while the loops run.
#[derive(Clone, Default)]
pub struct MachineInputs {
    brew_switch: Arc<AtomicBool>,
    tank_empty: Arc<AtomicBool>,
    service_low: Arc<AtomicBool>,
}

impl MachineInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_brew_switch(&self, on: bool) {
        self.brew_switch.store(on, Ordering::Relaxed);
    }

    pub fn set_tank_empty(&self, empty: bool) {
        self.tank_empty.store(empty, Ordering::Relaxed);
    }

    pub fn set_service_low(&self, low: bool) {
        self.service_low.store(low, Ordering::Relaxed);
    }
}

/// First-order thermal model of the machine plus the control board's
/// framing behavior: consumes relay frames, emits one sensor frame per
/// control cycle.
pub struct SimControlBoard<C: Clock> {
    serial: SimSerial<C>,
    inputs: MachineInputs,
    brew_temp: f32,
    service_temp: f32,
    ambient: f32,
}

/// Element heating rates, °C per second, deliberately quick so the
/// simulated machine reaches temperature in seconds rather than
/// minutes.
const BREW_HEAT_RATE: f32 = 2.0;
const SERVICE_HEAT_RATE: f32 = 1.2;
/// Newton-cooling coefficient towards ambient, per second.
const COOLING_RATE: f32 = 0.01;

impl<C: Clock> SimControlBoard<C> {
    pub fn new(serial: SimSerial<C>, inputs: MachineInputs) -> Self {
        Self {
            serial,
            inputs,
            brew_temp: 22.0,
            service_temp: 22.0,
            ambient: 22.0,
        }
    }

    pub fn brew_temperature(&self) -> f32 {
        self.brew_temp
    }

    pub fn service_temperature(&self) -> f32 {
        self.service_temp
    }

    /// Advance the model by `dt` and exchange one frame pair: apply any
    /// pending relay frame, then emit a sensor frame.
    pub fn step(&mut self, dt: Duration) {
        let dt_secs = dt.as_secs_f32();

        // Latest relay frame wins; the board only acts on whole frames.
        let mut relay = None;
        let mut frame = [0u8; relay_board::PACKET_LEN];
        loop {
            let no_wait = self.serial.clock.now();
            if !self.serial.read_exact(&mut frame, no_wait) {
                break;
            }
            relay = Some(relay_board::convert_to_parsed(
                &relay_board::RelayBoardRawPacket::from_bytes(frame),
            ));
        }

        let (brew_on, service_on) = relay
            .map(|r| (r.brew_boiler_ssr_on, r.service_boiler_ssr_on))
            .unwrap_or((false, false));

        if brew_on {
            self.brew_temp += BREW_HEAT_RATE * dt_secs;
        }
        if service_on {
            self.service_temp += SERVICE_HEAT_RATE * dt_secs;
        }
        self.brew_temp -= (self.brew_temp - self.ambient) * COOLING_RATE * dt_secs;
        self.service_temp -= (self.service_temp - self.ambient) * COOLING_RATE * dt_secs;

        let parsed = control_board::ControlBoardParsedPacket {
            brew_boiler_temperature: self.brew_temp,
            service_boiler_temperature: self.service_temp,
            brew_switch: self.inputs.brew_switch.load(Ordering::Relaxed),
            water_tank_empty: self.inputs.tank_empty.load(Ordering::Relaxed),
            service_boiler_low: self.inputs.service_low.load(Ordering::Relaxed),
        };
        let raw = control_board::unparse(&parsed);
        self.serial.write_all(&raw.bytes);
        debug!(
            "sim board: brew {:.1} °C service {:.1} °C",
            self.brew_temp, self.service_temp
        );
    }
}

// ── Scripted serial ───────────────────────────────────────────

/// Deterministic serial fake: reads come from a script of frames (or
/// timeouts), writes are recorded. Unlike [`SimSerial`] it never waits,
/// which keeps virtual-clock tests free of spin loops.
#[derive(Default)]
pub struct ScriptedSerial {
    reads: std::collections::VecDeque<Option<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for a future read.
    pub fn push_frame(&mut self, bytes: &[u8]) {
        self.reads.push_back(Some(bytes.to_vec()));
    }

    /// Queue a read timeout.
    pub fn push_timeout(&mut self) {
        self.reads.push_back(None);
    }

    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    pub fn last_write(&self) -> Option<&Vec<u8>> {
        self.writes.last()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl SerialPort for ScriptedSerial {
    fn write_all(&mut self, bytes: &[u8]) {
        self.writes.push(bytes.to_vec());
    }

    fn read_exact(&mut self, buf: &mut [u8], _deadline: Instant) -> bool {
        match self.reads.pop_front().flatten() {
            Some(frame) if frame.len() == buf.len() => {
                buf.copy_from_slice(&frame);
                true
            }
            _ => false,
        }
    }

    fn discard_input(&mut self) {}
}

// ── RAM-backed settings flash ─────────────────────────────────

const FLASH_SIZE: usize = 4096;

/// In-memory flash chip. Clones share content, which lets tests model
/// a reboot by building a second manager over the same chip.
#[derive(Clone)]
pub struct MemFlash {
    inner: Arc<Mutex<MemFlashInner>>,
}

struct MemFlashInner {
    present: bool,
    page_size: usize,
    data: Vec<u8>,
    program_count: usize,
}

impl MemFlash {
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemFlashInner {
                present: true,
                page_size,
                data: vec![0xFF; FLASH_SIZE], // Erased state.
                program_count: 0,
            })),
        }
    }

    /// A socket with no chip fitted.
    pub fn absent() -> Self {
        let flash = Self::new(256);
        flash.inner.lock().unwrap().present = false;
        flash
    }

    pub fn program_count(&self) -> usize {
        self.inner.lock().unwrap().program_count
    }

    /// Corrupt one byte, for persistence fault-injection tests.
    pub fn flip_byte(&self, addr: usize) {
        self.inner.lock().unwrap().data[addr] ^= 0x01;
    }
}

impl FlashPort for MemFlash {
    fn page_size(&self) -> usize {
        self.inner.lock().unwrap().page_size
    }

    fn is_present(&mut self) -> bool {
        self.inner.lock().unwrap().present
    }

    fn device_id(&mut self) -> u16 {
        0xEF15
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) {
        let inner = self.inner.lock().unwrap();
        let start = addr as usize;
        buf.copy_from_slice(&inner.data[start..start + buf.len()]);
    }

    fn sector_erase(&mut self, addr: u32) {
        let mut inner = self.inner.lock().unwrap();
        let start = (addr as usize) & !(FLASH_SIZE - 1);
        let end = (start + FLASH_SIZE).min(inner.data.len());
        inner.data[start..end].fill(0xFF);
    }

    fn page_program(&mut self, addr: u32, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let start = addr as usize;
        inner.data[start..start + data.len()].copy_from_slice(data);
        inner.program_count += 1;
    }
}

// ── Miscellaneous stubs ───────────────────────────────────────

/// Probe stub reporting a fixed temperature (or nothing).
pub struct FixedProbe {
    pub connected: bool,
    pub celsius: f32,
}

impl TemperatureProbe for FixedProbe {
    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn read_celsius(&mut self) -> Option<f32> {
        self.connected.then_some(self.celsius)
    }
}

/// Watchdog stub for host runs.
#[derive(Default)]
pub struct NoopWatchdog;

impl WatchdogPort for NoopWatchdog {
    fn feed(&mut self) {}
}

/// Core-restart stub: counts requests so tests can observe the
/// liveness path without actually tearing a thread down.
#[derive(Clone, Default)]
pub struct RestartCounter {
    count: Arc<Mutex<usize>>,
}

impl RestartCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

impl CompanionCoreHandle for RestartCounter {
    fn restart(&mut self) {
        *self.count.lock().unwrap() += 1;
    }
}
