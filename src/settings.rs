//! Authoritative settings store with mirrored-state propagation.
//!
//! The supervisory context owns the one true [`MachineSettings`] through
//! [`SettingsManager`]. Every setter is a two-phase write: it first
//! mutates the authoritative record, then emits the matching
//! [`SystemCommand`] onto the command queue so the control core's mirror
//! converges. Direct field writes are forbidden by construction; the
//! setters are the single point of truth.
//!
//! Persistence is a single flash page:
//!
//! ```text
//! ┌─────────┬───────┬─────────┬──────────────────┬───────────────┐
//! │ version │ CRC32 │ length  │ postcard payload │ zero padding  │
//! │ 1 B     │ 4 B   │ 4 B LE  │ length bytes     │ to page size  │
//! └─────────┴───────┴─────────┴──────────────────┴───────────────┘
//! ```
//!
//! Any version, length or CRC mismatch on load silently falls back to
//! the hard-coded defaults; corrupt settings are an inconvenience, never
//! a fault.

use std::sync::Arc;

use log::{info, warn};

use crate::checksum::crc32;
use crate::command::SystemCommand;
use crate::config::{MachineSettings, PidParams};
use crate::controller::CommandQueue;
use crate::ports::FlashPort;

/// Format version of the persisted page.
const SETTINGS_VERSION: u8 = 0x01;
/// Flash address of the settings page.
const SETTINGS_ADDR: u32 = 0x0000_0000;
/// version byte + CRC32 + payload length.
const PAGE_HEADER_LEN: usize = 9;

// ── Page codec ────────────────────────────────────────────────

/// Encode a settings record into a zero-padded page image.
/// `None` if the serialized record does not fit the page.
pub fn encode_settings_page(settings: &MachineSettings, page_size: usize) -> Option<Vec<u8>> {
    let payload = postcard::to_allocvec(settings).ok()?;
    if PAGE_HEADER_LEN + payload.len() > page_size {
        return None;
    }

    let mut page = vec![0u8; page_size];
    page[0] = SETTINGS_VERSION;
    page[1..5].copy_from_slice(&crc32(&payload).to_le_bytes());
    page[5..9].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    page[PAGE_HEADER_LEN..PAGE_HEADER_LEN + payload.len()].copy_from_slice(&payload);
    Some(page)
}

/// Decode a page image. `None` on any version/length/CRC mismatch.
pub fn decode_settings_page(page: &[u8]) -> Option<MachineSettings> {
    if page.len() < PAGE_HEADER_LEN || page[0] != SETTINGS_VERSION {
        return None;
    }

    let stored_crc = u32::from_le_bytes([page[1], page[2], page[3], page[4]]);
    let len = u32::from_le_bytes([page[5], page[6], page[7], page[8]]) as usize;
    let payload = page.get(PAGE_HEADER_LEN..PAGE_HEADER_LEN + len)?;

    if crc32(payload) != stored_crc {
        return None;
    }

    postcard::from_bytes(payload).ok()
}

// ── Manager ───────────────────────────────────────────────────

pub struct SettingsManager<F: FlashPort> {
    flash: F,
    command_queue: Arc<CommandQueue>,
    current: MachineSettings,
    /// Snapshot of what flash last held, for change detection. Starts
    /// at an impossible sentinel so the first change check persists the
    /// defaults on a virgin chip.
    last_read: MachineSettings,
}

impl<F: FlashPort> SettingsManager<F> {
    pub fn new(flash: F, command_queue: Arc<CommandQueue>) -> Self {
        Self {
            flash,
            command_queue,
            current: MachineSettings::default(),
            last_read: MachineSettings {
                brew_temperature_target: 33.0,
                ..MachineSettings::default()
            },
        }
    }

    /// Load persisted settings and replay them all into the command
    /// queue so the control core's mirror starts consistent.
    ///
    /// A persisted sleep-mode flag only survives a watchdog-caused
    /// reboot; on a fresh power-on the machine should wake up.
    pub fn initialize(&mut self, watchdog_caused_reboot: bool) {
        self.read_settings();

        if self.current.sleep_mode && !watchdog_caused_reboot {
            self.current.sleep_mode = false;
        }

        self.send_all_settings();
    }

    // ── Getters ───────────────────────────────────────────────

    pub fn settings(&self) -> &MachineSettings {
        &self.current
    }

    pub fn brew_temperature_offset(&self) -> f32 {
        self.current.brew_temperature_offset
    }

    pub fn eco_mode(&self) -> bool {
        self.current.eco_mode
    }

    pub fn sleep_mode(&self) -> bool {
        self.current.sleep_mode
    }

    pub fn target_brew_temp(&self) -> f32 {
        self.current.brew_temperature_target
    }

    pub fn target_service_temp(&self) -> f32 {
        self.current.service_temperature_target
    }

    pub fn auto_sleep_minutes(&self) -> u16 {
        self.current.auto_sleep_minutes
    }

    pub fn offset_target_brew_temp(&self) -> f32 {
        self.current.offset_brew_target()
    }

    pub fn brew_pid(&self) -> PidParams {
        self.current.brew_pid
    }

    pub fn service_pid(&self) -> PidParams {
        self.current.service_pid
    }

    // ── Setters (two-phase: store, then mirror) ───────────────

    pub fn set_brew_temperature_offset(&mut self, offset: f32) {
        self.current.brew_temperature_offset = offset;
        self.mirror(SystemCommand::SetBrewOffset(offset));
    }

    pub fn set_eco_mode(&mut self, eco: bool) {
        self.current.eco_mode = eco;
        self.mirror(SystemCommand::SetEcoMode(eco));
    }

    pub fn set_steam_only_mode(&mut self, steam_only: bool) {
        self.current.steam_only_mode = steam_only;
        self.mirror(SystemCommand::SetSteamOnlyMode(steam_only));
    }

    pub fn set_standby_mode(&mut self, standby: bool) {
        self.current.standby_mode = standby;
        self.mirror(SystemCommand::SetStandbyMode(standby));
    }

    pub fn set_target_brew_temp(&mut self, target: f32) {
        self.current.brew_temperature_target = target;
        self.mirror(SystemCommand::SetBrewSetPoint(target));
    }

    /// Target expressed in offset-corrected (group-head) degrees.
    pub fn set_offset_target_brew_temp(&mut self, offset_target: f32) {
        self.set_target_brew_temp(offset_target - self.current.brew_temperature_offset);
    }

    pub fn set_target_service_temp(&mut self, target: f32) {
        self.current.service_temperature_target = target;
        self.mirror(SystemCommand::SetServiceSetPoint(target));
    }

    pub fn set_auto_sleep_minutes(&mut self, minutes: u16) {
        self.current.auto_sleep_minutes = minutes;
        self.mirror(SystemCommand::SetAutoSleepMinutes(minutes));
    }

    pub fn set_brew_pid(&mut self, params: PidParams) {
        self.current.brew_pid = params;
        self.mirror(SystemCommand::SetBrewPidParameters(params));
    }

    pub fn set_service_pid(&mut self, params: PidParams) {
        self.current.service_pid = params;
        self.mirror(SystemCommand::SetServicePidParameters(params));
    }

    pub fn set_sleep_mode(&mut self, sleep: bool) {
        self.current.sleep_mode = sleep;
        self.mirror(SystemCommand::SetSleepMode(sleep));
    }

    // ── Persistence ───────────────────────────────────────────

    /// Persist the current record if it differs from what flash holds.
    /// Called on the supervisory cadence, not per mutation, to spare
    /// erase cycles.
    pub fn write_if_changed(&mut self) {
        if self.current != self.last_read {
            self.write_to_flash();
        }
    }

    fn read_settings(&mut self) {
        if !self.flash.is_present() {
            warn!("settings flash not present; using defaults");
            self.current = MachineSettings::default();
            return;
        }
        info!(
            "settings flash present, device id {:#06x}",
            self.flash.device_id()
        );

        let mut page = vec![0u8; self.flash.page_size()];
        self.flash.read(SETTINGS_ADDR, &mut page);

        match decode_settings_page(&page) {
            Some(read) => {
                info!("loaded persisted settings");
                self.last_read = read;
                self.current = read;
            }
            None => {
                info!("no valid persisted settings; using defaults");
                self.current = MachineSettings::default();
            }
        }
    }

    fn write_to_flash(&mut self) {
        let Some(page) = encode_settings_page(&self.current, self.flash.page_size()) else {
            warn!("settings record does not fit the flash page; not persisting");
            return;
        };

        info!("persisting settings");
        self.flash.sector_erase(SETTINGS_ADDR);
        self.flash.page_program(SETTINGS_ADDR, &page);

        self.read_settings();
    }

    fn send_all_settings(&mut self) {
        self.set_brew_temperature_offset(self.current.brew_temperature_offset);
        self.set_eco_mode(self.current.eco_mode);
        self.set_steam_only_mode(self.current.steam_only_mode);
        self.set_standby_mode(self.current.standby_mode);
        self.set_target_brew_temp(self.current.brew_temperature_target);
        self.set_auto_sleep_minutes(self.current.auto_sleep_minutes);
        self.set_target_service_temp(self.current.service_temperature_target);
        self.set_brew_pid(self.current.brew_pid);
        self.set_service_pid(self.current.service_pid);
        self.set_sleep_mode(self.current.sleep_mode);
    }

    /// Mirror commands are fire-and-forget; if the queue is full the
    /// control core is wedged and a liveness restart is coming anyway.
    fn mirror(&self, command: SystemCommand) {
        let _ = self.command_queue.try_add(command);
    }
}
