//! Companion-link message codec.
//!
//! The supervisory module (Wi-Fi/UI firmware) and the controller
//! exchange variable-length framed messages over a dedicated serial
//! link:
//!
//! ```text
//! ┌───────────────────────── header (26 B) ─────────────────────────┬─────────┐
//! │ direction │ id  │ reply-to │ type │ error │ version │ length    │ payload │
//! │ u32       │ u32 │ u32      │ u32  │ u32   │ u16     │ u32       │ N bytes │
//! └───────────┴─────┴──────────┴──────┴───────┴─────────┴───────────┴─────────┘
//! ```
//!
//! All integers little-endian. The declared payload length follows the
//! header. Command payloads additionally carry a CRC32 of the payload
//! body (not the header) so a corrupted setpoint can never be applied.

use crate::checksum::crc32;
use crate::command::FlowMode;
use crate::status::{CoalescedState, MachineState, RunState};

/// Version spoken by this firmware; ping partners must match.
pub const PROTOCOL_VERSION: u16 = 0x0005;

pub const HEADER_LEN: usize = 26;
pub const PING_PAYLOAD_LEN: usize = 2;
pub const COMMAND_PAYLOAD_LEN: usize = 37;
pub const COMMAND_MESSAGE_LEN: usize = 4 + COMMAND_PAYLOAD_LEN;
pub const STATUS_PAYLOAD_LEN: usize = 65;

/// Who is talking. Only [`CompanionToController`](Self::CompanionToController)
/// frames are acted on by the controller side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LinkDirection {
    ControllerToCompanion = 1,
    CompanionToController = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Ping = 1,
    Pong = 2,
    Ack = 3,
    Nack = 4,
    SystemStatus = 5,
    SystemCommand = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum LinkError {
    #[default]
    None = 0,
    IncompleteData = 1,
    InvalidChecksum = 2,
    UnexpectedLength = 3,
    PingWrongVersion = 5,
}

impl LinkDirection {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::ControllerToCompanion),
            2 => Some(Self::CompanionToController),
            _ => None,
        }
    }
}

impl MessageType {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            3 => Some(Self::Ack),
            4 => Some(Self::Nack),
            5 => Some(Self::SystemStatus),
            6 => Some(Self::SystemCommand),
            _ => None,
        }
    }
}

impl LinkError {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::IncompleteData),
            2 => Some(Self::InvalidChecksum),
            3 => Some(Self::UnexpectedLength),
            5 => Some(Self::PingWrongVersion),
            _ => None,
        }
    }
}

// ── Header ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub direction: LinkDirection,
    pub id: u32,
    pub response_to: u32,
    pub message_type: MessageType,
    pub error: LinkError,
    pub version: u16,
    pub length: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&(self.direction as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&(self.message_type as u32).to_le_bytes());
        out[16..20].copy_from_slice(&(self.error as u32).to_le_bytes());
        out[20..22].copy_from_slice(&self.version.to_le_bytes());
        out[22..26].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Decode a header. `None` on unknown direction/type/error tags; the
    /// caller drops such frames (unsupported types are not an error).
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Option<Self> {
        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        Some(Self {
            direction: LinkDirection::from_u32(u32_at(0))?,
            id: u32_at(4),
            response_to: u32_at(8),
            message_type: MessageType::from_u32(u32_at(12))?,
            error: LinkError::from_u32(u32_at(16))?,
            version: u16::from_le_bytes([bytes[20], bytes[21]]),
            length: u32_at(22),
        })
    }
}

// ── Ping / pong payload ───────────────────────────────────────

pub fn encode_ping_payload(version: u16) -> [u8; PING_PAYLOAD_LEN] {
    version.to_le_bytes()
}

pub fn decode_ping_payload(bytes: &[u8; PING_PAYLOAD_LEN]) -> u16 {
    u16::from_le_bytes(*bytes)
}

// ── Command payload ───────────────────────────────────────────

/// Wire tags for companion commands. Unknown tags fail to decode and the
/// frame is dropped after an ack (forward compatibility with newer UIs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompanionCommandType {
    SetBrewSetPoint = 0,
    SetBrewPidParameters = 1,
    SetBrewOffset = 2,
    SetServiceSetPoint = 3,
    SetServicePidParameters = 4,
    SetEcoMode = 5,
    SetSleepMode = 6,
    SetAutoSleepMinutes = 7,
    SetFlowMode = 8,
    EnqueueRoutine = 9,
    CancelRoutine = 10,
    ForceHardBail = 11,
    ClearRoutine = 12,
}

impl CompanionCommandType {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::SetBrewSetPoint),
            1 => Some(Self::SetBrewPidParameters),
            2 => Some(Self::SetBrewOffset),
            3 => Some(Self::SetServiceSetPoint),
            4 => Some(Self::SetServicePidParameters),
            5 => Some(Self::SetEcoMode),
            6 => Some(Self::SetSleepMode),
            7 => Some(Self::SetAutoSleepMinutes),
            8 => Some(Self::SetFlowMode),
            9 => Some(Self::EnqueueRoutine),
            10 => Some(Self::CancelRoutine),
            11 => Some(Self::ForceHardBail),
            12 => Some(Self::ClearRoutine),
            _ => None,
        }
    }
}

/// The wire-shaped command record: a tag plus generic argument slots.
/// Which slots are meaningful depends on the tag; the link handler maps
/// each tag onto one settings/automations/command-queue action.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommandPayload {
    pub command_type: u32,
    pub bool1: bool,
    pub float1: f32,
    pub float2: f32,
    pub float3: f32,
    pub float4: f32,
    pub float5: f32,
    pub int1: u32,
    pub int2: u32,
    pub int3: u32,
}

impl CommandPayload {
    pub fn typed(&self) -> Option<CompanionCommandType> {
        CompanionCommandType::from_u32(self.command_type)
    }

    pub fn flow_mode(&self) -> FlowMode {
        FlowMode::from_wire(self.int1).unwrap_or_default()
    }

    pub fn encode(&self) -> [u8; COMMAND_PAYLOAD_LEN] {
        let mut out = [0u8; COMMAND_PAYLOAD_LEN];
        out[0..4].copy_from_slice(&self.command_type.to_le_bytes());
        out[4] = u8::from(self.bool1);
        out[5..9].copy_from_slice(&self.float1.to_le_bytes());
        out[9..13].copy_from_slice(&self.float2.to_le_bytes());
        out[13..17].copy_from_slice(&self.float3.to_le_bytes());
        out[17..21].copy_from_slice(&self.float4.to_le_bytes());
        out[21..25].copy_from_slice(&self.float5.to_le_bytes());
        out[25..29].copy_from_slice(&self.int1.to_le_bytes());
        out[29..33].copy_from_slice(&self.int2.to_le_bytes());
        out[33..37].copy_from_slice(&self.int3.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; COMMAND_PAYLOAD_LEN]) -> Self {
        let f32_at = |off: usize| {
            f32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        Self {
            command_type: u32_at(0),
            bool1: bytes[4] != 0,
            float1: f32_at(5),
            float2: f32_at(9),
            float3: f32_at(13),
            float4: f32_at(17),
            float5: f32_at(21),
            int1: u32_at(25),
            int2: u32_at(29),
            int3: u32_at(33),
        }
    }
}

/// A complete command message body: CRC32 of the payload, then the
/// payload itself.
pub fn encode_command_message(payload: &CommandPayload) -> [u8; COMMAND_MESSAGE_LEN] {
    let body = payload.encode();
    let mut out = [0u8; COMMAND_MESSAGE_LEN];
    out[0..4].copy_from_slice(&crc32(&body).to_le_bytes());
    out[4..].copy_from_slice(&body);
    out
}

/// Split a command message into its embedded checksum and payload bytes.
pub fn split_command_message(bytes: &[u8; COMMAND_MESSAGE_LEN]) -> (u32, [u8; COMMAND_PAYLOAD_LEN]) {
    let checksum = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let mut payload = [0u8; COMMAND_PAYLOAD_LEN];
    payload.copy_from_slice(&bytes[4..]);
    (checksum, payload)
}

// ── Status payload ────────────────────────────────────────────

/// Full status broadcast body, sent controller → companion on a fixed
/// cadence. Field order and widths are the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusPayload {
    pub internal_state: MachineState,
    pub run_state: RunState,
    pub coalesced_state: CoalescedState,
    pub brew_temperature: f32,
    pub brew_set_point: f32,
    pub service_temperature: f32,
    pub service_set_point: f32,
    pub brew_temperature_offset: f32,
    pub auto_sleep_after_minutes: u16,
    pub currently_brewing: bool,
    pub currently_filling_service_boiler: bool,
    pub eco_mode: bool,
    pub sleep_mode: bool,
    pub water_tank_low: bool,
    pub planned_auto_sleep_in_seconds: u16,
    pub board_temperature: f32,
    pub bail_counter: u16,
    pub uptime_seconds: u32,
    pub sb_raw_high_gain: u16,
    pub sb_raw_low_gain: u16,
    pub external_temperature_1: f32,
    pub external_temperature_2: f32,
    pub external_temperature_3: f32,
    pub flow_mode: FlowMode,
    pub brew_boiler_on: bool,
    pub service_boiler_on: bool,
    pub loaded_routine: u16,
    pub current_routine_step: u16,
}

impl StatusPayload {
    pub fn encode(&self) -> [u8; STATUS_PAYLOAD_LEN] {
        let mut out = [0u8; STATUS_PAYLOAD_LEN];
        out[0] = self.internal_state as u8;
        out[1] = self.run_state as u8;
        out[2] = self.coalesced_state as u8;
        out[3..7].copy_from_slice(&self.brew_temperature.to_le_bytes());
        out[7..11].copy_from_slice(&self.brew_set_point.to_le_bytes());
        out[11..15].copy_from_slice(&self.service_temperature.to_le_bytes());
        out[15..19].copy_from_slice(&self.service_set_point.to_le_bytes());
        out[19..23].copy_from_slice(&self.brew_temperature_offset.to_le_bytes());
        out[23..25].copy_from_slice(&self.auto_sleep_after_minutes.to_le_bytes());
        out[25] = u8::from(self.currently_brewing);
        out[26] = u8::from(self.currently_filling_service_boiler);
        out[27] = u8::from(self.eco_mode);
        out[28] = u8::from(self.sleep_mode);
        out[29] = u8::from(self.water_tank_low);
        out[30..32].copy_from_slice(&self.planned_auto_sleep_in_seconds.to_le_bytes());
        out[32..36].copy_from_slice(&self.board_temperature.to_le_bytes());
        out[36..38].copy_from_slice(&self.bail_counter.to_le_bytes());
        out[38..42].copy_from_slice(&self.uptime_seconds.to_le_bytes());
        out[42..44].copy_from_slice(&self.sb_raw_high_gain.to_le_bytes());
        out[44..46].copy_from_slice(&self.sb_raw_low_gain.to_le_bytes());
        out[46..50].copy_from_slice(&self.external_temperature_1.to_le_bytes());
        out[50..54].copy_from_slice(&self.external_temperature_2.to_le_bytes());
        out[54..58].copy_from_slice(&self.external_temperature_3.to_le_bytes());
        out[58] = self.flow_mode as u8;
        out[59] = u8::from(self.brew_boiler_on);
        out[60] = u8::from(self.service_boiler_on);
        out[61..63].copy_from_slice(&self.loaded_routine.to_le_bytes());
        out[63..65].copy_from_slice(&self.current_routine_step.to_le_bytes());
        out
    }
}
