//! Companion-link handler.
//!
//! Owns the controller side of the companion serial link:
//!
//! ```text
//!   UART RX interrupt ──▶ byte ring (SPSC) ──▶ poll() ── dispatch ──▶
//!                                                settings manager /
//!                                                automations /
//!                                                command queue
//!   send_status() ◀── periodic broadcast ◀── supervisory loop
//! ```
//!
//! The receive ring is single-producer (interrupt context) and
//! single-consumer (this handler), lock-free by construction. Inbound
//! frames are drained header first, then payload, each with its own
//! deadline. Only frames tagged companion→controller are acted on;
//! everything else clears the ring and is dropped silently.
//!
//! This handler never touches control-core state directly. Every
//! command indirects through the settings manager, the automations
//! engine or the command queue, preserving single-writer ownership.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::automations::Automations;
use crate::command::SystemCommand;
use crate::config::PidParams;
use crate::controller::CommandQueue;
use crate::ports::{FlashPort, SerialPort};
use crate::protocol::companion::{
    COMMAND_MESSAGE_LEN, CommandPayload, CompanionCommandType, HEADER_LEN, LinkDirection,
    LinkError, MessageHeader, MessageType, PING_PAYLOAD_LEN, PROTOCOL_VERSION, STATUS_PAYLOAD_LEN,
    StatusPayload, decode_ping_payload, encode_ping_payload, split_command_message,
};
use crate::queue::SpscQueue;
use crate::settings::SettingsManager;
use crate::status::StatusMessage;
use crate::time::{Clock, Duration, Instant};

/// Receive ring sized for several frames of backlog.
pub const RING_CAPACITY: usize = 1024;

pub type CompanionRing = SpscQueue<u8, RING_CAPACITY>;

/// Deadline for draining a header once bytes have appeared.
const HEADER_TIMEOUT: Duration = Duration::from_millis(10);
/// Deadline for the payload following a decoded header.
const PAYLOAD_TIMEOUT: Duration = Duration::from_millis(50);
/// How long a status broadcast waits for its ack.
const ACK_TIMEOUT: Duration = Duration::from_millis(100);

pub struct CompanionLink<S: SerialPort, C: Clock> {
    serial: S,
    clock: C,
    rx: Arc<CompanionRing>,
    command_queue: Arc<CommandQueue>,
    next_message_id: u32,
}

impl<S: SerialPort, C: Clock> CompanionLink<S, C> {
    pub fn new(
        serial: S,
        clock: C,
        rx: Arc<CompanionRing>,
        command_queue: Arc<CommandQueue>,
    ) -> Self {
        Self {
            serial,
            clock,
            rx,
            command_queue,
            next_message_id: 1,
        }
    }

    /// The receive ring this link drains; the UART interrupt (or the
    /// simulator's companion thread) holds the producer side.
    pub fn ring(&self) -> Arc<CompanionRing> {
        Arc::clone(&self.rx)
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Process at most one pending inbound message.
    pub fn poll<F: FlashPort>(
        &mut self,
        settings: &mut SettingsManager<F>,
        automations: &mut Automations<C>,
    ) {
        if self.rx.is_empty() {
            return;
        }

        let mut header_bytes = [0u8; HEADER_LEN];
        let deadline = self.clock.now() + HEADER_TIMEOUT;
        if !self.read_from_ring(&mut header_bytes, deadline) {
            self.clear_ring();
            return;
        }

        let Some(header) = MessageHeader::decode(&header_bytes) else {
            // Unknown tag values; not ours to judge.
            self.clear_ring();
            return;
        };

        if header.direction != LinkDirection::CompanionToController {
            self.clear_ring();
            return;
        }

        match header.message_type {
            MessageType::SystemCommand => self.handle_command(&header, settings, automations),
            MessageType::Ping => self.handle_ping(&header),
            // Unsupported or out-of-order types are dropped silently.
            _ => self.clear_ring(),
        }
    }

    fn handle_ping(&mut self, header: &MessageHeader) {
        if header.length as usize != PING_PAYLOAD_LEN {
            self.clear_ring();
            self.send_reply(MessageType::Nack, header.id, LinkError::UnexpectedLength, &[]);
            return;
        }

        let mut payload = [0u8; PING_PAYLOAD_LEN];
        let deadline = self.clock.now() + PAYLOAD_TIMEOUT;
        if !self.read_from_ring(&mut payload, deadline) {
            self.send_reply(MessageType::Nack, header.id, LinkError::IncompleteData, &[]);
            return;
        }

        if decode_ping_payload(&payload) == PROTOCOL_VERSION {
            debug!("ping ok");
            self.send_reply(
                MessageType::Pong,
                header.id,
                LinkError::None,
                &encode_ping_payload(PROTOCOL_VERSION),
            );
        } else {
            warn!("ping version mismatch");
            self.send_reply(MessageType::Nack, header.id, LinkError::PingWrongVersion, &[]);
        }
    }

    fn handle_command<F: FlashPort>(
        &mut self,
        header: &MessageHeader,
        settings: &mut SettingsManager<F>,
        automations: &mut Automations<C>,
    ) {
        if header.length as usize != COMMAND_MESSAGE_LEN {
            self.clear_ring();
            self.send_reply(MessageType::Nack, header.id, LinkError::UnexpectedLength, &[]);
            return;
        }

        let mut message = [0u8; COMMAND_MESSAGE_LEN];
        let deadline = self.clock.now() + PAYLOAD_TIMEOUT;
        if !self.read_from_ring(&mut message, deadline) {
            self.send_reply(MessageType::Nack, header.id, LinkError::IncompleteData, &[]);
            return;
        }

        let (stored_crc, payload_bytes) = split_command_message(&message);
        if crate::checksum::crc32(&payload_bytes) != stored_crc {
            warn!("companion command failed CRC check");
            self.send_reply(MessageType::Nack, header.id, LinkError::InvalidChecksum, &[]);
            return;
        }

        let payload = CommandPayload::decode(&payload_bytes);
        self.dispatch(&payload, settings, automations);
        self.send_reply(MessageType::Ack, header.id, LinkError::None, &[]);
    }

    /// Map one verified command payload onto exactly one settings,
    /// automations or command-queue action.
    fn dispatch<F: FlashPort>(
        &mut self,
        payload: &CommandPayload,
        settings: &mut SettingsManager<F>,
        automations: &mut Automations<C>,
    ) {
        let Some(command_type) = payload.typed() else {
            debug!("unknown companion command tag {}", payload.command_type);
            return;
        };

        info!("companion command: {command_type:?}");
        match command_type {
            CompanionCommandType::SetBrewSetPoint => {
                // Companion UIs speak in offset-corrected degrees.
                settings.set_offset_target_brew_temp(payload.float1);
            }
            CompanionCommandType::SetBrewPidParameters => {
                settings.set_brew_pid(PidParams {
                    kp: payload.float1,
                    ki: payload.float2,
                    kd: payload.float3,
                    windup_low: payload.float4,
                    windup_high: payload.float5,
                });
            }
            CompanionCommandType::SetBrewOffset => {
                settings.set_brew_temperature_offset(payload.float1);
            }
            CompanionCommandType::SetServiceSetPoint => {
                settings.set_target_service_temp(payload.float1);
            }
            CompanionCommandType::SetServicePidParameters => {
                settings.set_service_pid(PidParams {
                    kp: payload.float1,
                    ki: payload.float2,
                    kd: payload.float3,
                    windup_low: payload.float4,
                    windup_high: payload.float5,
                });
            }
            CompanionCommandType::SetEcoMode => {
                settings.set_eco_mode(payload.bool1);
            }
            CompanionCommandType::SetSleepMode => {
                if !payload.bool1 {
                    automations.exiting_sleep(settings);
                }
                settings.set_sleep_mode(payload.bool1);
            }
            CompanionCommandType::SetAutoSleepMinutes => {
                settings.set_auto_sleep_minutes(payload.float1 as u16);
            }
            CompanionCommandType::SetFlowMode => {
                self.command_queue
                    .add_blocking(SystemCommand::SetFlowMode(payload.flow_mode()));
            }
            CompanionCommandType::EnqueueRoutine => {
                automations.enqueue_routine(payload.int1 as u16);
            }
            CompanionCommandType::CancelRoutine | CompanionCommandType::ClearRoutine => {
                automations.cancel_routine();
            }
            CompanionCommandType::ForceHardBail => {
                self.command_queue.add_blocking(SystemCommand::ForceHardBail);
            }
        }
    }

    // ── Outbound ──────────────────────────────────────────────

    /// Broadcast a full status snapshot and wait (bounded) for the ack.
    /// Returns `false` when the ack does not arrive, is non-empty, or
    /// carries an error.
    #[allow(clippy::too_many_arguments)]
    pub fn send_status(
        &mut self,
        sm: &StatusMessage,
        external_temperatures: [f32; 3],
        auto_sleep_minutes: u16,
        planned_sleep_seconds: Option<f32>,
        loaded_routine: u16,
        current_routine_step: u16,
    ) -> bool {
        let payload = StatusPayload {
            internal_state: sm.internal_state,
            run_state: sm.run_state,
            coalesced_state: sm.coalesced_state,
            brew_temperature: sm.offset_brew_temperature,
            brew_set_point: sm.offset_brew_set_point,
            service_temperature: sm.service_temperature,
            service_set_point: sm.service_set_point,
            brew_temperature_offset: sm.brew_temperature_offset,
            auto_sleep_after_minutes: auto_sleep_minutes,
            currently_brewing: sm.currently_brewing,
            currently_filling_service_boiler: sm.currently_filling_service_boiler,
            eco_mode: sm.eco_mode,
            sleep_mode: sm.sleep_mode,
            water_tank_low: sm.water_tank_low,
            planned_auto_sleep_in_seconds: planned_sleep_seconds
                .map_or(0, |secs| secs.max(0.0) as u16),
            board_temperature: 0.0,
            bail_counter: sm.bail_counter,
            uptime_seconds: (sm.timestamp.as_millis() / 1000) as u32,
            sb_raw_high_gain: sm.sb_raw_high_gain,
            sb_raw_low_gain: sm.sb_raw_low_gain,
            external_temperature_1: external_temperatures[0],
            external_temperature_2: external_temperatures[1],
            external_temperature_3: external_temperatures[2],
            flow_mode: sm.flow_mode,
            brew_boiler_on: sm.brew_ssr_active,
            service_boiler_on: sm.service_ssr_active,
            loaded_routine,
            current_routine_step,
        };

        let id = self.next_id();
        let header = MessageHeader {
            direction: LinkDirection::ControllerToCompanion,
            id,
            response_to: 0,
            message_type: MessageType::SystemStatus,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: STATUS_PAYLOAD_LEN as u32,
        };

        // Anything stale in the ring predates this exchange.
        self.clear_ring();

        let mut frame = [0u8; HEADER_LEN + STATUS_PAYLOAD_LEN];
        frame[..HEADER_LEN].copy_from_slice(&header.encode());
        frame[HEADER_LEN..].copy_from_slice(&payload.encode());
        self.serial.write_all(&frame);

        self.wait_for_ack(id)
    }

    fn wait_for_ack(&mut self, id: u32) -> bool {
        let mut header_bytes = [0u8; HEADER_LEN];
        let deadline = self.clock.now() + ACK_TIMEOUT;
        if !self.read_from_ring(&mut header_bytes, deadline) {
            return false;
        }

        let Some(header) = MessageHeader::decode(&header_bytes) else {
            return false;
        };

        if header.length > 0 {
            // Acks are zero length by contract; drain and fail.
            let mut discard = vec![0u8; header.length as usize];
            let deadline = self.clock.now() + PAYLOAD_TIMEOUT;
            let _ = self.read_from_ring(&mut discard, deadline);
            return false;
        }

        header.message_type == MessageType::Ack
            && header.response_to == id
            && header.error == LinkError::None
    }

    fn send_reply(
        &mut self,
        message_type: MessageType,
        response_to: u32,
        error: LinkError,
        payload: &[u8],
    ) {
        let header = MessageHeader {
            direction: LinkDirection::ControllerToCompanion,
            id: self.next_id(),
            response_to,
            message_type,
            error,
            version: PROTOCOL_VERSION,
            length: payload.len() as u32,
        };

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(payload);
        self.serial.write_all(&frame);
    }

    // ── Ring plumbing ─────────────────────────────────────────

    /// Wait until the ring holds a full `buf` worth of bytes, then take
    /// them. `false` once `deadline` passes first.
    fn read_from_ring(&mut self, buf: &mut [u8], deadline: Instant) -> bool {
        while self.rx.len() < buf.len() {
            if self.clock.now() >= deadline {
                return false;
            }
            core::hint::spin_loop();
        }
        for slot in buf.iter_mut() {
            *slot = self.rx.remove_blocking();
        }
        true
    }

    fn clear_ring(&mut self) {
        while self.rx.try_remove().is_some() {}
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::companion::encode_command_message;
    use crate::sim::MemFlash;
    use crate::time::TestClock;
    use std::collections::VecDeque;

    /// Serial fake: records writes; optionally injects a scripted
    /// response into the ring after each write (the companion module
    /// answering).
    struct TestSerial {
        ring: Arc<CompanionRing>,
        responses: VecDeque<Vec<u8>>,
        writes: Vec<Vec<u8>>,
    }

    impl SerialPort for TestSerial {
        fn write_all(&mut self, bytes: &[u8]) {
            self.writes.push(bytes.to_vec());
            if let Some(response) = self.responses.pop_front() {
                for b in response {
                    self.ring.add_blocking(b);
                }
            }
        }

        fn read_exact(&mut self, _buf: &mut [u8], _deadline: Instant) -> bool {
            false
        }

        fn discard_input(&mut self) {}
    }

    struct Fixture {
        link: CompanionLink<TestSerial, TestClock>,
        settings: SettingsManager<MemFlash>,
        automations: Automations<TestClock>,
        ring: Arc<CompanionRing>,
        commands: Arc<CommandQueue>,
    }

    fn fixture() -> Fixture {
        let clock = TestClock::new();
        // Timeout loops poll the clock while waiting for bytes; let each
        // poll advance time so deadlines expire deterministically.
        clock.set_auto_advance(Duration::from_millis(1));

        let ring: Arc<CompanionRing> = Arc::new(SpscQueue::new());
        let commands = Arc::new(CommandQueue::new());
        let serial = TestSerial {
            ring: Arc::clone(&ring),
            responses: VecDeque::new(),
            writes: Vec::new(),
        };
        let settings = SettingsManager::new(MemFlash::new(256), Arc::clone(&commands));
        let automations = Automations::new(clock.clone(), Arc::clone(&commands), false, 0);
        let link = CompanionLink::new(serial, clock, Arc::clone(&ring), Arc::clone(&commands));
        Fixture {
            link,
            settings,
            automations,
            ring,
            commands,
        }
    }

    fn feed(ring: &CompanionRing, bytes: &[u8]) {
        for &b in bytes {
            ring.add_blocking(b);
        }
    }

    fn command_frame(payload: &CommandPayload) -> Vec<u8> {
        let body = encode_command_message(payload);
        let header = MessageHeader {
            direction: LinkDirection::CompanionToController,
            id: 42,
            response_to: 0,
            message_type: MessageType::SystemCommand,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: body.len() as u32,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&body);
        frame
    }

    fn last_reply_header(f: &Fixture) -> MessageHeader {
        let bytes = f.link.serial.writes.last().expect("reply expected");
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        MessageHeader::decode(&header).expect("valid reply header")
    }

    #[test]
    fn valid_command_is_dispatched_and_acked() {
        let mut f = fixture();
        let frame = command_frame(&CommandPayload {
            command_type: CompanionCommandType::SetServiceSetPoint as u32,
            float1: 123.0,
            ..CommandPayload::default()
        });
        feed(&f.ring, &frame);

        f.link.poll(&mut f.settings, &mut f.automations);

        assert!((f.settings.target_service_temp() - 123.0).abs() < f32::EPSILON);
        let reply = last_reply_header(&f);
        assert_eq!(reply.message_type, MessageType::Ack);
        assert_eq!(reply.response_to, 42);
        assert_eq!(reply.length, 0);
    }

    #[test]
    fn corrupted_crc_is_nacked() {
        let mut f = fixture();
        let mut frame = command_frame(&CommandPayload {
            command_type: CompanionCommandType::SetServiceSetPoint as u32,
            float1: 123.0,
            ..CommandPayload::default()
        });
        let last = frame.len() - 1;
        frame[last] ^= 0xFF; // Corrupt the payload under the CRC.
        feed(&f.ring, &frame);

        f.link.poll(&mut f.settings, &mut f.automations);

        // Setting untouched, nack sent.
        assert!((f.settings.target_service_temp() - 120.0).abs() < f32::EPSILON);
        let reply = last_reply_header(&f);
        assert_eq!(reply.message_type, MessageType::Nack);
        assert_eq!(reply.error, LinkError::InvalidChecksum);
    }

    #[test]
    fn wrong_length_is_nacked() {
        let mut f = fixture();
        let mut frame = command_frame(&CommandPayload::default());
        frame[22..26].copy_from_slice(&10u32.to_le_bytes()); // Bad declared length.
        feed(&f.ring, &frame);

        f.link.poll(&mut f.settings, &mut f.automations);

        let reply = last_reply_header(&f);
        assert_eq!(reply.message_type, MessageType::Nack);
        assert_eq!(reply.error, LinkError::UnexpectedLength);
    }

    #[test]
    fn ping_gets_pong() {
        let mut f = fixture();
        let header = MessageHeader {
            direction: LinkDirection::CompanionToController,
            id: 9,
            response_to: 0,
            message_type: MessageType::Ping,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: PING_PAYLOAD_LEN as u32,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&encode_ping_payload(PROTOCOL_VERSION));
        feed(&f.ring, &frame);

        f.link.poll(&mut f.settings, &mut f.automations);

        let reply = last_reply_header(&f);
        assert_eq!(reply.message_type, MessageType::Pong);
        assert_eq!(reply.response_to, 9);
    }

    #[test]
    fn ping_version_mismatch_is_nacked() {
        let mut f = fixture();
        let header = MessageHeader {
            direction: LinkDirection::CompanionToController,
            id: 9,
            response_to: 0,
            message_type: MessageType::Ping,
            error: LinkError::None,
            version: 0x0001,
            length: PING_PAYLOAD_LEN as u32,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&encode_ping_payload(0x0001));
        feed(&f.ring, &frame);

        f.link.poll(&mut f.settings, &mut f.automations);

        let reply = last_reply_header(&f);
        assert_eq!(reply.message_type, MessageType::Nack);
        assert_eq!(reply.error, LinkError::PingWrongVersion);
    }

    #[test]
    fn outbound_direction_frames_are_dropped() {
        let mut f = fixture();
        let header = MessageHeader {
            direction: LinkDirection::ControllerToCompanion,
            id: 1,
            response_to: 0,
            message_type: MessageType::SystemCommand,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: 0,
        };
        feed(&f.ring, &header.encode());

        f.link.poll(&mut f.settings, &mut f.automations);

        assert!(f.link.serial.writes.is_empty());
        assert!(f.ring.is_empty());
    }

    #[test]
    fn unsupported_types_clear_the_ring_silently() {
        let mut f = fixture();
        let header = MessageHeader {
            direction: LinkDirection::CompanionToController,
            id: 1,
            response_to: 0,
            message_type: MessageType::Pong,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: 4,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&[1, 2, 3, 4]);
        feed(&f.ring, &frame);

        f.link.poll(&mut f.settings, &mut f.automations);

        assert!(f.link.serial.writes.is_empty());
        assert!(f.ring.is_empty());
    }

    #[test]
    fn force_hard_bail_goes_through_command_queue() {
        let mut f = fixture();
        feed(
            &f.ring,
            &command_frame(&CommandPayload {
                command_type: CompanionCommandType::ForceHardBail as u32,
                ..CommandPayload::default()
            }),
        );

        f.link.poll(&mut f.settings, &mut f.automations);

        assert_eq!(f.commands.try_remove(), Some(SystemCommand::ForceHardBail));
    }

    #[test]
    fn enqueue_routine_reaches_automations() {
        let mut f = fixture();
        feed(
            &f.ring,
            &command_frame(&CommandPayload {
                command_type: CompanionCommandType::EnqueueRoutine as u32,
                int1: 5,
                ..CommandPayload::default()
            }),
        );

        f.link.poll(&mut f.settings, &mut f.automations);

        assert_eq!(f.automations.loaded_routine(), 5);
        assert_eq!(f.automations.current_step(), 1);
    }

    #[test]
    fn status_broadcast_succeeds_on_clean_ack() {
        let mut f = fixture();
        // The companion acks message id 1 (first id this link hands out).
        let ack = MessageHeader {
            direction: LinkDirection::CompanionToController,
            id: 77,
            response_to: 1,
            message_type: MessageType::Ack,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: 0,
        };
        f.link.serial.responses.push_back(ack.encode().to_vec());

        let ok = f
            .link
            .send_status(&StatusMessage::default(), [0.0; 3], 0, None, 0, 0);
        assert!(ok);
    }

    #[test]
    fn non_empty_ack_is_a_protocol_error() {
        let mut f = fixture();
        let mut bad_ack = MessageHeader {
            direction: LinkDirection::CompanionToController,
            id: 77,
            response_to: 1,
            message_type: MessageType::Ack,
            error: LinkError::None,
            version: PROTOCOL_VERSION,
            length: 2,
        }
        .encode()
        .to_vec();
        bad_ack.extend_from_slice(&[0, 0]);
        f.link.serial.responses.push_back(bad_ack);

        let ok = f
            .link
            .send_status(&StatusMessage::default(), [0.0; 3], 0, None, 0, 0);
        assert!(!ok);
    }

    #[test]
    fn missing_ack_times_out() {
        let mut f = fixture();
        let ok = f
            .link
            .send_status(&StatusMessage::default(), [0.0; 3], 0, None, 0, 0);
        assert!(!ok);
    }
}
