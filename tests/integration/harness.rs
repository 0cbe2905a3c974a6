//! Shared fixture: both execution contexts composed over the SPSC
//! queues, driven single-threaded by a virtual clock.

use std::sync::Arc;

use duetto::automations::Automations;
use duetto::controller::{CommandQueue, StatusQueue, SystemController};
use duetto::protocol::control_board::{self, ControlBoardParsedPacket};
use duetto::settings::SettingsManager;
use duetto::sim::{MemFlash, ScriptedSerial};
use duetto::status::StatusMessage;
use duetto::time::{Duration, TestClock};

pub struct System {
    pub controller: SystemController<ScriptedSerial, TestClock>,
    pub settings: SettingsManager<MemFlash>,
    pub automations: Automations<TestClock>,
    pub status_queue: Arc<StatusQueue>,
    pub command_queue: Arc<CommandQueue>,
    pub clock: TestClock,
    pub latest_status: StatusMessage,
}

impl System {
    pub fn new() -> Self {
        let clock = TestClock::new();
        let status_queue: Arc<StatusQueue> = Arc::new(StatusQueue::new());
        let command_queue: Arc<CommandQueue> = Arc::new(CommandQueue::new());

        let controller = SystemController::new(
            ScriptedSerial::new(),
            clock.clone(),
            Arc::clone(&status_queue),
            Arc::clone(&command_queue),
        );
        let settings = SettingsManager::new(MemFlash::new(256), Arc::clone(&command_queue));
        let automations = Automations::new(clock.clone(), Arc::clone(&command_queue), false, 0);

        Self {
            controller,
            settings,
            automations,
            status_queue,
            command_queue,
            clock,
            latest_status: StatusMessage::default(),
        }
    }

    /// Bring-up: persisted settings replayed, control loop started.
    pub fn start(&mut self) {
        self.settings.initialize(false);
        self.command_queue
            .try_add(duetto::command::SystemCommand::Begin)
            .unwrap();
        self.controller.tick(); // NotStartedYet tick applies Begin.
    }

    /// One composed 100 ms cycle: feed the controller a sensor frame,
    /// tick it, then let the supervisory side drain and react.
    pub fn cycle(&mut self, frame: &MachineFrame) {
        self.controller.serial_mut().push_frame(&frame.bytes());
        self.controller.tick();
        self.clock.advance(Duration::from_millis(100));

        while let Some(sm) = self.status_queue.try_remove() {
            self.latest_status = sm;
        }
        let sm = self.latest_status;
        self.automations.tick(&sm, &mut self.settings);
    }

    /// A cycle whose sensor read times out.
    pub fn cycle_dropped(&mut self) {
        self.controller.serial_mut().push_timeout();
        self.controller.tick();
        self.clock.advance(Duration::from_millis(100));
        while let Some(sm) = self.status_queue.try_remove() {
            self.latest_status = sm;
        }
        let sm = self.latest_status;
        self.automations.tick(&sm, &mut self.settings);
    }

    /// Run `n` identical cycles.
    pub fn run_cycles(&mut self, frame: &MachineFrame, n: usize) {
        for _ in 0..n {
            self.cycle(frame);
        }
    }

    /// The relay frame most recently written by the controller.
    pub fn last_relay_frame(&self) -> duetto::protocol::relay_board::RelayBoardParsedPacket {
        let bytes = self
            .controller
            .serial()
            .last_write()
            .expect("controller has written a relay frame");
        let mut raw = [0u8; duetto::protocol::relay_board::PACKET_LEN];
        raw.copy_from_slice(bytes);
        duetto::protocol::relay_board::convert_to_parsed(
            &duetto::protocol::relay_board::RelayBoardRawPacket::from_bytes(raw),
        )
    }
}

/// Builder for control-board sensor frames.
#[derive(Clone, Copy)]
pub struct MachineFrame {
    pub brew_temp: f32,
    pub service_temp: f32,
    pub brew_switch: bool,
    pub tank_empty: bool,
    pub service_low: bool,
}

impl MachineFrame {
    pub fn warm() -> Self {
        Self {
            brew_temp: 105.0,
            service_temp: 120.0,
            brew_switch: false,
            tank_empty: false,
            service_low: false,
        }
    }

    pub fn cold() -> Self {
        Self {
            brew_temp: 25.0,
            service_temp: 25.0,
            brew_switch: false,
            tank_empty: false,
            service_low: false,
        }
    }

    pub fn brewing(mut self) -> Self {
        self.brew_switch = true;
        self
    }

    pub fn tank_empty(mut self) -> Self {
        self.tank_empty = true;
        self
    }

    pub fn service_low(mut self) -> Self {
        self.service_low = true;
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        control_board::unparse(&ControlBoardParsedPacket {
            brew_boiler_temperature: self.brew_temp,
            service_boiler_temperature: self.service_temp,
            brew_switch: self.brew_switch,
            water_tank_empty: self.tank_empty,
            service_boiler_low: self.service_low,
        })
        .bytes
        .to_vec()
    }
}
