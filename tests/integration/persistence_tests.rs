//! Settings persistence across simulated reboots.

use std::sync::Arc;

use duetto::config::MachineSettings;
use duetto::controller::CommandQueue;
use duetto::settings::SettingsManager;
use duetto::sim::MemFlash;

fn manager(flash: MemFlash) -> SettingsManager<MemFlash> {
    SettingsManager::new(flash, Arc::new(CommandQueue::new()))
}

#[test]
fn settings_survive_a_reboot() {
    let flash = MemFlash::new(256);

    let mut first_boot = manager(flash.clone());
    first_boot.initialize(false);
    first_boot.set_target_brew_temp(92.5);
    first_boot.set_auto_sleep_minutes(90);
    first_boot.set_eco_mode(true);
    first_boot.write_if_changed();

    let mut second_boot = manager(flash);
    second_boot.initialize(false);
    assert!((second_boot.target_brew_temp() - 92.5).abs() < f32::EPSILON);
    assert_eq!(second_boot.auto_sleep_minutes(), 90);
    assert!(second_boot.eco_mode());
}

#[test]
fn corrupt_page_falls_back_to_defaults() {
    let flash = MemFlash::new(256);

    let mut first_boot = manager(flash.clone());
    first_boot.initialize(false);
    first_boot.set_target_brew_temp(92.5);
    first_boot.write_if_changed();

    // Flip one byte of the stored CRC.
    flash.flip_byte(2);

    let mut second_boot = manager(flash);
    second_boot.initialize(false);
    assert_eq!(*second_boot.settings(), MachineSettings::default());
}

#[test]
fn corrupt_payload_falls_back_to_defaults() {
    let flash = MemFlash::new(256);

    let mut first_boot = manager(flash.clone());
    first_boot.initialize(false);
    first_boot.set_auto_sleep_minutes(15);
    first_boot.write_if_changed();

    flash.flip_byte(30); // Somewhere inside the payload.

    let mut second_boot = manager(flash);
    second_boot.initialize(false);
    assert_eq!(*second_boot.settings(), MachineSettings::default());
}

#[test]
fn virgin_flash_yields_defaults_without_error() {
    let mut mgr = manager(MemFlash::new(256));
    mgr.initialize(false);
    assert_eq!(*mgr.settings(), MachineSettings::default());
}

#[test]
fn repeated_saves_do_not_rewrite_unchanged_pages() {
    let flash = MemFlash::new(256);
    let mut mgr = manager(flash.clone());
    mgr.initialize(false);
    mgr.set_target_service_temp(125.0);
    mgr.write_if_changed();

    let programs = flash.program_count();
    for _ in 0..10 {
        mgr.write_if_changed();
    }
    assert_eq!(flash.program_count(), programs);
}
