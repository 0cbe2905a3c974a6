//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below exercises a composed slice of the firmware against
//! the scripted serial and virtual clock from `duetto::sim` /
//! `duetto::time`. Everything runs on the host with no real hardware
//! and no wall-clock waits.

mod companion_tests;
mod harness;
mod liveness_tests;
mod persistence_tests;
mod routine_tests;
mod system_tests;
