//! Wire protocol codecs for the three serial links.
//!
//! - [`control_board`]: 18-byte sensor frames from the analog control
//!   board (temperatures, brew switch, tank and boiler levels).
//! - [`relay_board`]: 5-byte actuator frames to the relay/solenoid board.
//! - [`companion`]: variable-length framed messages exchanged with the
//!   supervisory Wi-Fi/UI module.

pub mod companion;
pub mod control_board;
pub mod relay_board;
