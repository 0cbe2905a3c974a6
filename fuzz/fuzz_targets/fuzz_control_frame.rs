//! Fuzz target: control-board frame validation and parsing.
//!
//! Arbitrary 18-byte frames must never panic the validator or the
//! parser, and the checksum fault bit must agree with a recomputation.
//!
//! cargo fuzz run fuzz_control_frame

#![no_main]

use libfuzzer_sys::fuzz_target;

use duetto::protocol::control_board::{
    ControlBoardFault, ControlBoardRawPacket, PACKET_LEN, parse, validate,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < PACKET_LEN {
        return;
    }
    let mut bytes = [0u8; PACKET_LEN];
    bytes.copy_from_slice(&data[..PACKET_LEN]);
    let raw = ControlBoardRawPacket::from_bytes(bytes);

    let error = validate(&raw);
    let mismatch = raw.computed_checksum() != raw.stored_checksum();
    let flagged = error & ControlBoardFault::InvalidChecksum.mask() != 0;
    assert_eq!(mismatch, flagged, "checksum bit disagrees with recomputation");

    // Parsing garbage may produce NaN temperatures but must not panic.
    let _ = parse(&raw);
});
