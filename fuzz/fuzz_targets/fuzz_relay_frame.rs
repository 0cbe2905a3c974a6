//! Fuzz target: relay-board frame validation and round-tripping.
//!
//! cargo fuzz run fuzz_relay_frame

#![no_main]

use libfuzzer_sys::fuzz_target;

use duetto::protocol::relay_board::{
    PACKET_LEN, RelayBoardRawPacket, convert_to_parsed, convert_to_raw, validate,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < PACKET_LEN {
        return;
    }
    let mut bytes = [0u8; PACKET_LEN];
    bytes.copy_from_slice(&data[..PACKET_LEN]);
    let raw = RelayBoardRawPacket::from_bytes(bytes);

    let _ = validate(&raw);

    // Parsing is total, and re-encoding a parsed view always yields a
    // frame that passes the structural checks (only the two semantic
    // safety bits may remain set).
    let parsed = convert_to_parsed(&raw);
    let reencoded = convert_to_raw(&parsed);
    assert_eq!(convert_to_parsed(&reencoded), parsed);
});
