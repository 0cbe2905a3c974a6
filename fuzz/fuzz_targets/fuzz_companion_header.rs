//! Fuzz target: companion-link header and command payload decoding.
//!
//! cargo fuzz run fuzz_companion_header

#![no_main]

use libfuzzer_sys::fuzz_target;

use duetto::protocol::companion::{
    COMMAND_PAYLOAD_LEN, CommandPayload, HEADER_LEN, MessageHeader,
};

fuzz_target!(|data: &[u8]| {
    if data.len() >= HEADER_LEN {
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(&data[..HEADER_LEN]);
        if let Some(header) = MessageHeader::decode(&bytes) {
            // Anything that decodes must re-encode to the same bytes.
            assert_eq!(header.encode(), bytes);
        }
    }

    if data.len() >= COMMAND_PAYLOAD_LEN {
        let mut bytes = [0u8; COMMAND_PAYLOAD_LEN];
        bytes.copy_from_slice(&data[..COMMAND_PAYLOAD_LEN]);
        let payload = CommandPayload::decode(&bytes);
        let _ = payload.typed();
        let _ = payload.flow_mode();
    }
});
