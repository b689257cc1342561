#![no_main]

use libfuzzer_sys::fuzz_target;

use dtp_transport::codec::{DtpHeader, Packet};

/// The decoder must never panic on arbitrary bytes; it should return `Err`
/// for anything malformed, leaving no partial state behind.
fuzz_target!(|data: &[u8]| {
    let _ = DtpHeader::unpack(data);
    let _ = Packet::deserialize(data);
});
