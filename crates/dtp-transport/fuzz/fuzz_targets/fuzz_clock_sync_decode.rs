#![no_main]

use libfuzzer_sys::fuzz_target;

use dtp_transport::clock_sync::SyncPacket;

fuzz_target!(|data: &[u8]| {
    let _ = SyncPacket::unpack(data);
});
