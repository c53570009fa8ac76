#![no_main]

use channel_relay::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Whole-buffer decode must never panic; anything it accepts must re-encode identically
    if let Ok(packet) = Packet::from_bytes(data) {
        let bytes = packet.to_bytes().expect("decoded packet must re-encode");
        assert_eq!(&bytes[..], data);
    }
});
