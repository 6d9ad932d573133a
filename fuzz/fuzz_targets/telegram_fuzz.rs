//! Fuzz target: arbitrary bytes through the control and scan decoders.
//! Nothing may panic; malformed input must come back as an error or an invalid section.
//! Build with: cargo fuzz run telegram_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let _ = microscan3::Telegram::decode(data);

    let mut buffer = microscan3::TelegramBuffer::new();
    for chunk in data.chunks(7) {
        buffer.push(chunk);
        while let Ok(Some(_)) = buffer.next_telegram() {}
    }

    let _ = microscan3::decode_data(data, &microscan3::Features::all());

    let mut merger = microscan3::PacketMerger::new();
    for datagram in data.split(|&b| b == 0xA5) {
        let _ = merger.add_datagram(datagram);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run telegram_fuzz");
}
