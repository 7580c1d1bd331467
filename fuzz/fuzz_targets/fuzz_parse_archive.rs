#![no_main]
use libfuzzer_sys::fuzz_target;
use apkg_rs::{parse_archive_with, EngineConfig};

// Malformed packages must fail with an error, never panic. A small
// decompression bound keeps zstd bombs cheap.

fuzz_target!(|data: &[u8]| {
    let config = EngineConfig {
        max_decompressed_size: 16 * 1024 * 1024,
        ..EngineConfig::default()
    };
    if let Ok(col) = parse_archive_with(data, &config) {
        // Anything that parses must export again
        let _ = apkg_rs::export_collection(&col, None);
    }
});
