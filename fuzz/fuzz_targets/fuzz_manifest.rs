#![no_main]
use libfuzzer_sys::fuzz_target;
use apkg_rs::core::manifest::{decode, encode};
use apkg_rs::ManifestFormat;

fuzz_target!(|data: &[u8]| {
    for format in [ManifestFormat::Legacy, ManifestFormat::Modern] {
        if let Ok(entries) = decode(data, format) {
            let bytes = encode(&entries, format).expect("decoded entries re-encode");
            let again = decode(&bytes, format).expect("encoded manifest decodes");
            assert_eq!(again.len(), entries.len());
        }
    }
});
