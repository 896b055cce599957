#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Open plus extract-everything over arbitrary bytes.
    // Corrupt containers must produce errors, never panics.
    if let Ok(mut chm) = oxichm::ChmExtractor::from_bytes(data.to_vec()) {
        let entries = chm.entries().to_vec();
        for entry in entries.iter().take(32) {
            let _ = chm.extract(entry);
        }
    }
});
