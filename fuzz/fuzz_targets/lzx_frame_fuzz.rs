#![no_main]
use libfuzzer_sys::fuzz_target;
use oxichm::lzx::LzxState;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a frame segment, decoded chained and from reset.
    let Ok(mut state) = LzxState::new(1 << 16) else {
        return;
    };
    let _ = state.decompress_frame(data, 0x8000);
    state.reset();
    let _ = state.decompress_frame(data, 0x1000);
});
