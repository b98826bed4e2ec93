#![no_main]

use image_toolkit::engine::decode_image;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let _ = decode_image(data);
});
