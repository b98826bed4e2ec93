#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use image_toolkit::{transform, Operation, OutputFormat, SourceImage, TransformRequest};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct RequestSeed {
    kind: u8,
    format: u8,
    width: Option<u16>,
    height: Option<u16>,
    maintain_aspect_ratio: bool,
    quality: f32,
}

impl RequestSeed {
    fn into_request(self) -> TransformRequest {
        let format = OutputFormat::ALL[self.format as usize % OutputFormat::ALL.len()];
        // Keep targets small so a run explores inputs rather than encoder time
        let clamp = |v: Option<u16>| v.map(|v| u32::from(v % 512));
        let operation = match self.kind % 3 {
            0 => Operation::Convert,
            1 => Operation::Resize {
                width: clamp(self.width),
                height: clamp(self.height),
                maintain_aspect_ratio: self.maintain_aspect_ratio,
            },
            _ => Operation::Optimize,
        };
        TransformRequest::new(operation, format).with_quality(self.quality)
    }
}

fuzz_target!(|data: &[u8]| {
    let mut unstructured = Unstructured::new(data);
    let seed = match RequestSeed::arbitrary(&mut unstructured) {
        Ok(seed) => seed,
        Err(_) => return,
    };
    let image_bytes = unstructured.take_rest();
    if image_bytes.is_empty() {
        return;
    }

    let source = SourceImage::new(image_bytes.to_vec(), "", "fuzz.bin");
    // Errors are expected; only panics or memory issues matter here.
    let _ = transform(&source, &seed.into_request());
});
