//! Fuzz target for prediction payload decoding.
//!
//! Arbitrary bytes must either be rejected as an invalid image or produce a
//! correctly shaped input tensor, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use gavid_core::engine::preprocess::{decode_image, HostPreprocessor};
use gavid_core::engine::INPUT_SIZE;

fuzz_target!(|data: &[u8]| {
    if let Ok(image) = decode_image(data) {
        // Skip decompression bombs; the engine is not the place to bound them.
        if (image.width() as u64) * (image.height() as u64) > 16 * 1024 * 1024 {
            return;
        }
        if let Ok(tensor) = HostPreprocessor::new(INPUT_SIZE).transform(&image) {
            let size = INPUT_SIZE as usize;
            assert_eq!(tensor.dims(), &[3, size, size]);
        }
    }
});
