//! Fuzz target for frame reassembly
//!
//! Arbitrary byte streams, pushed in arbitrary pieces, must never panic and
//! must never yield a frame above the configured maximum.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use teeline_core::FrameBuffer;

#[derive(Debug, Arbitrary)]
struct Input {
    max_frame_size: u16,
    pieces: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let max = u64::from(input.max_frame_size);
    let mut buffer = FrameBuffer::with_max_frame_size(max);

    for piece in &input.pieces {
        match buffer.push(piece) {
            Ok(frames) => {
                for frame in frames {
                    assert!(frame.len() as u64 <= max);
                }
            }
            Err(_) => break,
        }
    }
});
