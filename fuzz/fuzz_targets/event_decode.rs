//! Fuzz target for event decoding
//!
//! Bytes from a remote peer must decode to `Ok` or `Err`, never panic or
//! allocate past the size limit.

#![no_main]

use libfuzzer_sys::fuzz_target;
use peerwire_core::{EventCodec, decode_event};

fuzz_target!(|data: &[u8]| {
    let _ = decode_event(data);

    // Small limit exercises the limit checks inside nested payloads
    let codec = EventCodec::new(256);
    if let Ok(envelope) = codec.decode(data) {
        let encoded = codec
            .encode(&envelope.event, envelope.object.as_ref())
            .expect("decoded event re-encodes");
        assert!(encoded.len() <= 256);
    }
});
