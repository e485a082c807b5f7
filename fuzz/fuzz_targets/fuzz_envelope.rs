#![no_main]

use bytes::Bytes;
use inkstream::storage::StreamEntry;
use inkstream::{Message, StreamEntryId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Entry IDs arrive as text from the store; parsing must never panic
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(id) = StreamEntryId::parse(s) {
            assert_eq!(StreamEntryId::parse(&id.to_string()), Some(id));
        }
    }

    // Split the input into field/value pairs at NUL bytes and decode it as
    // an envelope written by an arbitrary producer.
    let parts: Vec<Bytes> = data
        .split(|b| *b == 0)
        .map(Bytes::copy_from_slice)
        .collect();
    let fields = parts
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair.get(1).cloned().unwrap_or_default()))
        .collect();
    let entry = StreamEntry {
        id: StreamEntryId::new(1, 0),
        fields,
    };
    let message = Message::from_entry("fuzz", entry, 1);
    let _ = message.to_fields();
});
