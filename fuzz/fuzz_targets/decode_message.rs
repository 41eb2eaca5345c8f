#![no_main]

use libfuzzer_sys::fuzz_target;

use manysync_core::memory::MemoryChange;
use manysync_core::{DocMessage, Message};

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = serde_json::from_slice::<Message<serde_json::Value>>(data) {
        // Anything we accept must survive a re-encode unchanged.
        let text = serde_json::to_vec(&msg).expect("encode accepted message");
        let again: Message<serde_json::Value> =
            serde_json::from_slice(&text).expect("decode re-encoded message");
        assert_eq!(msg, again);
        assert!(msg.changes().is_none_or(|changes| !changes.is_empty()));
    }
    let _ = serde_json::from_slice::<DocMessage<MemoryChange>>(data);
});
