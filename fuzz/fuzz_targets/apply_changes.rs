#![no_main]

use libfuzzer_sys::fuzz_target;

use manysync_core::DocumentEngine;
use manysync_core::memory::{MemoryChange, MemoryDoc, MemoryEngine};

fuzz_target!(|data: &[u8]| {
    let Ok(changes) = serde_json::from_slice::<Vec<MemoryChange>>(data) else {
        return;
    };
    let engine = MemoryEngine::new("fuzz");
    let empty = MemoryDoc::new("fuzz");

    let once = engine.apply_changes(&empty, &changes);
    let twice = engine.apply_changes(&once, &changes);
    assert_eq!(once, twice);
    assert!(once.clock().dominates(&engine.clock(&empty)));
});
