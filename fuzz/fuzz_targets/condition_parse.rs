#![no_main]

use libfuzzer_sys::fuzz_target;
use netdbg_core::{Condition, ConditionContext};

const MAX_CONDITION_BYTES: usize = 1024;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_CONDITION_BYTES)];
    let Ok(text) = std::str::from_utf8(capped) else {
        return;
    };

    // Parsing must never panic, and whatever parses must evaluate.
    if let Ok(condition) = Condition::parse(text) {
        for hit_count in [0u64, 1, 9, 10, u64::MAX] {
            let _ = condition.evaluate(&ConditionContext {
                hit_count,
                thread_id: 1,
            });
        }
    }
});
