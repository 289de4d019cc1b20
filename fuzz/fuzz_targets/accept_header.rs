#![no_main]

use libfuzzer_sys::fuzz_target;
use nginx_markdown_filter::accept;

fuzz_target!(|data: &[u8]| {
    let header = String::from_utf8_lossy(data);
    let entries = accept::parse_accept(&header);
    for entry in &entries {
        assert!(entry.q_millis <= 1000);
    }
    let strict = accept::resolve(&header, false);
    let lenient = accept::resolve(&header, true);
    // Allowing wildcards can only widen the set of accepted headers
    assert!(!strict || lenient);
});
