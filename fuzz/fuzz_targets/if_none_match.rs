#![no_main]

use libfuzzer_sys::fuzz_target;
use nginx_markdown_filter::conditional::{
    ConditionalEvaluator, ConditionalMatch, normalize, parse_if_none_match,
};
use nginx_markdown_filter::config::ConditionalMode;

const GENERATED_ETAG: &[u8] = b"\"0123456789abcdef0123456789abcdef\"";

fuzz_target!(|data: &[u8]| {
    if let Ok(tags) = parse_if_none_match(data) {
        assert!(tags.len() <= data.len());
    }
    let _ = normalize(data);

    let evaluator = ConditionalEvaluator::new(ConditionalMode::FullSupport, true);
    let outcome = evaluator.evaluate(Some(data), GENERATED_ETAG);
    if data.is_empty() {
        assert_eq!(outcome, ConditionalMatch::NotApplicable);
    }
});
