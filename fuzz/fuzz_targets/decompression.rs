#![no_main]

use libfuzzer_sys::fuzz_target;
use nginx_markdown_filter::decompression::{CompressionKind, DecompressionEngine};

const MAX_SIZE: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let kind = match selector % 3 {
        0 => CompressionKind::Gzip,
        1 => CompressionKind::Deflate,
        _ => CompressionKind::Brotli,
    };
    let engine = DecompressionEngine::new(MAX_SIZE);
    if let Ok(decoded) = engine.decompress(kind, body) {
        assert!(decoded.len() <= MAX_SIZE);
    }
});
