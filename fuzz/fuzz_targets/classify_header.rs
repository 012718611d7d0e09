#![no_main]
use libfuzzer_sys::fuzz_target;
use sip_parse::{classify, HeaderKind};

fuzz_target!(|data: &[u8]| {
    let (kind, comma) = classify(data);
    if kind != HeaderKind::Unknown {
        assert_eq!(classify(kind.name().as_bytes()), (kind, comma));
        assert_eq!(classify(&data.to_ascii_uppercase()).0, kind);
    }
});
