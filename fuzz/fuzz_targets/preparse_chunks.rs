// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![no_main]
use libfuzzer_sys::fuzz_target;
use sip_parse::{parse_datagram, StreamFramer};

// First byte picks the chunk size; framing must match the one-shot parse.
fuzz_target!(|data: &[u8]| {
    let Some((&split, data)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut framer = StreamFramer::new();
    let mut frames = Vec::new();
    for piece in data.chunks(chunk) {
        framer.push(piece);
        loop {
            match framer.next_message() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }

    let mut whole = StreamFramer::new();
    whole.push(data);
    let mut expected = Vec::new();
    loop {
        match whole.next_message() {
            Ok(Some(frame)) => expected.push(frame),
            Ok(None) => break,
            Err(_) => return,
        }
    }
    assert_eq!(frames, expected);

    let _ = parse_datagram(data);
});
