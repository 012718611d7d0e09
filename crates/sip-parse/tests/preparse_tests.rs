use proptest::prelude::*;
use sip_parse::{PreparseEvent, Preparser, Status};

const MESSAGE: &str = concat!(
    "INVITE sip:bob@biloxi.example.com SIP/2.0\r\n",
    "Via: SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bK776asdhds, SIP/2.0/TCP p.example.com;branch=z9hG4bK1\r\n",
    "Max-Forwards: 70\r\n",
    "To: Bob <sip:bob@biloxi.example.com>\r\n",
    "f: \"Alice, A.\" <sip:alice@atlanta.example.com>;tag=1928301774\r\n",
    "Call-ID: a84b4c76e66710@pc33.atlanta.example.com\r\n",
    "CSeq: 314159 INVITE\r\n",
    "Contact: <sip:alice@pc33.atlanta.example.com;x=\"a,b\">;q=0.7, \"Work, Main\" <sip:alice@work.example.com>\r\n",
    "Subject: lunch,\r\n  tomorrow?\r\n",
    "X-Empty:\r\n",
    "Authorization: Digest username=\"alice\", realm=\"atlanta.example.com\"\r\n",
    "Content-Length: 0\r\n",
    "\r\n",
);

fn single_pass(message: &[u8]) -> (Vec<PreparseEvent>, Status) {
    let mut buf = message.to_vec();
    let mut events = Vec::new();
    let progress = Preparser::new().process(&mut buf, &mut events);
    (events, progress.status)
}

/// Feeds `message` split at `cuts`, honouring the discard contract.
fn chunked(message: &[u8], cuts: &[usize]) -> (Vec<PreparseEvent>, Status) {
    let mut parser = Preparser::new();
    let mut events = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut last = Status::NONE;
    let mut start = 0;
    let mut bounds: Vec<usize> = cuts.iter().copied().filter(|c| *c < message.len()).collect();
    bounds.sort_unstable();
    bounds.dedup();
    bounds.push(message.len());

    for end in bounds {
        if end <= start {
            continue;
        }
        buf.extend_from_slice(&message[start..end]);
        start = end;
        let progress = parser.process(&mut buf, &mut events);
        assert!(progress.discard <= progress.used);
        assert!(progress.used <= buf.len());
        buf.drain(..progress.discard);
        last = progress.status;
    }
    (events, last)
}

fn header_values<'a>(events: &'a [PreparseEvent], name: &str) -> Vec<&'a [u8]> {
    events
        .iter()
        .filter_map(|e| match e {
            PreparseEvent::Header { name: n, value, .. } if n == name.as_bytes() => {
                Some(value.as_slice())
            }
            _ => None,
        })
        .collect()
}

#[test]
fn single_pass_reports_every_value() {
    let (events, status) = single_pass(MESSAGE.as_bytes());
    assert!(status.contains(Status::HEADERS_COMPLETE));
    assert!(!status.contains(Status::PREPARSE_ERROR));

    assert_eq!(header_values(&events, "Via").len(), 2);
    assert_eq!(
        header_values(&events, "Contact"),
        vec![
            b"<sip:alice@pc33.atlanta.example.com;x=\"a,b\">;q=0.7".as_slice(),
            b"\"Work, Main\" <sip:alice@work.example.com>".as_slice(),
        ]
    );
    assert_eq!(
        header_values(&events, "From"),
        vec![b"\"Alice, A.\" <sip:alice@atlanta.example.com>;tag=1928301774".as_slice()]
    );
    assert_eq!(header_values(&events, "Subject"), vec![b"lunch,    tomorrow?".as_slice()]);
    assert_eq!(header_values(&events, "X-Empty"), vec![b"".as_slice()]);
    assert_eq!(header_values(&events, "Authorization").len(), 1);
}

#[test]
fn every_two_way_split_matches_single_pass() {
    let (expected, _) = single_pass(MESSAGE.as_bytes());
    for cut in 1..MESSAGE.len() {
        let (events, status) = chunked(MESSAGE.as_bytes(), &[cut]);
        assert_eq!(events, expected, "split at {cut}");
        assert!(status.contains(Status::HEADERS_COMPLETE), "split at {cut}");
    }
}

#[test]
fn byte_at_a_time_matches_single_pass() {
    let (expected, _) = single_pass(MESSAGE.as_bytes());
    let cuts: Vec<usize> = (1..MESSAGE.len()).collect();
    let (events, status) = chunked(MESSAGE.as_bytes(), &cuts);
    assert_eq!(events, expected);
    assert!(status.contains(Status::HEADERS_COMPLETE));
}

proptest! {
    #[test]
    fn fragmentation_is_transparent(cuts in proptest::collection::vec(1usize..400, 0..12)) {
        let (expected, _) = single_pass(MESSAGE.as_bytes());
        let (events, status) = chunked(MESSAGE.as_bytes(), &cuts);
        prop_assert_eq!(events, expected);
        prop_assert!(status.contains(Status::HEADERS_COMPLETE));
    }

    #[test]
    fn bare_commas_split_bracketed_commas_do_not(
        parts in proptest::collection::vec("[a-z]{1,6}(,[a-z]{1,4})?", 1..5)
    ) {
        // Each value is bracketed, so commas inside must not split it.
        let values: Vec<String> = parts.iter().map(|p| format!("<sip:{p}@h>")).collect();
        let message = format!(
            "OPTIONS sip:a SIP/2.0\r\nRoute: {}\r\n\r\n",
            values.join(", ")
        );
        let (events, _) = single_pass(message.as_bytes());
        let routes: Vec<String> = header_values(&events, "Route")
            .into_iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        prop_assert_eq!(routes, values);
    }

    #[test]
    fn quoted_commas_do_not_split(name in "[A-Za-z ,]{0,12}") {
        let message = format!(
            "OPTIONS sip:a SIP/2.0\r\nContact: \"{name}\" <sip:x@h>, <sip:y@h>\r\n\r\n"
        );
        let (events, _) = single_pass(message.as_bytes());
        let contacts = header_values(&events, "Contact");
        prop_assert_eq!(contacts.len(), 2);
        let expected = format!("\"{name}\" <sip:x@h>");
        prop_assert_eq!(contacts[0], expected.as_bytes());
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut buf = bytes.clone();
        let mut events = Vec::new();
        let progress = Preparser::new().process(&mut buf, &mut events);
        prop_assert!(progress.discard <= progress.used);
        prop_assert!(progress.used <= bytes.len());
    }
}
