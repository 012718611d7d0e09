// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental SIP header preparser.
//!
//! A byte-at-a-time state machine that splits a message head into its start
//! line and header name/value tokens without building any message structure.
//! It can stop at any byte and resume on the next call, which lets stream
//! transports feed it whatever a socket read returned.
//!
//! Every step looks up `(state, disposition, octet)` in a shared transition
//! table. The edge found names the next state and the work to do on the way:
//! extend the current token, report a header name or value, mark how far the
//! caller may drop bytes, and so on.
//!
//! # Buffer contract
//!
//! [`Preparser::process`] takes the caller's whole unconsumed buffer. The first
//! call starts at offset 0; each later call resumes where the previous one
//! stopped. On return [`Progress::discard`] bytes at the front of the buffer no
//! longer belong to any pending token. The caller must drop exactly that many
//! bytes (and may append new ones) before calling again; internal offsets are
//! already rebased to the shortened buffer.
//!
//! Values reported to the [`PreparseSink`] are borrowed for the duration of the
//! callback only.

use once_cell::sync::Lazy;
use tracing::trace;

use crate::header_kind::{classify, HeaderKind};
use crate::window::{rebase, Window};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const LWS: &[u8] = b" \t";

/// Machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    NewMsg,
    NewMsgCrLf,
    StartLine,
    StartLineCrLf,
    BuildHdr,
    EWSPostHdr,
    EWSPostColon,
    EmptyHdrCrLf,
    EmptyHdrCont,
    BuildData,
    BuildDataCrLf,
    CheckCont,
    CheckEndHdr,
    InQ,
    InQEsc,
    InAng,
    InAngQ,
    InAngQEsc,
    EndMsg,
}

const STATE_COUNT: usize = State::EndMsg as usize + 1;

/// How the value of the header being built is tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Disposition {
    /// The value runs to the end of the (unfolded) line.
    Continuous,
    /// Top-level commas end a value.
    CommaSep,
}

const DISPOSITION_COUNT: usize = 2;

// Edge work bits.
const ADD: u16 = 1 << 0;
const BACK: u16 = 1 << 1;
const FLINE: u16 = 1 << 2;
const RESET: u16 = 1 << 3;
const HDR: u16 = 1 << 4;
const DATA: u16 = 1 << 5;
const BAD: u16 = 1 << 6;
const END_HDRS: u16 = 1 << 7;
const DISCARD: u16 = 1 << 8;
const DISCARD_KNOWN: u16 = 1 << 9;
const FLATTEN: u16 = 1 << 10;

#[derive(Debug, Clone, Copy)]
struct Edge {
    next: State,
    work: u16,
}

/// The immutable transition table shared by every [`Preparser`].
pub struct TransitionTable {
    edges: Box<[[[Edge; 256]; DISPOSITION_COUNT]; STATE_COUNT]>,
}

static TABLE: Lazy<TransitionTable> = Lazy::new(TransitionTable::build);

/// The process-wide transition table, built on first use.
pub fn transition_table() -> &'static TransitionTable {
    &TABLE
}

enum On<'a> {
    Any,
    Byte(u8),
    Set(&'a [u8]),
}

impl TransitionTable {
    fn edge(&self, state: State, disposition: Disposition, octet: u8) -> Edge {
        self.edges[state as usize][disposition as usize][octet as usize]
    }

    fn set(
        &mut self,
        from: State,
        disposition: Option<Disposition>,
        on: On<'_>,
        next: State,
        work: u16,
    ) {
        let dispositions: &[Disposition] = match disposition {
            Some(Disposition::Continuous) => &[Disposition::Continuous],
            Some(Disposition::CommaSep) => &[Disposition::CommaSep],
            None => &[Disposition::Continuous, Disposition::CommaSep],
        };
        for d in dispositions {
            let row = &mut self.edges[from as usize][*d as usize];
            let edge = Edge { next, work };
            match on {
                On::Any => row.iter_mut().for_each(|e| *e = edge),
                On::Byte(b) => row[b as usize] = edge,
                On::Set(bytes) => bytes.iter().for_each(|b| row[*b as usize] = edge),
            }
        }
    }

    fn build() -> Self {
        use State::*;

        let idle = Edge {
            next: NewMsg,
            work: 0,
        };
        let mut t = TransitionTable {
            edges: Box::new([[[idle; 256]; DISPOSITION_COUNT]; STATE_COUNT]),
        };
        let comma_sep = Some(Disposition::CommaSep);

        // Later edges override earlier ones for the same octet.
        t.set(NewMsg, None, On::Any, StartLine, ADD);
        t.set(NewMsg, None, On::Byte(CR), NewMsgCrLf, 0);
        t.set(NewMsgCrLf, None, On::Any, EndMsg, BAD | DISCARD);
        t.set(NewMsgCrLf, None, On::Byte(LF), NewMsg, RESET | DISCARD);

        t.set(StartLine, None, On::Any, StartLine, ADD);
        t.set(StartLine, None, On::Byte(CR), StartLineCrLf, 0);
        t.set(StartLineCrLf, None, On::Any, EndMsg, BAD | DISCARD);
        t.set(StartLineCrLf, None, On::Byte(LF), BuildHdr, RESET | FLINE | DISCARD);

        t.set(BuildHdr, None, On::Any, BuildHdr, ADD);
        t.set(BuildHdr, None, On::Set(LWS), EWSPostHdr, 0);
        t.set(BuildHdr, None, On::Byte(b':'), EWSPostColon, HDR | RESET | DISCARD_KNOWN);
        // A bare CRLF where a header name should start ends the head.
        t.set(BuildHdr, None, On::Byte(CR), CheckEndHdr, RESET | DISCARD);
        t.set(EWSPostHdr, None, On::Any, EndMsg, BAD | DISCARD);
        t.set(EWSPostHdr, None, On::Set(LWS), EWSPostHdr, 0);
        t.set(EWSPostHdr, None, On::Byte(b':'), EWSPostColon, HDR | RESET | DISCARD_KNOWN);

        t.set(EWSPostColon, None, On::Any, BuildData, ADD);
        t.set(EWSPostColon, None, On::Set(LWS), EWSPostColon, RESET | DISCARD_KNOWN);
        t.set(EWSPostColon, None, On::Byte(CR), EmptyHdrCrLf, RESET | DISCARD_KNOWN);
        t.set(EmptyHdrCrLf, None, On::Any, EndMsg, BAD | DISCARD);
        t.set(EmptyHdrCrLf, None, On::Byte(LF), EmptyHdrCont, RESET | DISCARD_KNOWN);
        t.set(EmptyHdrCont, None, On::Any, BuildHdr, RESET | BACK | DISCARD | DATA);
        t.set(EmptyHdrCont, None, On::Set(LWS), EWSPostColon, RESET | DISCARD_KNOWN);
        t.set(EmptyHdrCont, None, On::Byte(CR), CheckEndHdr, DATA | RESET | DISCARD);

        // Quoted or bracketed values skip straight into their own states.
        t.set(EWSPostColon, comma_sep, On::Byte(b'<'), InAng, ADD);
        t.set(EWSPostColon, comma_sep, On::Byte(b'"'), InQ, ADD);

        t.set(BuildData, None, On::Any, BuildData, ADD);
        t.set(BuildData, None, On::Byte(CR), BuildDataCrLf, 0);
        t.set(BuildDataCrLf, None, On::Any, EndMsg, BAD | DISCARD);
        t.set(BuildDataCrLf, None, On::Byte(LF), CheckCont, 0);

        // Report the value first, then back up so BuildHdr sees the byte.
        t.set(CheckCont, None, On::Any, BuildHdr, DATA | RESET | BACK | DISCARD);
        t.set(CheckCont, None, On::Set(LWS), BuildData, ADD | FLATTEN);
        t.set(CheckCont, None, On::Byte(CR), CheckEndHdr, DATA | RESET | DISCARD);
        t.set(CheckEndHdr, None, On::Any, EndMsg, BAD | DISCARD);
        t.set(CheckEndHdr, None, On::Byte(LF), EndMsg, END_HDRS | DISCARD);

        t.set(BuildData, comma_sep, On::Byte(b'<'), InAng, ADD);
        t.set(InAng, None, On::Any, InAng, ADD);
        t.set(InAng, None, On::Byte(b'>'), BuildData, ADD);
        t.set(InAng, None, On::Byte(b'"'), InAngQ, ADD);
        t.set(InAngQ, None, On::Any, InAngQ, ADD);
        t.set(InAngQ, None, On::Byte(b'"'), InAng, ADD);
        t.set(InAngQ, None, On::Byte(b'\\'), InAngQEsc, ADD);
        t.set(InAngQEsc, None, On::Any, InAngQ, ADD);

        t.set(BuildData, comma_sep, On::Byte(b'"'), InQ, ADD);
        t.set(InQ, None, On::Any, InQ, ADD);
        t.set(InQ, None, On::Byte(b'"'), BuildData, ADD);
        t.set(InQ, None, On::Byte(b'\\'), InQEsc, ADD);
        t.set(InQEsc, None, On::Any, InQ, ADD);

        t.set(BuildData, comma_sep, On::Byte(b','), EWSPostColon, DATA | RESET | DISCARD_KNOWN);

        t
    }
}

/// Status bits returned by [`Preparser::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status(u8);

impl Status {
    pub const NONE: Status = Status(0);
    /// The call ended inside a token; bytes after `discard` must be kept.
    pub const FRAGMENTED: Status = Status(1 << 0);
    /// At least one start line or header value was reported.
    pub const DATA_ASSIGNED: Status = Status(1 << 1);
    /// Malformed input. The message is abandoned.
    pub const PREPARSE_ERROR: Status = Status(1 << 2);
    /// The blank line ending the head was consumed; the body starts at `used`.
    pub const HEADERS_COMPLETE: Status = Status(1 << 3);

    pub fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: Status) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: Status) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

/// Outcome of one [`Preparser::process`] call. Offsets are relative to the
/// buffer passed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub status: Status,
    /// Bytes examined.
    pub used: usize,
    /// Leading bytes the caller must drop before the next call.
    pub discard: usize,
}

/// Receives tokens as the preparser completes them.
pub trait PreparseSink {
    fn on_start_line(&mut self, line: &[u8]);

    /// `name` is the canonical name for known kinds and the bytes as
    /// received otherwise.
    fn on_header(&mut self, kind: HeaderKind, name: &[u8], value: &[u8]);
}

/// Owned copy of a preparser callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparseEvent {
    StartLine(Vec<u8>),
    Header {
        kind: HeaderKind,
        name: Vec<u8>,
        value: Vec<u8>,
    },
}

impl PreparseSink for Vec<PreparseEvent> {
    fn on_start_line(&mut self, line: &[u8]) {
        self.push(PreparseEvent::StartLine(line.to_vec()));
    }

    fn on_header(&mut self, kind: HeaderKind, name: &[u8], value: &[u8]) {
        self.push(PreparseEvent::Header {
            kind,
            name: name.to_vec(),
            value: value.to_vec(),
        });
    }
}

/// Per-connection preparser state.
pub struct Preparser {
    table: &'static TransitionTable,
    state: State,
    disposition: Disposition,
    anchor: Window,
    header: Window,
    kind: HeaderKind,
    resume: usize,
}

impl Default for Preparser {
    fn default() -> Self {
        Self::new()
    }
}

impl Preparser {
    pub fn new() -> Self {
        Self::with_table(transition_table())
    }

    pub fn with_table(table: &'static TransitionTable) -> Self {
        Self {
            table,
            state: State::NewMsg,
            disposition: Disposition::Continuous,
            anchor: Window::default(),
            header: Window::default(),
            kind: HeaderKind::Unknown,
            resume: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Offset in the (rebased) buffer where the next call resumes.
    pub fn resume_offset(&self) -> usize {
        self.resume
    }

    /// Returns to the start-of-message state.
    pub fn reset(&mut self) {
        self.state = State::NewMsg;
        self.disposition = Disposition::Continuous;
        self.anchor = Window::default();
        self.header = Window::default();
        self.kind = HeaderKind::Unknown;
        self.resume = 0;
    }

    /// Runs the machine over `buf` from the resume offset until the buffer
    /// is exhausted or the message head ends (or turns out malformed).
    ///
    /// A call made after a terminal state restarts the machine at offset 0,
    /// so the caller must have removed the previous message (head and body)
    /// from the front of `buf` first.
    pub fn process<S: PreparseSink + ?Sized>(&mut self, buf: &mut [u8], sink: &mut S) -> Progress {
        if self.state == State::EndMsg {
            trace!("preparser restarting");
            self.reset();
        }

        let mut status = Status::NONE;
        let mut discard = 0;
        let mut t = self.resume.min(buf.len());

        while t < buf.len() && self.state != State::EndMsg {
            let edge = self.table.edge(self.state, self.disposition, buf[t]);
            trace!(state = ?self.state, octet = buf[t], next = ?edge.next, work = edge.work, "edge");

            if edge.work & ADD != 0 {
                self.anchor.end = t + 1;
            }

            if edge.work & FLATTEN != 0 && t >= 2 {
                buf[t - 2] = b' ';
                buf[t - 1] = b' ';
            }

            if edge.work & HDR != 0 {
                self.header = self.anchor;
                let (kind, comma) = classify(self.header.slice(buf));
                self.kind = kind;
                self.disposition = if comma {
                    Disposition::CommaSep
                } else {
                    Disposition::Continuous
                };
            }

            if edge.work & DATA != 0 {
                let value = trim_trailing_lws(self.anchor.slice(buf));
                if self.kind.is_known() {
                    sink.on_header(self.kind, self.kind.name().as_bytes(), value);
                } else {
                    sink.on_header(self.kind, self.header.slice(buf), value);
                }
                status.insert(Status::DATA_ASSIGNED);
            }

            if edge.work & FLINE != 0 {
                sink.on_start_line(self.anchor.slice(buf));
                status.insert(Status::DATA_ASSIGNED);
            }

            if edge.work & BACK != 0 {
                // BACK is never paired with BAD, so the increment below
                // restores `t`.
                t = t.wrapping_sub(1);
            }

            if edge.work & BAD != 0 {
                status.insert(Status::PREPARSE_ERROR);
            } else {
                t = t.wrapping_add(1);
            }

            if edge.work & DISCARD != 0 || (edge.work & DISCARD_KNOWN != 0 && self.kind.is_known()) {
                discard = t;
                status.remove(Status::FRAGMENTED);
            } else {
                status.insert(Status::FRAGMENTED);
            }

            self.state = edge.next;

            if edge.work & END_HDRS != 0 {
                status.insert(Status::HEADERS_COMPLETE);
            }

            if edge.work & RESET != 0 {
                self.anchor = Window::at(t);
            }
        }

        self.anchor = rebase(self.anchor, discard);
        self.header = rebase(self.header, discard);
        self.resume = t - discard;

        Progress {
            status,
            used: t,
            discard,
        }
    }
}

fn trim_trailing_lws(value: &[u8]) -> &[u8] {
    let end = value
        .iter()
        .rposition(|b| !LWS.contains(b))
        .map_or(0, |i| i + 1);
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> (Vec<PreparseEvent>, Progress) {
        let mut buf = input.as_bytes().to_vec();
        let mut events = Vec::new();
        let progress = Preparser::new().process(&mut buf, &mut events);
        (events, progress)
    }

    fn headers(events: &[PreparseEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                PreparseEvent::Header { name, value, .. } => Some((
                    String::from_utf8_lossy(name).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                )),
                _ => None,
            })
            .collect()
    }

    fn pair(name: &str, value: &str) -> (String, String) {
        (name.to_owned(), value.to_owned())
    }

    #[test]
    fn splits_start_line_and_headers() {
        let input = "INVITE sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP a;branch=z9hG4bK1\r\nMax-Forwards: 70\r\n\r\nbody";
        let (events, progress) = run(input);
        assert_eq!(
            events[0],
            PreparseEvent::StartLine(b"INVITE sip:bob@example.com SIP/2.0".to_vec())
        );
        assert_eq!(
            headers(&events),
            vec![
                pair("Via", "SIP/2.0/UDP a;branch=z9hG4bK1"),
                pair("Max-Forwards", "70")
            ]
        );
        assert!(progress.status.contains(Status::HEADERS_COMPLETE));
        assert!(progress.status.contains(Status::DATA_ASSIGNED));
        assert!(!progress.status.contains(Status::PREPARSE_ERROR));
        assert_eq!(&input[progress.used..], "body");
        assert_eq!(progress.discard, progress.used);
    }

    #[test]
    fn empty_value_is_reported() {
        let (events, _) = run("OPTIONS sip:a SIP/2.0\r\nSubject:\r\nTo: <sip:a>\r\n\r\n");
        assert_eq!(
            headers(&events),
            vec![pair("Subject", ""), pair("To", "<sip:a>")]
        );
    }

    #[test]
    fn empty_last_value_before_blank_line() {
        let (events, progress) = run("OPTIONS sip:a SIP/2.0\r\nSubject:\r\n\r\n");
        assert_eq!(headers(&events), vec![pair("Subject", "")]);
        assert!(progress.status.contains(Status::HEADERS_COMPLETE));
    }

    #[test]
    fn message_without_headers_completes() {
        let (events, progress) = run("OPTIONS sip:a SIP/2.0\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert!(progress.status.contains(Status::HEADERS_COMPLETE));
    }

    #[test]
    fn compact_and_unknown_names() {
        let (events, _) = run("OPTIONS sip:a SIP/2.0\r\nv: SIP/2.0/TCP h\r\nX-Thing :  yes  \r\n\r\n");
        assert_eq!(
            headers(&events),
            vec![pair("Via", "SIP/2.0/TCP h"), pair("X-Thing", "yes")]
        );
        match &events[2] {
            PreparseEvent::Header { kind, .. } => assert_eq!(*kind, HeaderKind::Unknown),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn folded_value_is_flattened() {
        let (events, _) = run("OPTIONS sip:a SIP/2.0\r\nSubject: hello\r\n world\r\n\r\n");
        assert_eq!(headers(&events), vec![pair("Subject", "hello   world")]);
    }

    #[test]
    fn comma_tokenizing_respects_quotes_and_brackets() {
        let (events, _) = run(concat!(
            "OPTIONS sip:a SIP/2.0\r\n",
            "Contact: \"Doe, John\" <sip:j@h;x=\"a,b\">, <sip:k@h>;q=0.5 ,sip:m@h\r\n",
            "Subject: one, two\r\n",
            "\r\n"
        ));
        assert_eq!(
            headers(&events),
            vec![
                pair("Contact", "\"Doe, John\" <sip:j@h;x=\"a,b\">"),
                pair("Contact", "<sip:k@h>;q=0.5"),
                pair("Contact", "sip:m@h"),
                pair("Subject", "one, two"),
            ]
        );
    }

    #[test]
    fn escaped_quote_stays_inside_string() {
        let (events, _) = run("OPTIONS sip:a SIP/2.0\r\nContact: \"a\\\",b\" <sip:x>, <sip:y>\r\n\r\n");
        assert_eq!(
            headers(&events),
            vec![
                pair("Contact", "\"a\\\",b\" <sip:x>"),
                pair("Contact", "<sip:y>")
            ]
        );
    }

    #[test]
    fn credentials_are_not_split() {
        let (events, _) = run(
            "OPTIONS sip:a SIP/2.0\r\nAuthorization: Digest username=\"a\", realm=\"b\", nonce=\"c\"\r\n\r\n",
        );
        assert_eq!(headers(&events).len(), 1);
    }

    #[test]
    fn bare_cr_is_an_error() {
        let (_, progress) = run("OPTIONS sip:a SIP/2.0\r\nVia: x\rY\r\n\r\n");
        assert!(progress.status.contains(Status::PREPARSE_ERROR));
        assert!(!progress.status.contains(Status::HEADERS_COMPLETE));
    }

    #[test]
    fn whitespace_inside_header_name_is_an_error() {
        let (_, progress) = run("OPTIONS sip:a SIP/2.0\r\nVia x: y\r\n\r\n");
        assert!(progress.status.contains(Status::PREPARSE_ERROR));
    }

    #[test]
    fn leading_crlf_keepalives_are_discarded() {
        let (events, progress) = run("\r\n\r\nOPTIONS sip:a SIP/2.0\r\nTo: b\r\n\r\n");
        assert_eq!(events[0], PreparseEvent::StartLine(b"OPTIONS sip:a SIP/2.0".to_vec()));
        assert!(progress.status.contains(Status::HEADERS_COMPLETE));
    }

    #[test]
    fn fragmented_resume_keeps_token() {
        let mut parser = Preparser::new();
        let mut events = Vec::new();

        let mut buf = b"OPTIONS sip:a SIP/2.0\r\nContent-Le".to_vec();
        let first = parser.process(&mut buf, &mut events);
        assert!(first.status.contains(Status::FRAGMENTED));
        assert_eq!(first.used, buf.len());
        // Discard stops at the start of the partial header name.
        assert_eq!(first.discard, "OPTIONS sip:a SIP/2.0\r\n".len());

        let mut rest = buf.split_off(first.discard);
        rest.extend_from_slice(b"ngth: 0\r\n\r\n");
        let second = parser.process(&mut rest, &mut events);
        assert!(second.status.contains(Status::HEADERS_COMPLETE));
        assert_eq!(headers(&events), vec![pair("Content-Length", "0")]);
    }

    #[test]
    fn restarts_after_end_of_message() {
        let mut parser = Preparser::new();
        let mut events = Vec::new();
        let mut first = b"OPTIONS sip:a SIP/2.0\r\nTo: a\r\n\r\n".to_vec();
        parser.process(&mut first, &mut events);
        assert_eq!(parser.state(), State::EndMsg);

        let mut second = b"OPTIONS sip:b SIP/2.0\r\nTo: b\r\n\r\n".to_vec();
        let progress = parser.process(&mut second, &mut events);
        assert!(progress.status.contains(Status::HEADERS_COMPLETE));
        assert_eq!(headers(&events), vec![pair("To", "a"), pair("To", "b")]);
    }

    #[test]
    fn trim_only_strips_trailing_whitespace() {
        assert_eq!(trim_trailing_lws(b" a b \t "), b" a b");
        assert_eq!(trim_trailing_lws(b"   "), b"");
    }
}
