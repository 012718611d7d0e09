//! Message framing on top of the preparser.
//!
//! [`StreamFramer`] turns the byte stream of a TCP/TLS connection into
//! complete messages, keeping only the bytes the preparser still needs between
//! reads. [`parse_datagram`] frames a single UDP datagram.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use sip_core::Headers;
use sip_observe::core_metrics;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::preparse::{PreparseSink, Preparser, Status};
use crate::HeaderKind;

/// Upper bound on buffered bytes for one message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The preparser rejected the head. Stream transports should close.
    Malformed,
    /// The datagram ended before the blank line closing the head.
    Incomplete,
    InvalidContentLength(SmolStr),
    /// A datagram carried fewer body bytes than its Content-Length.
    Truncated { expected: usize, available: usize },
    MessageTooLarge { limit: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Malformed => write!(f, "malformed message head"),
            FrameError::Incomplete => write!(f, "message head is incomplete"),
            FrameError::InvalidContentLength(v) => write!(f, "invalid Content-Length: {}", v),
            FrameError::Truncated {
                expected,
                available,
            } => write!(
                f,
                "body truncated: Content-Length {} but {} bytes available",
                expected, available
            ),
            FrameError::MessageTooLarge { limit } => {
                write!(f, "message exceeds {} bytes", limit)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// A message split into start line, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedMessage {
    pub start_line: SmolStr,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct HeadCollector {
    start_line: Option<SmolStr>,
    headers: Headers,
}

impl PreparseSink for HeadCollector {
    fn on_start_line(&mut self, line: &[u8]) {
        self.start_line = Some(SmolStr::new(String::from_utf8_lossy(line)));
    }

    fn on_header(&mut self, _kind: HeaderKind, name: &[u8], value: &[u8]) {
        self.headers.push(
            SmolStr::new(String::from_utf8_lossy(name)),
            SmolStr::new(String::from_utf8_lossy(value)),
        );
    }
}

impl HeadCollector {
    fn finish(self, body: Bytes) -> Result<FramedMessage, FrameError> {
        let start_line = self.start_line.ok_or(FrameError::Malformed)?;
        Ok(FramedMessage {
            start_line,
            headers: self.headers,
            body,
        })
    }
}

fn content_length(headers: &Headers) -> Result<Option<usize>, FrameError> {
    match headers.get(HeaderKind::ContentLength.name()) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| FrameError::InvalidContentLength(raw.clone())),
    }
}

/// Incremental framer for one stream connection.
#[derive(Default)]
pub struct StreamFramer {
    buf: BytesMut,
    preparser: Preparser,
    head: HeadCollector,
    body_len: Option<usize>,
    max_message_size: Option<usize>,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(limit: usize) -> Self {
        Self {
            max_message_size: Some(limit),
            ..Self::default()
        }
    }

    /// Appends bytes read from the connection.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access for `read_buf` style reads.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes held for a message that is not complete yet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete message, `Ok(None)` when more bytes are
    /// needed. After an error the framer is reset and the stream should be
    /// closed.
    pub fn next_message(&mut self) -> Result<Option<FramedMessage>, FrameError> {
        let result = self.advance();
        if result.is_err() {
            core_metrics().on_preparse_error("stream");
            self.reset();
        }
        result
    }

    /// Drains every complete message currently buffered.
    pub fn drain_frames(&mut self) -> Result<Vec<FramedMessage>, FrameError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_message()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.preparser.reset();
        self.head = HeadCollector::default();
        self.body_len = None;
    }

    fn advance(&mut self) -> Result<Option<FramedMessage>, FrameError> {
        loop {
            if let Some(len) = self.body_len {
                if self.buf.len() < len {
                    return Ok(None);
                }
                let body = self.buf.split_to(len).freeze();
                self.body_len = None;
                let message = std::mem::take(&mut self.head).finish(body)?;
                core_metrics().on_message_framed("stream");
                return Ok(Some(message));
            }

            let progress = self.preparser.process(&mut self.buf[..], &mut self.head);
            self.buf.advance(progress.discard);

            if progress.status.contains(Status::PREPARSE_ERROR) {
                warn!(used = progress.used, "preparse error on stream");
                return Err(FrameError::Malformed);
            }

            if progress.status.contains(Status::HEADERS_COMPLETE) {
                let len = content_length(&self.head.headers)?.unwrap_or(0);
                if let Some(limit) = self.max_message_size {
                    if len > limit {
                        return Err(FrameError::MessageTooLarge { limit });
                    }
                }
                debug!(body_len = len, "stream head complete");
                self.body_len = Some(len);
                continue;
            }

            if let Some(limit) = self.max_message_size {
                if self.buf.len() > limit {
                    return Err(FrameError::MessageTooLarge { limit });
                }
            }
            return Ok(None);
        }
    }
}

/// Frames one datagram. Without Content-Length the body is the rest of the
/// datagram; with it, extra bytes are ignored.
pub fn parse_datagram(data: &[u8]) -> Result<FramedMessage, FrameError> {
    let mut buf = data.to_vec();
    let mut head = HeadCollector::default();
    let progress = Preparser::new().process(&mut buf, &mut head);

    if progress.status.contains(Status::PREPARSE_ERROR) {
        core_metrics().on_preparse_error("datagram");
        return Err(FrameError::Malformed);
    }
    if !progress.status.contains(Status::HEADERS_COMPLETE) {
        return Err(FrameError::Incomplete);
    }

    let rest = &buf[progress.used..];
    let body = match content_length(&head.headers)? {
        None => rest,
        Some(len) if len <= rest.len() => &rest[..len],
        Some(len) => {
            return Err(FrameError::Truncated {
                expected: len,
                available: rest.len(),
            })
        }
    };
    let message = head.finish(Bytes::copy_from_slice(body))?;
    core_metrics().on_message_framed("datagram");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_multiple_frames_and_bodies() {
        let msg1 = b"OPTIONS sip:a SIP/2.0\r\nContent-Length: 4\r\n\r\nbody";
        let msg2 = b"SIP/2.0 200 OK\r\nl: 0\r\n\r\n";
        let mut framer = StreamFramer::new();
        framer.push(&[msg1.as_slice(), msg2.as_slice()].concat());

        let frames = framer.drain_frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].start_line, "OPTIONS sip:a SIP/2.0");
        assert_eq!(frames[0].body.as_ref(), b"body");
        assert_eq!(frames[1].start_line, "SIP/2.0 200 OK");
        assert_eq!(frames[1].headers.get("Content-Length").unwrap(), "0");
        assert!(frames[1].body.is_empty());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn waits_for_partial_body() {
        let mut framer = StreamFramer::new();
        framer.push(b"OPTIONS sip:a SIP/2.0\r\nContent-Length: 5\r\n\r\nhi");
        assert!(framer.next_message().unwrap().is_none());
        framer.push(b"!!!");
        let frame = framer.next_message().unwrap().unwrap();
        assert_eq!(frame.body.as_ref(), b"hi!!!");
    }

    #[test]
    fn byte_at_a_time_feed() {
        let input = b"\r\nINVITE sip:b@h SIP/2.0\r\nVia: SIP/2.0/TCP h;branch=z9hG4bKx\r\nSubject: a\r\n b\r\nContent-Length: 2\r\n\r\nok";
        let mut framer = StreamFramer::new();
        let mut frames = Vec::new();
        for byte in input {
            framer.push(&[*byte]);
            frames.extend(framer.drain_frames().unwrap());
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].headers.get("Subject").unwrap(), "a   b");
        assert_eq!(frames[0].body.as_ref(), b"ok");
    }

    #[test]
    fn keepalive_only_is_dropped() {
        let mut framer = StreamFramer::new();
        framer.push(b"\r\n\r\n");
        assert!(framer.next_message().unwrap().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn malformed_head_resets_framer() {
        let mut framer = StreamFramer::new();
        framer.push(b"OPTIONS sip:a SIP/2.0\r\nBad Header: x\r\n\r\n");
        assert_eq!(framer.next_message(), Err(FrameError::Malformed));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut framer = StreamFramer::with_max_message_size(32);
        framer.push(b"OPTIONS sip:a SIP/2.0\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(
            framer.next_message(),
            Err(FrameError::MessageTooLarge { limit: 32 })
        );
    }

    #[test]
    fn datagram_body_without_length_is_remainder() {
        let frame = parse_datagram(b"MESSAGE sip:a SIP/2.0\r\nTo: a\r\n\r\nhello").unwrap();
        assert_eq!(frame.body.as_ref(), b"hello");
    }

    #[test]
    fn datagram_truncated_body() {
        let err = parse_datagram(b"MESSAGE sip:a SIP/2.0\r\nContent-Length: 10\r\n\r\nhello")
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                expected: 10,
                available: 5
            }
        );
    }

    #[test]
    fn datagram_without_blank_line_is_incomplete() {
        assert_eq!(
            parse_datagram(b"OPTIONS sip:a SIP/2.0\r\nTo: a\r\n"),
            Err(FrameError::Incomplete)
        );
    }

    #[test]
    fn bad_content_length() {
        let err = parse_datagram(b"OPTIONS sip:a SIP/2.0\r\nContent-Length: x\r\n\r\n").unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(_)));
    }
}
