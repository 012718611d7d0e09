// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP message preparsing and framing.
//!
//! - [`Preparser`]: resumable header tokenizer driven by a shared transition
//!   table
//! - [`classify`]: header name to [`HeaderKind`] and comma-tokenizing flag
//! - [`StreamFramer`] / [`parse_datagram`]: complete messages out of stream
//!   reads or datagrams
//! - [`parse_request`] / [`parse_response`]: `sip_core` messages from bytes
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use sip_parse::parse_request;
//!
//! let raw = Bytes::from_static(
//!     b"OPTIONS sip:bob@example.com SIP/2.0\r\nv: SIP/2.0/UDP h;branch=z9hG4bK1\r\nl: 0\r\n\r\n",
//! );
//! let req = parse_request(&raw).unwrap();
//! assert_eq!(req.headers().get("Via").unwrap(), "SIP/2.0/UDP h;branch=z9hG4bK1");
//! ```

use bytes::Bytes;
use sip_core::{MessageError, Request, RequestLine, Response, SipMessage, StatusLine};
use tracing::debug;

pub mod framer;
pub mod header_kind;
pub mod preparse;
pub mod window;

pub use framer::{parse_datagram, FrameError, FramedMessage, StreamFramer, DEFAULT_MAX_MESSAGE_SIZE};
pub use header_kind::{canonical_name, classify, HeaderKind};
pub use preparse::{
    transition_table, Disposition, PreparseEvent, PreparseSink, Preparser, Progress, State,
    Status, TransitionTable,
};
pub use window::{rebase, Window};

/// Parses a SIP request from raw network bytes.
pub fn parse_request(datagram: &Bytes) -> Option<Request> {
    parse_request_with_limit(datagram, DEFAULT_MAX_MESSAGE_SIZE)
}

/// Parses a SIP request with an explicit max size check.
pub fn parse_request_with_limit(datagram: &Bytes, max_size: usize) -> Option<Request> {
    if datagram.len() > max_size {
        return None;
    }
    let frame = frame(datagram)?;
    request_from_frame(frame)
        .map_err(|e| debug!(error = %e, "dropping unparsable request"))
        .ok()
}

/// Parses a SIP response from raw network bytes.
pub fn parse_response(datagram: &Bytes) -> Option<Response> {
    if datagram.len() > DEFAULT_MAX_MESSAGE_SIZE {
        return None;
    }
    let frame = frame(datagram)?;
    response_from_frame(frame)
        .map_err(|e| debug!(error = %e, "dropping unparsable response"))
        .ok()
}

/// Parses either kind of message, deciding on the start line.
pub fn parse_message(datagram: &Bytes) -> Option<SipMessage> {
    if datagram.starts_with(b"SIP/") {
        parse_response(datagram).map(SipMessage::Response)
    } else {
        parse_request(datagram).map(SipMessage::Request)
    }
}

fn frame(datagram: &Bytes) -> Option<FramedMessage> {
    parse_datagram(datagram)
        .map_err(|e| debug!(error = %e, "datagram framing failed"))
        .ok()
}

/// Builds a request out of a framed message.
pub fn request_from_frame(frame: FramedMessage) -> Result<Request, MessageError> {
    let line = RequestLine::parse(&frame.start_line)?;
    Request::new(line, frame.headers, frame.body)
}

/// Builds a response out of a framed message.
pub fn response_from_frame(frame: FramedMessage) -> Result<Response, MessageError> {
    let line = StatusLine::parse(&frame.start_line)?;
    Response::new(line, frame.headers, frame.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_compact_headers() {
        let raw = Bytes::from_static(
            b"INVITE sip:bob@biloxi.com SIP/2.0\r\n\
v: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
m: <sip:alice@pc33.atlanta.com>, <sip:alice@10.0.0.1>\r\n\
i: a84b4c76e66710\r\n\
l: 4\r\n\r\nv=0\n",
        );
        let req = parse_request(&raw).unwrap();
        assert!(req.method().is_invite());
        assert_eq!(req.uri().host, "biloxi.com");
        assert_eq!(req.headers().get_all("Contact").count(), 2);
        assert_eq!(req.headers().get("Call-ID").unwrap(), "a84b4c76e66710");
        assert_eq!(req.body().as_ref(), b"v=0\n");
    }

    #[test]
    fn parses_response() {
        let raw = Bytes::from_static(b"SIP/2.0 486 Busy Here\r\nContent-Length: 0\r\n\r\n");
        let res = parse_response(&raw).unwrap();
        assert_eq!(res.code(), 486);
        assert_eq!(res.reason(), "Busy Here");
    }

    #[test]
    fn parse_message_dispatches_on_start_line() {
        let req = Bytes::from_static(b"BYE sip:a@h SIP/2.0\r\n\r\n");
        let res = Bytes::from_static(b"SIP/2.0 200 OK\r\n\r\n");
        assert!(parse_message(&req).unwrap().is_request());
        assert!(!parse_message(&res).unwrap().is_request());
    }

    #[test]
    fn rejects_oversized_and_garbage() {
        let raw = Bytes::from_static(b"OPTIONS sip:a SIP/2.0\r\n\r\n");
        assert!(parse_request_with_limit(&raw, 4).is_none());
        assert!(parse_request(&Bytes::from_static(b"garbage\r\n\r\n")).is_none());
        assert!(parse_response(&Bytes::from_static(b"SIP/2.0 abc\r\n\r\n")).is_none());
    }
}
