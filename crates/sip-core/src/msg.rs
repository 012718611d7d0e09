// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{headers::Headers, method::Method, uri::SipUri};

const MAX_REASON_LENGTH: usize = 256;
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    InvalidStatusCode { code: u16 },
    ReasonTooLong { max: usize, actual: usize },
    InvalidReason(String),
    BodyTooLarge { max: usize, actual: usize },
    InvalidStartLine(String),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatusCode { code } => {
                write!(f, "invalid SIP status code: {} (must be 100-699)", code)
            }
            Self::ReasonTooLong { max, actual } => {
                write!(f, "reason phrase too long (max {}, got {})", max, actual)
            }
            Self::InvalidReason(msg) => write!(f, "invalid reason phrase: {}", msg),
            Self::BodyTooLarge { max, actual } => {
                write!(f, "body too large (max {}, got {})", max, actual)
            }
            Self::InvalidStartLine(line) => write!(f, "invalid start line: {:?}", line),
        }
    }
}

impl std::error::Error for MessageError {}

/// SIP protocol version. Only SIP/2.0 exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SipVersion {
    #[default]
    V2,
}

impl SipVersion {
    pub const fn as_str(self) -> &'static str {
        "SIP/2.0"
    }
}

/// `Method SP Request-URI SP SIP-Version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    uri: SipUri,
    version: SipVersion,
}

impl RequestLine {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            method,
            uri,
            version: SipVersion::V2,
        }
    }

    /// Parses the text of a request line as handed over by the preparser.
    pub fn parse(line: &str) -> Result<Self, MessageError> {
        let invalid = || MessageError::InvalidStartLine(line.to_owned());
        let mut parts = line.split_ascii_whitespace();
        let method = parts.next().ok_or_else(invalid)?;
        let uri = parts.next().and_then(SipUri::parse).ok_or_else(invalid)?;
        match parts.next() {
            Some(v) if v.eq_ignore_ascii_case(SipVersion::V2.as_str()) => {}
            _ => return Err(invalid()),
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(Method::from_token(method), uri))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: SipUri) {
        self.uri = uri;
    }
}

/// `SIP-Version SP Status-Code SP Reason-Phrase`
///
/// Codes are validated to 100-699 and reason phrases may not carry control
/// characters, so a status line can always be written back safely.
///
/// ```
/// use sip_core::StatusLine;
///
/// let status = StatusLine::new(486, "Busy Here").unwrap();
/// assert_eq!(status.code(), 486);
/// assert!(StatusLine::new(99, "Nope").is_err());
/// assert!(StatusLine::new(200, "OK\r\nX-Injected: 1").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    version: SipVersion,
    code: u16,
    reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl AsRef<str>) -> Result<Self, MessageError> {
        if !(100..=699).contains(&code) {
            return Err(MessageError::InvalidStatusCode { code });
        }
        let reason = reason.as_ref();
        validate_reason_phrase(reason)?;
        Ok(Self {
            version: SipVersion::V2,
            code,
            reason: SmolStr::new(reason),
        })
    }

    pub fn parse(line: &str) -> Result<Self, MessageError> {
        let invalid = || MessageError::InvalidStartLine(line.to_owned());
        let (version, rest) = line.split_once(' ').ok_or_else(invalid)?;
        if !version.eq_ignore_ascii_case(SipVersion::V2.as_str()) {
            return Err(invalid());
        }
        let rest = rest.trim_start();
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        let code = code.parse::<u16>().map_err(|_| invalid())?;
        Self::new(code, reason.trim())
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response class, `1` through `6`.
    pub fn class(&self) -> u16 {
        self.code / 100
    }
}

/// A SIP request: start line, ordered headers and an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    start: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;
        Ok(Self {
            start,
            headers,
            body,
        })
    }

    pub fn start_line(&self) -> &RequestLine {
        &self.start
    }

    pub fn method(&self) -> &Method {
        self.start.method()
    }

    pub fn uri(&self) -> &SipUri {
        self.start.uri()
    }

    pub fn set_uri(&mut self, uri: SipUri) {
        self.start.set_uri(uri);
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// A SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    start: StatusLine,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;
        Ok(Self {
            start,
            headers,
            body,
        })
    }

    pub fn start_line(&self) -> &StatusLine {
        &self.start
    }

    pub fn code(&self) -> u16 {
        self.start.code()
    }

    pub fn reason(&self) -> &str {
        self.start.reason()
    }

    /// Rewrites the status line in place, e.g. when merged 3xx responses
    /// become a 300 or a 503 is downgraded to 480 before forwarding.
    pub fn set_status(&mut self, code: u16, reason: impl AsRef<str>) -> Result<(), MessageError> {
        self.start = StatusLine::new(code, reason)?;
        Ok(())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_provisional(&self) -> bool {
        self.start.class() == 1
    }

    pub fn is_final(&self) -> bool {
        self.code() >= 200
    }
}

/// Either a request or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Self::Request(req) => req.headers(),
            Self::Response(res) => res.headers(),
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            Self::Request(req) => Some(req),
            Self::Response(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(res) => Some(res),
            Self::Request(_) => None,
        }
    }
}

fn write_head(f: &mut fmt::Formatter<'_>, headers: &Headers, body: &Bytes) -> fmt::Result {
    for header in headers {
        write!(f, "{}: {}\r\n", header.name, header.value)?;
    }
    f.write_str("\r\n")?;
    f.write_str(&String::from_utf8_lossy(body))
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}\r\n",
            self.method(),
            self.uri(),
            self.start.version.as_str()
        )?;
        write_head(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}\r\n",
            self.start.version.as_str(),
            self.code(),
            self.reason()
        )?;
        write_head(f, &self.headers, &self.body)
    }
}

fn validate_reason_phrase(reason: &str) -> Result<(), MessageError> {
    if reason.len() > MAX_REASON_LENGTH {
        return Err(MessageError::ReasonTooLong {
            max: MAX_REASON_LENGTH,
            actual: reason.len(),
        });
    }
    // Reason-Phrase is UTF8-TEXT; control characters would allow CRLF injection.
    if reason.chars().any(|c| c.is_control()) {
        return Err(MessageError::InvalidReason(
            "contains control characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_body_size(body: &Bytes) -> Result<(), MessageError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(MessageError::BodyTooLarge {
            max: MAX_BODY_SIZE,
            actual: body.len(),
        });
    }
    Ok(())
}
