// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP types shared by the preparser, the resolver and the forking proxy.
//!
//! This crate deliberately stays small: it is the "external message object"
//! the processing core talks to.
//! - **Messages**: [`Request`], [`Response`], [`SipMessage`]
//! - **URIs**: [`SipUri`] with the parameters RFC 3263 resolution cares about
//! - **Headers**: [`Headers`], an ordered multi-map of raw name/value pairs
//! - **Methods**: [`Method`]
//!
//! Strings are stored as [`SmolStr`](smol_str::SmolStr) and bodies as
//! [`Bytes`](bytes::Bytes) so values lifted out of a receive buffer stay cheap
//! to clone.
//!
//! # Examples
//!
//! ```
//! use sip_core::{Method, SipUri};
//!
//! let uri = SipUri::parse("sips:alice@example.com;transport=tcp").unwrap();
//! assert!(uri.sips);
//! assert_eq!(uri.transport_param(), Some("tcp"));
//! assert!(Method::from_token("invite").is_invite());
//! ```

pub mod headers;
pub mod method;
pub mod msg;
pub mod uri;

pub use headers::{Header, Headers};
pub use method::Method;
pub use msg::{
    MessageError, Request, RequestLine, Response, SipMessage, SipVersion, StatusLine,
};
pub use uri::SipUri;

/// Returns the default reason phrase for the status codes the core emits.
pub fn default_reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        300 => "Multiple Choices",
        401 => "Unauthorized",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        486 => "Busy Here",
        487 => "Request Terminated",
        500 => "Server Internal Error",
        503 => "Service Unavailable",
        603 => "Decline",
        _ => match code / 100 {
            1 => "Provisional",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            5 => "Server Error",
            _ => "Global Failure",
        },
    }
}
