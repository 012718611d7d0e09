// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Header name classification.
//!
//! The preparser asks [`classify`] about every header name it completes. The
//! answer decides two things: the canonical name reported with each value and
//! whether top-level commas in the value separate independent values
//! (RFC 3261 §7.3.1). Lookups are case-insensitive and understand the compact
//! single-letter forms.

use std::fmt;

/// Headers the core recognises. Anything else is [`HeaderKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    Accept,
    AcceptContact,
    AcceptEncoding,
    AcceptLanguage,
    AlertInfo,
    Allow,
    AllowEvents,
    AuthenticationInfo,
    Authorization,
    CallId,
    CallInfo,
    Contact,
    ContentDisposition,
    ContentEncoding,
    ContentLanguage,
    ContentLength,
    ContentType,
    CSeq,
    Date,
    ErrorInfo,
    Event,
    Expires,
    From,
    HistoryInfo,
    Identity,
    IdentityInfo,
    InReplyTo,
    MaxForwards,
    MinExpires,
    MinSe,
    Organization,
    PAssertedIdentity,
    PPreferredIdentity,
    Path,
    Priority,
    ProxyAuthenticate,
    ProxyAuthorization,
    ProxyRequire,
    RAck,
    Reason,
    RecordRoute,
    ReferTo,
    ReferredBy,
    RejectContact,
    Replaces,
    ReplyTo,
    RequestDisposition,
    Require,
    ResourcePriority,
    RetryAfter,
    Route,
    RSeq,
    SecurityClient,
    SecurityServer,
    SecurityVerify,
    Server,
    ServiceRoute,
    SessionExpires,
    SipEtag,
    SipIfMatch,
    Subject,
    SubscriptionState,
    Supported,
    Timestamp,
    To,
    Unsupported,
    UserAgent,
    Via,
    Warning,
    WwwAuthenticate,
    Unknown,
}

const KNOWN: &[HeaderKind] = &[
    HeaderKind::Accept,
    HeaderKind::AcceptContact,
    HeaderKind::AcceptEncoding,
    HeaderKind::AcceptLanguage,
    HeaderKind::AlertInfo,
    HeaderKind::Allow,
    HeaderKind::AllowEvents,
    HeaderKind::AuthenticationInfo,
    HeaderKind::Authorization,
    HeaderKind::CallId,
    HeaderKind::CallInfo,
    HeaderKind::Contact,
    HeaderKind::ContentDisposition,
    HeaderKind::ContentEncoding,
    HeaderKind::ContentLanguage,
    HeaderKind::ContentLength,
    HeaderKind::ContentType,
    HeaderKind::CSeq,
    HeaderKind::Date,
    HeaderKind::ErrorInfo,
    HeaderKind::Event,
    HeaderKind::Expires,
    HeaderKind::From,
    HeaderKind::HistoryInfo,
    HeaderKind::Identity,
    HeaderKind::IdentityInfo,
    HeaderKind::InReplyTo,
    HeaderKind::MaxForwards,
    HeaderKind::MinExpires,
    HeaderKind::MinSe,
    HeaderKind::Organization,
    HeaderKind::PAssertedIdentity,
    HeaderKind::PPreferredIdentity,
    HeaderKind::Path,
    HeaderKind::Priority,
    HeaderKind::ProxyAuthenticate,
    HeaderKind::ProxyAuthorization,
    HeaderKind::ProxyRequire,
    HeaderKind::RAck,
    HeaderKind::Reason,
    HeaderKind::RecordRoute,
    HeaderKind::ReferTo,
    HeaderKind::ReferredBy,
    HeaderKind::RejectContact,
    HeaderKind::Replaces,
    HeaderKind::ReplyTo,
    HeaderKind::RequestDisposition,
    HeaderKind::Require,
    HeaderKind::ResourcePriority,
    HeaderKind::RetryAfter,
    HeaderKind::Route,
    HeaderKind::RSeq,
    HeaderKind::SecurityClient,
    HeaderKind::SecurityServer,
    HeaderKind::SecurityVerify,
    HeaderKind::Server,
    HeaderKind::ServiceRoute,
    HeaderKind::SessionExpires,
    HeaderKind::SipEtag,
    HeaderKind::SipIfMatch,
    HeaderKind::Subject,
    HeaderKind::SubscriptionState,
    HeaderKind::Supported,
    HeaderKind::Timestamp,
    HeaderKind::To,
    HeaderKind::Unsupported,
    HeaderKind::UserAgent,
    HeaderKind::Via,
    HeaderKind::Warning,
    HeaderKind::WwwAuthenticate,
];

impl HeaderKind {
    /// Canonical (long form) spelling. Empty for [`HeaderKind::Unknown`].
    pub fn name(self) -> &'static str {
        use HeaderKind::*;
        match self {
            Accept => "Accept",
            AcceptContact => "Accept-Contact",
            AcceptEncoding => "Accept-Encoding",
            AcceptLanguage => "Accept-Language",
            AlertInfo => "Alert-Info",
            Allow => "Allow",
            AllowEvents => "Allow-Events",
            AuthenticationInfo => "Authentication-Info",
            Authorization => "Authorization",
            CallId => "Call-ID",
            CallInfo => "Call-Info",
            Contact => "Contact",
            ContentDisposition => "Content-Disposition",
            ContentEncoding => "Content-Encoding",
            ContentLanguage => "Content-Language",
            ContentLength => "Content-Length",
            ContentType => "Content-Type",
            CSeq => "CSeq",
            Date => "Date",
            ErrorInfo => "Error-Info",
            Event => "Event",
            Expires => "Expires",
            From => "From",
            HistoryInfo => "History-Info",
            Identity => "Identity",
            IdentityInfo => "Identity-Info",
            InReplyTo => "In-Reply-To",
            MaxForwards => "Max-Forwards",
            MinExpires => "Min-Expires",
            MinSe => "Min-SE",
            Organization => "Organization",
            PAssertedIdentity => "P-Asserted-Identity",
            PPreferredIdentity => "P-Preferred-Identity",
            Path => "Path",
            Priority => "Priority",
            ProxyAuthenticate => "Proxy-Authenticate",
            ProxyAuthorization => "Proxy-Authorization",
            ProxyRequire => "Proxy-Require",
            RAck => "RAck",
            Reason => "Reason",
            RecordRoute => "Record-Route",
            ReferTo => "Refer-To",
            ReferredBy => "Referred-By",
            RejectContact => "Reject-Contact",
            Replaces => "Replaces",
            ReplyTo => "Reply-To",
            RequestDisposition => "Request-Disposition",
            Require => "Require",
            ResourcePriority => "Resource-Priority",
            RetryAfter => "Retry-After",
            Route => "Route",
            RSeq => "RSeq",
            SecurityClient => "Security-Client",
            SecurityServer => "Security-Server",
            SecurityVerify => "Security-Verify",
            Server => "Server",
            ServiceRoute => "Service-Route",
            SessionExpires => "Session-Expires",
            SipEtag => "SIP-ETag",
            SipIfMatch => "SIP-If-Match",
            Subject => "Subject",
            SubscriptionState => "Subscription-State",
            Supported => "Supported",
            Timestamp => "Timestamp",
            To => "To",
            Unsupported => "Unsupported",
            UserAgent => "User-Agent",
            Via => "Via",
            Warning => "Warning",
            WwwAuthenticate => "WWW-Authenticate",
            Unknown => "",
        }
    }

    /// Whether a bare comma in this header's value starts a new value.
    ///
    /// Challenge and credential headers are excluded: their parameters are
    /// comma separated within a single value. So are headers whose grammar
    /// allows commas in a single value (`Date`, `Retry-After` comments,
    /// `Subject`, ...).
    pub fn is_comma_tokenizing(self) -> bool {
        use HeaderKind::*;
        matches!(
            self,
            Accept
                | AcceptContact
                | AcceptEncoding
                | AcceptLanguage
                | AlertInfo
                | Allow
                | AllowEvents
                | CallInfo
                | Contact
                | ContentEncoding
                | ContentLanguage
                | ErrorInfo
                | HistoryInfo
                | InReplyTo
                | PAssertedIdentity
                | PPreferredIdentity
                | Path
                | ProxyRequire
                | Reason
                | RecordRoute
                | RejectContact
                | RequestDisposition
                | Require
                | ResourcePriority
                | Route
                | SecurityClient
                | SecurityServer
                | SecurityVerify
                | ServiceRoute
                | Supported
                | Unsupported
                | Via
                | Warning
        )
    }

    /// Compact form letter (RFC 3261 §7.3.3 and later extensions).
    pub fn compact(self) -> Option<char> {
        use HeaderKind::*;
        Some(match self {
            CallId => 'i',
            From => 'f',
            To => 't',
            Contact => 'm',
            ContentLength => 'l',
            Subject => 's',
            Supported => 'k',
            Event => 'o',
            ContentEncoding => 'e',
            ContentType => 'c',
            Via => 'v',
            ReferTo => 'r',
            ReferredBy => 'b',
            RequestDisposition => 'd',
            SessionExpires => 'x',
            AcceptContact => 'a',
            RejectContact => 'j',
            AllowEvents => 'u',
            Identity => 'y',
            IdentityInfo => 'n',
            _ => return None,
        })
    }

    pub fn is_known(self) -> bool {
        self != HeaderKind::Unknown
    }
}

impl fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a header name to its kind and comma-tokenizing disposition.
///
/// ```
/// use sip_parse::{classify, HeaderKind};
///
/// assert_eq!(classify(b"v"), (HeaderKind::Via, true));
/// assert_eq!(classify(b"WWW-AUTHENTICATE"), (HeaderKind::WwwAuthenticate, false));
/// assert_eq!(classify(b"X-Custom").0, HeaderKind::Unknown);
/// ```
pub fn classify(name: &[u8]) -> (HeaderKind, bool) {
    let kind = lookup(name);
    (kind, kind.is_comma_tokenizing())
}

fn lookup(name: &[u8]) -> HeaderKind {
    if let [letter] = name {
        let letter = letter.to_ascii_lowercase() as char;
        return KNOWN
            .iter()
            .copied()
            .find(|k| k.compact() == Some(letter))
            .unwrap_or(HeaderKind::Unknown);
    }
    KNOWN
        .iter()
        .copied()
        .find(|k| k.name().as_bytes().eq_ignore_ascii_case(name))
        .unwrap_or(HeaderKind::Unknown)
}

/// Canonical spelling of a header name: the long form for known headers
/// (compact forms expanded), the input unchanged otherwise.
pub fn canonical_name(name: &str) -> &str {
    match lookup(name.as_bytes()) {
        HeaderKind::Unknown => name,
        kind => kind.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_compact_letter_maps_back() {
        for kind in KNOWN {
            if let Some(letter) = kind.compact() {
                let upper = letter.to_ascii_uppercase().to_string();
                assert_eq!(lookup(upper.as_bytes()), *kind);
            }
        }
    }

    #[test]
    fn compact_letters_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for letter in KNOWN.iter().filter_map(|k| k.compact()) {
            assert!(seen.insert(letter), "duplicate compact form {letter}");
        }
    }

    #[test]
    fn names_round_trip() {
        for kind in KNOWN {
            assert_eq!(lookup(kind.name().to_ascii_lowercase().as_bytes()), *kind);
        }
    }

    #[test]
    fn routing_headers_tokenize_on_commas() {
        for name in ["Via", "Contact", "Route", "Record-Route", "m", "Supported"] {
            assert!(classify(name.as_bytes()).1, "{name}");
        }
    }

    #[test]
    fn credential_headers_do_not_tokenize() {
        for name in [
            "Authorization",
            "Proxy-Authorization",
            "WWW-Authenticate",
            "Proxy-Authenticate",
            "Date",
            "Subject",
            "X-Anything",
        ] {
            assert!(!classify(name.as_bytes()).1, "{name}");
        }
    }

    #[test]
    fn canonical_name_expands_compact_forms() {
        assert_eq!(canonical_name("i"), "Call-ID");
        assert_eq!(canonical_name("content-length"), "Content-Length");
        assert_eq!(canonical_name("X-Foo"), "X-Foo");
    }

    #[test]
    fn empty_and_odd_names_are_unknown() {
        assert_eq!(lookup(b""), HeaderKind::Unknown);
        assert_eq!(lookup(b"q"), HeaderKind::Unknown);
        assert_eq!(lookup(b"Via "), HeaderKind::Unknown);
    }
}
