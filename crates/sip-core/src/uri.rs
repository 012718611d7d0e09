// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use percent_encoding::percent_decode_str;
use smol_str::SmolStr;

/// Parsed `sip:` / `sips:` URI (RFC 3261 §19.1).
///
/// Only the pieces the core needs are broken out: user, host, port and the
/// URI parameters (`transport`, `maddr`, `lr`, ...). The original text is kept
/// in `raw` and is what [`fmt::Display`] writes back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub raw: SmolStr,
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
    pub headers: BTreeMap<SmolStr, SmolStr>,
}

impl SipUri {
    /// Parses a SIP or SIPS URI. Angle brackets and surrounding whitespace
    /// are tolerated so Contact values can be fed in directly.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed)
            .trim();
        let (scheme, rest) = trimmed.split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let (addr_part, headers_part) = match rest.split_once('?') {
            Some((addr, headers)) => (addr, Some(headers)),
            None => (rest, None),
        };

        let mut pieces = addr_part.split(';');
        let base = pieces.next()?.trim();
        let mut params = BTreeMap::new();
        for param in pieces.map(str::trim).filter(|p| !p.is_empty()) {
            match param.split_once('=') {
                Some((k, v)) => params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim())),
                ),
                None => params.insert(SmolStr::new(param.to_ascii_lowercase()), None),
            };
        }

        let (user, host_port) = match base.rsplit_once('@') {
            Some((user, host)) => (
                percent_decode_str(user.trim())
                    .decode_utf8()
                    .ok()
                    .map(|s| SmolStr::new(s.as_ref())),
                host.trim(),
            ),
            None => (None, base),
        };
        if host_port.is_empty() {
            return None;
        }

        let (host, port) = split_host_port(host_port)?;
        if host.is_empty() {
            return None;
        }

        let mut headers = BTreeMap::new();
        for pair in headers_part.into_iter().flat_map(|h| h.split('&')) {
            if let Some((k, v)) = pair.split_once('=') {
                headers.insert(SmolStr::new(k.trim()), SmolStr::new(v.trim()));
            }
        }

        Some(Self {
            raw: SmolStr::new(trimmed),
            sips,
            user,
            host: SmolStr::new(host.to_ascii_lowercase()),
            port,
            params,
            headers,
        })
    }

    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }

    /// Value of a URI parameter; `Some("")` for a flag parameter such as `lr`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    pub fn transport_param(&self) -> Option<&str> {
        self.param("transport").filter(|t| !t.is_empty())
    }

    pub fn maddr(&self) -> Option<&str> {
        self.param("maddr").filter(|m| !m.is_empty())
    }

    /// Loose routing flag (RFC 3261 §16.12).
    pub fn is_loose_route(&self) -> bool {
        self.param("lr").is_some()
    }

    /// Host with IPv6 brackets removed.
    pub fn bare_host(&self) -> &str {
        let host = self.host.as_str();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    pub fn is_numeric_host(&self) -> bool {
        self.bare_host().parse::<IpAddr>().is_ok()
    }

    /// Comparison used for fork duplicate suppression: scheme, user, host,
    /// port and transport must agree; other parameters are ignored.
    pub fn same_destination(&self, other: &SipUri) -> bool {
        self.sips == other.sips
            && self.user == other.user
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self
                .transport_param()
                .map(str::to_ascii_lowercase)
                == other.transport_param().map(str::to_ascii_lowercase)
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits `host[:port]` or `[v6]:port`. Bare IPv6 literals are rejected.
fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if input.starts_with('[') {
        let end = input.find(']')?;
        let host = &input[..=end];
        match &input[end + 1..] {
            "" => Some((host, None)),
            rest => Some((host, Some(rest.strip_prefix(':')?.parse().ok()?))),
        }
    } else if let Some((host, port)) = input.split_once(':') {
        if port.contains(':') {
            return None;
        }
        Some((host, Some(port.parse().ok()?)))
    } else {
        Some((input, None))
    }
}
