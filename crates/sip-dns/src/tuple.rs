// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use smol_str::SmolStr;

pub const DEFAULT_SIP_PORT: u16 = 5060;
pub const DEFAULT_SIPS_PORT: u16 = 5061;
pub const DEFAULT_WS_PORT: u16 = 80;
pub const DEFAULT_WSS_PORT: u16 = 443;

/// Transport protocol discovered via DNS resolution (RFC 3263).
///
/// Variants are declared in SRV sort preference order; the derived `Ord`
/// is that preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transport {
    Tls,
    Tcp,
    Udp,
    Dtls,
    Ws,
    Wss,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tls => "TLS",
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
            Transport::Dtls => "DTLS",
            Transport::Ws => "WS",
            Transport::Wss => "WSS",
        }
    }

    /// Maps a `transport=` URI parameter. Unknown values fall back to UDP.
    pub fn from_param(param: &str) -> Self {
        match param.trim().to_ascii_lowercase().as_str() {
            "tcp" => Transport::Tcp,
            "tls" => Transport::Tls,
            "dtls" => Transport::Dtls,
            "ws" => Transport::Ws,
            "wss" => Transport::Wss,
            _ => Transport::Udp,
        }
    }

    /// Maps an SRV owner name to its transport.
    pub fn from_srv_key(key: &str) -> Option<Self> {
        let key = key.to_ascii_lowercase();
        let table = [
            ("_sips._udp", Transport::Dtls),
            ("_sips._tcp", Transport::Tls),
            ("_sips._ws", Transport::Wss),
            ("_ws", Transport::Ws),
            ("_udp", Transport::Udp),
            ("_dtls", Transport::Dtls),
            ("_tls", Transport::Tls),
            ("_tcp", Transport::Tcp),
        ];
        table
            .iter()
            .find(|(needle, _)| key.contains(needle))
            .map(|(_, t)| *t)
    }

    /// Maps a NAPTR service field (RFC 3263 §4.1).
    pub fn from_naptr_service(service: &str) -> Option<Self> {
        match service.trim().to_ascii_uppercase().as_str() {
            "SIP+D2U" => Some(Transport::Udp),
            "SIP+D2T" => Some(Transport::Tcp),
            "SIPS+D2T" => Some(Transport::Tls),
            "SIP+D2W" => Some(Transport::Ws),
            "SIPS+D2W" => Some(Transport::Wss),
            _ => None,
        }
    }

    /// Default port when neither the URI nor an SRV record names one.
    pub fn default_port(&self, sips: bool) -> u16 {
        match self {
            Transport::Udp => DEFAULT_SIP_PORT,
            Transport::Tcp if sips => DEFAULT_SIPS_PORT,
            Transport::Tcp => DEFAULT_SIP_PORT,
            Transport::Tls | Transport::Dtls => DEFAULT_SIPS_PORT,
            Transport::Ws => DEFAULT_WS_PORT,
            Transport::Wss => DEFAULT_WSS_PORT,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved destination: address, port and transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub addr: SocketAddr,
    pub transport: Transport,
    /// Host name the address was resolved from.
    pub target_domain: SmolStr,
}

impl Tuple {
    pub fn new(addr: SocketAddr, transport: Transport, target_domain: impl Into<SmolStr>) -> Self {
        Self {
            addr,
            transport,
            target_domain: target_domain.into(),
        }
    }

    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.transport, self.addr, self.target_domain)
    }
}

/// Which transports and address families this node can use, plus the
/// resolution steps it performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSupport {
    transports: BTreeSet<Transport>,
    pub ipv4: bool,
    pub ipv6: bool,
    /// Numeric hosts without `transport=` resolve to UDP only instead of
    /// failing over to TCP and TLS when UDP is blacklisted.
    pub udp_only_on_numeric: bool,
    pub enable_naptr: bool,
    pub enable_srv: bool,
}

impl Default for TransportSupport {
    fn default() -> Self {
        Self {
            transports: [Transport::Udp, Transport::Tcp, Transport::Tls]
                .into_iter()
                .collect(),
            ipv4: true,
            ipv6: false,
            udp_only_on_numeric: false,
            enable_naptr: true,
            enable_srv: true,
        }
    }
}

impl TransportSupport {
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = Transport>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.ipv6 = enabled;
        self
    }

    pub fn with_ipv4(mut self, enabled: bool) -> Self {
        self.ipv4 = enabled;
        self
    }

    pub fn udp_only_on_numeric(mut self, enabled: bool) -> Self {
        self.udp_only_on_numeric = enabled;
        self
    }

    pub fn disable_naptr(mut self) -> Self {
        self.enable_naptr = false;
        self
    }

    pub fn disable_srv(mut self) -> Self {
        self.enable_srv = false;
        self
    }

    pub fn supports(&self, transport: Transport) -> bool {
        self.transports.contains(&transport) && (self.ipv4 || self.ipv6)
    }

    pub fn transports(&self) -> impl Iterator<Item = Transport> + '_ {
        self.transports.iter().copied()
    }
}
