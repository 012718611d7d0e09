//! Record types exchanged with DNS clients.

use std::cmp::Ordering;
use std::net::IpAddr;

use smol_str::SmolStr;

use crate::tuple::Transport;

/// NAPTR record (RFC 3403). Ordered by `(order, preference, replacement)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptrRecord {
    pub key: SmolStr,
    pub order: u16,
    pub preference: u16,
    pub flags: SmolStr,
    pub service: SmolStr,
    pub regex: SmolStr,
    pub replacement: SmolStr,
}

impl NaptrRecord {
    pub fn new(
        key: impl Into<SmolStr>,
        order: u16,
        preference: u16,
        service: impl Into<SmolStr>,
        replacement: impl Into<SmolStr>,
    ) -> Self {
        Self {
            key: key.into(),
            order,
            preference,
            flags: SmolStr::new_inline("s"),
            service: service.into(),
            regex: SmolStr::default(),
            replacement: replacement.into(),
        }
    }
}

impl Ord for NaptrRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.order, self.preference, &self.replacement).cmp(&(
            other.order,
            other.preference,
            &other.replacement,
        ))
    }
}

impl PartialOrd for NaptrRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// SRV rdata as returned by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: SmolStr,
}

impl SrvTarget {
    pub fn new(priority: u16, weight: u16, port: u16, target: impl Into<SmolStr>) -> Self {
        Self {
            priority,
            weight,
            port,
            target: target.into(),
        }
    }
}

/// An SRV record in the selection set, tagged with the transport implied by
/// its owner name and the preference of the NAPTR that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub key: SmolStr,
    pub naptr_pref: u16,
    pub transport: Transport,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: SmolStr,
}

impl SrvRecord {
    /// `None` when the owner name names no SIP transport.
    pub fn from_target(key: &str, naptr_pref: u16, srv: SrvTarget) -> Option<Self> {
        Some(Self {
            key: SmolStr::new(key),
            naptr_pref,
            transport: Transport::from_srv_key(key)?,
            priority: srv.priority,
            weight: srv.weight,
            port: srv.port,
            target: srv.target,
        })
    }
}

impl Ord for SrvRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            self.naptr_pref,
            self.transport,
            self.priority,
            self.weight,
            &self.target,
        )
            .cmp(&(
                other.naptr_pref,
                other.transport,
                other.priority,
                other.weight,
                &other.target,
            ))
    }
}

impl PartialOrd for SrvRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// DNS question kinds the resolver issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Naptr,
    Srv,
    A,
    Aaaa,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Naptr => "NAPTR",
            QueryKind::Srv => "SRV",
            QueryKind::A => "A",
            QueryKind::Aaaa => "AAAA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsQuery {
    pub name: SmolStr,
    pub kind: QueryKind,
}

impl DnsQuery {
    pub fn new(name: impl Into<SmolStr>, kind: QueryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Successful answer to a [`DnsQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAnswer {
    Naptr(Vec<NaptrRecord>),
    Srv {
        records: Vec<SrvTarget>,
        /// Address records from the additional section, keyed by host.
        glue: Vec<(SmolStr, IpAddr)>,
    },
    Host(Vec<IpAddr>),
}
