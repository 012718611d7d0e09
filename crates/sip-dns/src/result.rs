// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3263 resolution of one URI into an ordered stream of tuples.
//!
//! [`DnsResult`] performs no I/O. Queries it needs answered are queued and
//! collected with [`DnsResult::take_queries`]; answers come back through
//! [`DnsResult::on_reply`]. The same state machine therefore serves the
//! blocking driver ([`crate::resolve_blocking`]) and the tokio one
//! ([`crate::AsyncDriver`]).
//!
//! Resolution steps:
//! 1. `transport=` present: numeric host is used as is, an explicit port
//!    goes straight to A/AAAA, otherwise one SRV query for that transport.
//! 2. Numeric host or explicit port: A/AAAA (or the address itself).
//! 3. Otherwise NAPTR, then SRV for every supported record of the lowest
//!    order. Without usable NAPTR records, SRV for each supported transport.
//! 4. SRV records are sorted and consumed band by band with RFC 2782
//!    weighting; every selected record is resolved to addresses in turn.
//! 5. No SRV records at all: A/AAAA on the target with the default port.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use sip_core::SipUri;
use sip_observe::core_metrics;
use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::client::{DnsReply, LookupError};
use crate::marks::{MarkType, TupleMarkManager};
use crate::records::{DnsAnswer, DnsQuery, NaptrRecord, QueryKind, SrvRecord, SrvTarget};
use crate::srv::take_weighted;
use crate::tuple::{Transport, TransportSupport, Tuple};

/// Externally visible resolution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// At least one tuple can be taken with [`DnsResult::next`], or the
    /// next [`DnsResult::available`] call will start producing more.
    Available,
    /// Waiting for DNS answers.
    Pending,
    /// Nothing left.
    Finished,
    /// Destroyed while answers were outstanding.
    Destroyed,
}

/// What the driver should do after feeding an answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Still waiting on other answers; nothing for the consumer yet.
    Waiting,
    /// State may have changed; call [`DnsResult::available`].
    Ready,
    /// The result was destroyed and this was the last outstanding answer.
    Release,
}

/// Fallback SRV names tried when NAPTR yields nothing usable.
const FALLBACK_SRVS: [(Transport, &str); 4] = [
    (Transport::Tls, "_sips._tcp."),
    (Transport::Dtls, "_sips._udp."),
    (Transport::Tcp, "_sip._tcp."),
    (Transport::Udp, "_sip._udp."),
];

#[derive(Debug, Default)]
struct HostLookup {
    name: SmolStr,
    port: u16,
    transport: Option<Transport>,
    outstanding: usize,
    v6: Vec<Tuple>,
    v4: Vec<Tuple>,
}

pub struct DnsResult {
    support: TransportSupport,
    marks: Arc<TupleMarkManager>,
    rng: StdRng,
    state: ResultState,

    target: SmolStr,
    sips: bool,
    transport: Option<Transport>,
    chosen_transport: bool,

    naptr_outstanding: bool,
    srv_outstanding: usize,
    host: HostLookup,

    top_naptrs: HashMap<SmolStr, NaptrRecord>,
    srvs: Vec<SrvRecord>,
    glue: HashMap<SmolStr, Vec<IpAddr>>,

    results: VecDeque<Tuple>,
    greylisted: Vec<Tuple>,
    last: Option<Tuple>,
    outbox: Vec<DnsQuery>,
}

impl DnsResult {
    pub fn new(support: TransportSupport, marks: Arc<TupleMarkManager>) -> Self {
        Self::with_rng(support, marks, StdRng::from_entropy())
    }

    /// Deterministic SRV selection for tests and simulations.
    pub fn with_seed(support: TransportSupport, marks: Arc<TupleMarkManager>, seed: u64) -> Self {
        Self::with_rng(support, marks, StdRng::seed_from_u64(seed))
    }

    fn with_rng(support: TransportSupport, marks: Arc<TupleMarkManager>, rng: StdRng) -> Self {
        Self {
            support,
            marks,
            rng,
            state: ResultState::Pending,
            target: SmolStr::default(),
            sips: false,
            transport: None,
            chosen_transport: false,
            naptr_outstanding: false,
            srv_outstanding: 0,
            host: HostLookup::default(),
            top_naptrs: HashMap::new(),
            srvs: Vec::new(),
            glue: HashMap::new(),
            results: VecDeque::new(),
            greylisted: Vec::new(),
            last: None,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> ResultState {
        self.state
    }

    /// Host being resolved (after `maddr` and bracket handling).
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_sips(&self) -> bool {
        self.sips
    }

    /// Answers still expected.
    pub fn outstanding(&self) -> usize {
        usize::from(self.naptr_outstanding) + self.srv_outstanding + self.host.outstanding
    }

    /// Queries issued since the last call.
    pub fn take_queries(&mut self) -> Vec<DnsQuery> {
        std::mem::take(&mut self.outbox)
    }

    /// Starts resolving `uri`.
    pub fn lookup(&mut self, uri: &SipUri) {
        self.sips = uri.sips;
        let target = match uri.maddr() {
            Some(maddr) if !self.sips => strip_brackets(maddr),
            _ => uri.bare_host(),
        };
        self.target = SmolStr::new(target.to_ascii_lowercase());
        self.state = ResultState::Pending;
        let numeric = self.target.parse::<IpAddr>().ok();
        debug!(uri = %uri, target = %self.target, "dns lookup");

        if let Some(param) = uri.transport_param() {
            let transport = Transport::from_param(param);
            self.transport = Some(transport);
            self.chosen_transport = true;

            if let Some(ip) = numeric {
                let port = uri.port.unwrap_or_else(|| transport.default_port(self.sips));
                let tuple = Tuple::new(SocketAddr::new(ip, port), transport, self.target.clone());
                if self.marks.mark_type(&tuple) != MarkType::Black {
                    debug!(tuple = %tuple, "immediate result");
                    self.results.push_back(tuple);
                }
                self.state = ResultState::Available;
            } else if let Some(port) = uri.port {
                self.lookup_host(self.target.clone(), port, transport);
            } else {
                self.lookup_explicit_transport(transport);
            }
        } else if numeric.is_some() || uri.port.is_some() || !self.support.enable_naptr {
            match numeric {
                Some(ip) => self.lookup_numeric(ip, uri.port),
                None if uri.port.is_none() && self.support.enable_srv => {
                    // NAPTR disabled: go straight to the SRV fallback list.
                    self.naptr_fallback();
                }
                None => self.lookup_named_host(uri.port),
            }
        } else {
            self.naptr_outstanding = true;
            self.query(self.target.clone(), QueryKind::Naptr);
        }
    }

    fn lookup_explicit_transport(&mut self, transport: Transport) {
        let (transport, service) = if self.sips {
            if transport == Transport::Udp {
                (Transport::Dtls, "_sips._udp.")
            } else {
                (Transport::Tls, "_sips._tcp.")
            }
        } else {
            let service = match transport {
                Transport::Tls => "_sips._tcp.",
                Transport::Dtls => "_sip._dtls.",
                Transport::Tcp => "_sip._tcp.",
                Transport::Ws => "_sip._ws.",
                Transport::Wss => "_sips._ws.",
                Transport::Udp => "_sip._udp.",
            };
            (transport, service)
        };
        self.transport = Some(transport);

        if !self.support.supports(transport) {
            debug!(transport = %transport, "transport not supported");
            self.state = ResultState::Finished;
            return;
        }
        if !self.support.enable_srv {
            let port = transport.default_port(self.sips);
            self.lookup_host(self.target.clone(), port, transport);
            return;
        }
        self.srv_outstanding += 1;
        self.query(format!("{}{}", service, self.target), QueryKind::Srv);
    }

    /// Numeric host without `transport=`: take the first transport whose
    /// tuple is not marked, ending on the last one tried.
    fn lookup_numeric(&mut self, ip: IpAddr, port: Option<u16>) {
        let candidates: &[Transport] = if self.sips {
            &[Transport::Tls]
        } else if self.support.udp_only_on_numeric {
            &[Transport::Udp]
        } else {
            &[Transport::Udp, Transport::Tcp, Transport::Tls]
        };

        let mut chosen = None;
        for transport in candidates.iter().copied() {
            if !self.support.supports(transport) {
                continue;
            }
            let port = port.unwrap_or_else(|| transport.default_port(self.sips));
            let tuple = Tuple::new(SocketAddr::new(ip, port), transport, self.target.clone());
            let mark = self.marks.mark_type(&tuple);
            chosen = Some((tuple, mark));
            if mark == MarkType::Ok {
                break;
            }
        }

        match chosen {
            Some((tuple, mark)) if mark != MarkType::Black => {
                debug!(tuple = %tuple, "numeric result");
                self.transport = Some(tuple.transport);
                self.chosen_transport = true;
                self.results.push_back(tuple);
            }
            Some((tuple, _)) => debug!(tuple = %tuple, "numeric result is blacklisted"),
            None => debug!("no supported transport for numeric target"),
        }
        self.state = ResultState::Available;
    }

    fn lookup_named_host(&mut self, port: Option<u16>) {
        let transport = if self.sips {
            Some(Transport::Tls).filter(|t| self.support.supports(*t))
        } else {
            [Transport::Udp, Transport::Tcp, Transport::Tls]
                .into_iter()
                .find(|t| self.support.supports(*t))
        };
        match transport {
            Some(transport) => {
                self.transport = Some(transport);
                let port = port.unwrap_or_else(|| transport.default_port(self.sips));
                self.lookup_host(self.target.clone(), port, transport);
            }
            None => {
                warn!(target = %self.target, "no supported transport");
                self.state = ResultState::Finished;
            }
        }
    }

    fn naptr_fallback(&mut self) {
        let mut issued = 0;
        if self.sips {
            if self.support.supports(Transport::Tls) {
                self.srv_outstanding += 1;
                self.query(format!("_sips._tcp.{}", self.target), QueryKind::Srv);
                issued += 1;
            }
        } else {
            for (transport, service) in FALLBACK_SRVS {
                if self.support.supports(transport) {
                    self.srv_outstanding += 1;
                    self.query(format!("{}{}", service, self.target), QueryKind::Srv);
                    issued += 1;
                }
            }
        }
        if issued == 0 {
            debug!(target = %self.target, "no SRV fallback possible");
            self.state = ResultState::Finished;
        }
    }

    fn query(&mut self, name: impl Into<SmolStr>, kind: QueryKind) {
        let query = DnsQuery::new(name, kind);
        trace!(name = %query.name, kind = kind.as_str(), "queue dns query");
        self.outbox.push(query);
    }

    fn lookup_host(&mut self, name: SmolStr, port: u16, transport: Transport) {
        self.host = HostLookup {
            name: name.clone(),
            port,
            transport: Some(transport),
            ..HostLookup::default()
        };
        if self.support.ipv6 {
            self.host.outstanding += 1;
            self.query(name.clone(), QueryKind::Aaaa);
        }
        if self.support.ipv4 {
            self.host.outstanding += 1;
            self.query(name, QueryKind::A);
        }
        if self.host.outstanding == 0 {
            self.host_done();
        } else if self.state != ResultState::Available {
            self.state = ResultState::Pending;
        }
    }

    /// Feeds one answer back in.
    pub fn on_reply(&mut self, reply: DnsReply) -> ReplyOutcome {
        let DnsReply { query, outcome } = reply;
        if let Err(err) = &outcome {
            debug!(name = %query.name, kind = query.kind.as_str(), error = %err, "dns query failed");
            core_metrics().on_dns_failure(query.kind.as_str(), &err.to_string());
        }

        match query.kind {
            QueryKind::Naptr => {
                if !self.naptr_outstanding {
                    warn!(name = %query.name, "unexpected NAPTR answer");
                    return ReplyOutcome::Waiting;
                }
                self.naptr_outstanding = false;
            }
            QueryKind::Srv => {
                if self.srv_outstanding == 0 {
                    warn!(name = %query.name, "unexpected SRV answer");
                    return ReplyOutcome::Waiting;
                }
                self.srv_outstanding -= 1;
            }
            QueryKind::A | QueryKind::Aaaa => {
                if self.host.outstanding == 0 || !query.name.eq_ignore_ascii_case(&self.host.name) {
                    warn!(name = %query.name, "unexpected host answer");
                    return ReplyOutcome::Waiting;
                }
                self.host.outstanding -= 1;
            }
        }

        if self.state == ResultState::Destroyed {
            return if self.outstanding() == 0 {
                ReplyOutcome::Release
            } else {
                ReplyOutcome::Waiting
            };
        }

        match query.kind {
            QueryKind::Naptr => self.on_naptr(outcome),
            QueryKind::Srv => self.on_srv(&query.name, outcome),
            QueryKind::A | QueryKind::Aaaa => self.on_host(query.kind, outcome),
        }
    }

    fn on_naptr(&mut self, outcome: Result<DnsAnswer, LookupError>) -> ReplyOutcome {
        let records = match outcome {
            Ok(DnsAnswer::Naptr(records)) => records,
            Ok(_) | Err(_) => Vec::new(),
        };

        let supported: Vec<(NaptrRecord, Transport)> = records
            .into_iter()
            .filter(|r| !self.sips || r.service.to_ascii_uppercase().starts_with("SIPS"))
            .filter_map(|r| {
                let transport = Transport::from_naptr_service(&r.service)?;
                self.support.supports(transport).then_some((r, transport))
            })
            .collect();

        let Some(best_order) = supported.iter().map(|(r, _)| r.order).min() else {
            debug!(target = %self.target, "no usable NAPTR records, trying SRV");
            self.naptr_fallback();
            return ReplyOutcome::Ready;
        };

        for (record, transport) in supported {
            if record.order != best_order {
                continue;
            }
            debug!(replacement = %record.replacement, transport = %transport, "NAPTR selected");
            let name = SmolStr::new(record.replacement.trim_end_matches('.').to_ascii_lowercase());
            self.top_naptrs.insert(name.clone(), record);
            if self.support.enable_srv {
                self.srv_outstanding += 1;
                self.query(name, QueryKind::Srv);
            }
        }
        if self.srv_outstanding == 0 {
            self.srvs_complete();
        }
        ReplyOutcome::Ready
    }

    fn on_srv(&mut self, key: &str, outcome: Result<DnsAnswer, LookupError>) -> ReplyOutcome {
        if let Ok(DnsAnswer::Srv { records, glue }) = outcome {
            let key = key.trim_end_matches('.').to_ascii_lowercase();
            let naptr_pref = self.top_naptrs.get(key.as_str()).map_or(0, |n| n.preference);
            for record in records {
                let Some(srv) = SrvRecord::from_target(&key, naptr_pref, normalize_srv(record)) else {
                    trace!(key = %key, "skipping SRV with unknown service");
                    continue;
                };
                if !self.chosen_transport || Some(srv.transport) == self.transport {
                    self.srvs.push(srv);
                }
            }
            for (host, ip) in glue {
                let host = SmolStr::new(host.trim_end_matches('.').to_ascii_lowercase());
                self.glue.entry(host).or_default().push(ip);
            }
        }

        if self.srv_outstanding > 0 {
            return ReplyOutcome::Waiting;
        }
        self.srvs_complete();
        ReplyOutcome::Ready
    }

    /// Every SRV answer is in.
    fn srvs_complete(&mut self) {
        if !self.srvs.is_empty() {
            self.srvs.sort();
            trace!(srvs = ?self.srvs, "sorted SRV set");
            self.prime();
            return;
        }

        let (transport, port) = match self.transport {
            Some(t) => (Some(t), t.default_port(self.sips)),
            None if self.sips => (Some(Transport::Tls), Transport::Tls.default_port(true)),
            None => {
                let t = [Transport::Udp, Transport::Tcp]
                    .into_iter()
                    .find(|t| self.support.supports(*t));
                (t, crate::tuple::DEFAULT_SIP_PORT)
            }
        };
        match transport {
            Some(transport) => {
                debug!(target = %self.target, transport = %transport, "no SRV records, trying A/AAAA");
                self.transport = Some(transport);
                self.chosen_transport = true;
                self.lookup_host(self.target.clone(), port, transport);
            }
            None => self.prime(),
        }
    }

    fn on_host(&mut self, kind: QueryKind, outcome: Result<DnsAnswer, LookupError>) -> ReplyOutcome {
        let Some(transport) = self.host.transport else {
            return ReplyOutcome::Waiting;
        };
        if let Ok(DnsAnswer::Host(addrs)) = outcome {
            let wanted_v6 = kind == QueryKind::Aaaa;
            for ip in addrs.into_iter().filter(|ip| ip.is_ipv6() == wanted_v6) {
                let tuple = Tuple::new(SocketAddr::new(ip, self.host.port), transport, self.host.name.clone());
                match self.marks.mark_type(&tuple) {
                    MarkType::Ok if wanted_v6 => self.host.v6.push(tuple),
                    MarkType::Ok => self.host.v4.push(tuple),
                    MarkType::Grey => {
                        trace!(tuple = %tuple, "greylisted tuple deferred");
                        self.greylisted.push(tuple);
                    }
                    MarkType::Black => trace!(tuple = %tuple, "blacklisted tuple dropped"),
                }
            }
        }

        if self.host.outstanding > 0 {
            return ReplyOutcome::Waiting;
        }
        self.host_done();
        ReplyOutcome::Ready
    }

    fn host_done(&mut self) {
        let v6 = std::mem::take(&mut self.host.v6);
        let v4 = std::mem::take(&mut self.host.v4);
        let count = v6.len() + v4.len();
        self.results.extend(v6);
        self.results.extend(v4);
        core_metrics().on_tuples_resolved(count);
        debug!(host = %self.host.name, count, "host lookup complete");

        if self.results.is_empty() && self.srvs.is_empty() {
            if self.greylisted.is_empty() {
                self.state = ResultState::Finished;
            } else {
                self.results.extend(self.greylisted.drain(..));
                self.state = ResultState::Available;
            }
        } else {
            // Remaining SRVs are primed by the next `available` call.
            self.state = ResultState::Available;
        }
    }

    /// Starts on the next SRV record, or finishes.
    fn prime(&mut self) {
        while let Some(next) = take_weighted(&mut self.srvs, &mut self.rng) {
            debug!(target = %next.target, port = next.port, transport = %next.transport, "primed with SRV");
            if let Some(addrs) = self.glue.get(&next.target).cloned() {
                let before = self.results.len();
                self.push_glue(&next, addrs);
                if self.results.len() > before {
                    self.state = ResultState::Available;
                    return;
                }
                continue;
            }
            self.state = ResultState::Pending;
            self.lookup_host(next.target.clone(), next.port, next.transport);
            return;
        }

        if !self.greylisted.is_empty() {
            self.results.extend(self.greylisted.drain(..));
            self.state = ResultState::Available;
        } else if self.results.is_empty() {
            self.state = ResultState::Finished;
        } else {
            self.state = ResultState::Available;
        }
    }

    fn push_glue(&mut self, srv: &SrvRecord, addrs: Vec<IpAddr>) {
        trace!(target = %srv.target, "using glue records");
        let mut v4 = Vec::new();
        for ip in addrs {
            if (ip.is_ipv6() && !self.support.ipv6) || (ip.is_ipv4() && !self.support.ipv4) {
                continue;
            }
            let tuple = Tuple::new(SocketAddr::new(ip, srv.port), srv.transport, srv.target.clone());
            match self.marks.mark_type(&tuple) {
                MarkType::Ok if ip.is_ipv6() => self.results.push_back(tuple),
                MarkType::Ok => v4.push(tuple),
                MarkType::Grey => self.greylisted.push(tuple),
                MarkType::Black => {}
            }
        }
        self.results.extend(v4);
    }

    /// Current state, starting the next SRV lookup when the queue ran dry.
    /// When one tuple is left and more SRVs remain, the next host lookup is
    /// started early while the state stays `Available`.
    pub fn available(&mut self) -> ResultState {
        loop {
            if self.state != ResultState::Available {
                return self.state;
            }
            if !self.results.is_empty() {
                if self.results.len() == 1 && !self.srvs.is_empty() && self.outstanding() == 0 {
                    self.prefetch();
                }
                return ResultState::Available;
            }
            if self.outstanding() > 0 {
                self.state = ResultState::Pending;
                return self.state;
            }
            self.prime();
        }
    }

    fn prefetch(&mut self) {
        if let Some(next) = take_weighted(&mut self.srvs, &mut self.rng) {
            trace!(target = %next.target, "prefetching next SRV target");
            match self.glue.get(&next.target).cloned() {
                Some(addrs) => self.push_glue(&next, addrs),
                None => self.lookup_host(next.target.clone(), next.port, next.transport),
            }
        }
    }

    /// Pops the next tuple. Returns `None` when [`DnsResult::available`]
    /// would not report `Available`.
    pub fn next(&mut self) -> Option<Tuple> {
        if self.state != ResultState::Available {
            return None;
        }
        let tuple = self.results.pop_front()?;
        trace!(tuple = %tuple, "returning next dns entry");
        self.last = Some(tuple.clone());
        Some(tuple)
    }

    /// The tuple most recently returned by [`DnsResult::next`].
    pub fn last(&self) -> Option<&Tuple> {
        self.last.as_ref()
    }

    /// Marks the last returned tuple BLACK until `expiry`.
    pub fn blacklist_last(&self, expiry: Instant) -> bool {
        self.mark_last(expiry, MarkType::Black)
    }

    /// Marks the last returned tuple GREY until `expiry`.
    pub fn greylist_last(&self, expiry: Instant) -> bool {
        self.mark_last(expiry, MarkType::Grey)
    }

    fn mark_last(&self, expiry: Instant, kind: MarkType) -> bool {
        match &self.last {
            Some(tuple) => {
                self.marks.mark(tuple, expiry, kind);
                true
            }
            None => false,
        }
    }

    /// Tears the resolution down. Returns `true` when it can be dropped now;
    /// `false` when answers are still outstanding, in which case the driver
    /// keeps feeding them in until [`ReplyOutcome::Release`]. Queries still
    /// in the outbox count as outstanding and must be dispatched.
    pub fn destroy(&mut self) -> bool {
        self.results.clear();
        self.srvs.clear();
        self.greylisted.clear();
        if self.outstanding() > 0 {
            self.state = ResultState::Destroyed;
            false
        } else {
            self.state = ResultState::Finished;
            true
        }
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn normalize_srv(mut srv: SrvTarget) -> SrvTarget {
    srv.target = SmolStr::new(srv.target.trim_end_matches('.').to_ascii_lowercase());
    srv
}
