// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DNS backends and the drivers that feed a [`DnsResult`].

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use sip_observe::core_metrics;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::rr::{RData, RecordType};
use trust_dns_resolver::TokioAsyncResolver;

use crate::records::{DnsAnswer, DnsQuery, NaptrRecord, QueryKind, SrvTarget};
use crate::result::{DnsResult, ReplyOutcome, ResultState};
use crate::tuple::Tuple;

/// Why a query produced no answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    NoRecords,
    Timeout,
    Failed(SmolStr),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::NoRecords => write!(f, "no records"),
            LookupError::Timeout => write!(f, "timed out"),
            LookupError::Failed(reason) => write!(f, "lookup failed: {}", reason),
        }
    }
}

impl std::error::Error for LookupError {}

/// Answer (or failure) for one query, handed back to [`DnsResult::on_reply`].
#[derive(Debug, Clone)]
pub struct DnsReply {
    pub query: DnsQuery,
    pub outcome: Result<DnsAnswer, LookupError>,
}

/// Asynchronous DNS backend.
#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn query(&self, query: &DnsQuery) -> Result<DnsAnswer, LookupError>;
}

/// Blocking DNS backend.
pub trait BlockingDnsClient {
    fn query_blocking(&self, query: &DnsQuery) -> Result<DnsAnswer, LookupError>;
}

/// Answers queries inline until the result is no longer pending.
pub fn resolve_blocking<C>(result: &mut DnsResult, client: &C) -> ResultState
where
    C: BlockingDnsClient + ?Sized,
{
    loop {
        let state = result.available();
        let queries = result.take_queries();
        if queries.is_empty() {
            return state;
        }
        for query in queries {
            core_metrics().on_dns_query(query.kind.as_str());
            let outcome = client.query_blocking(&query);
            if result.on_reply(DnsReply { query, outcome }) == ReplyOutcome::Release {
                return ResultState::Destroyed;
            }
        }
    }
}

/// Drains every tuple the result yields.
pub fn collect_blocking<C>(result: &mut DnsResult, client: &C) -> Vec<Tuple>
where
    C: BlockingDnsClient + ?Sized,
{
    let mut tuples = Vec::new();
    while resolve_blocking(result, client) == ResultState::Available {
        match result.next() {
            Some(tuple) => tuples.push(tuple),
            None => break,
        }
    }
    tuples
}

/// Runs queries for one [`DnsResult`] as tokio tasks.
pub struct AsyncDriver {
    client: Arc<dyn DnsClient>,
    tx: mpsc::UnboundedSender<DnsReply>,
    rx: mpsc::UnboundedReceiver<DnsReply>,
}

impl AsyncDriver {
    pub fn new(client: Arc<dyn DnsClient>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { client, tx, rx }
    }

    fn dispatch(&self, result: &mut DnsResult) {
        for query in result.take_queries() {
            core_metrics().on_dns_query(query.kind.as_str());
            let client = Arc::clone(&self.client);
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let outcome = client.query(&query).await;
                // The driver may already be gone.
                let _ = tx.send(DnsReply { query, outcome });
            });
        }
    }

    /// Waits until the result is no longer pending.
    pub async fn wait(&mut self, result: &mut DnsResult) -> ResultState {
        loop {
            let state = result.available();
            self.dispatch(result);
            if state != ResultState::Pending {
                return state;
            }
            match self.rx.recv().await {
                Some(reply) => {
                    trace!(name = %reply.query.name, "dns reply");
                    result.on_reply(reply);
                }
                None => return result.state(),
            }
        }
    }

    /// Drains every tuple the result yields.
    pub async fn collect(&mut self, result: &mut DnsResult) -> Vec<Tuple> {
        let mut tuples = Vec::new();
        while self.wait(result).await == ResultState::Available {
            match result.next() {
                Some(tuple) => tuples.push(tuple),
                None => break,
            }
        }
        tuples
    }

    /// Destroys the result, absorbing answers still in flight.
    pub async fn finish(&mut self, mut result: DnsResult) {
        if result.destroy() {
            return;
        }
        self.dispatch(&mut result);
        while let Some(reply) = self.rx.recv().await {
            if result.on_reply(reply) == ReplyOutcome::Release {
                debug!(target = %result.target(), "released destroyed result");
                return;
            }
        }
    }
}

/// [`DnsClient`] backed by the system resolver.
#[derive(Clone)]
pub struct TrustDnsClient {
    resolver: TokioAsyncResolver,
}

impl TrustDnsClient {
    /// Uses the default resolver configuration.
    pub fn from_system() -> Self {
        Self::with_config(ResolverConfig::default(), ResolverOpts::default())
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    async fn naptr(&self, name: &str) -> Result<DnsAnswer, ResolveError> {
        let lookup = self.resolver.lookup(fqdn(name), RecordType::NAPTR).await?;
        let records = lookup
            .iter()
            .filter_map(RData::as_naptr)
            .map(|rdata| NaptrRecord {
                key: SmolStr::new(name),
                order: rdata.order(),
                preference: rdata.preference(),
                flags: lossy(rdata.flags()),
                service: lossy(rdata.services()),
                regex: lossy(rdata.regexp()),
                replacement: SmolStr::new(rdata.replacement().to_utf8().trim_end_matches('.')),
            })
            .collect();
        Ok(DnsAnswer::Naptr(records))
    }

    async fn srv(&self, name: &str) -> Result<DnsAnswer, ResolveError> {
        let lookup = self.resolver.srv_lookup(fqdn(name)).await?;
        let records = lookup
            .iter()
            .map(|srv| {
                SrvTarget::new(
                    srv.priority(),
                    srv.weight(),
                    srv.port(),
                    srv.target().to_utf8().trim_end_matches('.'),
                )
            })
            .collect();
        let glue = lookup
            .as_lookup()
            .records()
            .iter()
            .filter_map(|record| {
                let ip = match record.data()? {
                    RData::A(a) => IpAddr::V4(a.0),
                    RData::AAAA(aaaa) => IpAddr::V6(aaaa.0),
                    _ => return None,
                };
                let host = record.name().to_utf8();
                Some((SmolStr::new(host.trim_end_matches('.')), ip))
            })
            .collect();
        Ok(DnsAnswer::Srv { records, glue })
    }

    async fn host(&self, name: &str, kind: QueryKind) -> Result<DnsAnswer, ResolveError> {
        let addrs = if kind == QueryKind::Aaaa {
            self.resolver
                .ipv6_lookup(fqdn(name))
                .await?
                .iter()
                .map(|aaaa| IpAddr::V6(aaaa.0))
                .collect()
        } else {
            self.resolver
                .ipv4_lookup(fqdn(name))
                .await?
                .iter()
                .map(|a| IpAddr::V4(a.0))
                .collect()
        };
        Ok(DnsAnswer::Host(addrs))
    }
}

#[async_trait]
impl DnsClient for TrustDnsClient {
    async fn query(&self, query: &DnsQuery) -> Result<DnsAnswer, LookupError> {
        let name = query.name.as_str();
        let answer = match query.kind {
            QueryKind::Naptr => self.naptr(name).await,
            QueryKind::Srv => self.srv(name).await,
            QueryKind::A | QueryKind::Aaaa => self.host(name, query.kind).await,
        };
        answer.map_err(|err| match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => LookupError::NoRecords,
            ResolveErrorKind::Timeout => LookupError::Timeout,
            _ => LookupError::Failed(SmolStr::new(err.to_string())),
        })
    }
}

fn fqdn(name: &str) -> String {
    format!("{}.", name.trim_end_matches('.'))
}

fn lossy(bytes: &[u8]) -> SmolStr {
    SmolStr::new(String::from_utf8_lossy(bytes))
}
