// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3263 target resolution.
//!
//! The core is [`DnsResult`], a sans-IO state machine that turns one URI
//! into an ordered stream of [`Tuple`]s (address, port, transport). It is
//! driven either inline through [`resolve_blocking`] or on tokio through
//! [`AsyncDriver`]. [`SipResolver`] wraps the async path behind the
//! [`Resolver`] trait for callers that just want a list of targets.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use sip_core::SipUri;
use sip_observe::span_for_resolution;
use tracing::Instrument;

pub mod client;
pub mod marks;
pub mod records;
pub mod result;
pub mod srv;
pub mod tuple;
pub mod zone;

pub use client::{
    collect_blocking, resolve_blocking, AsyncDriver, BlockingDnsClient, DnsClient, DnsReply,
    LookupError, TrustDnsClient,
};
pub use marks::{MarkType, TupleMarkManager};
pub use records::{DnsAnswer, DnsQuery, NaptrRecord, QueryKind, SrvRecord, SrvTarget};
pub use result::{DnsResult, ReplyOutcome, ResultState};
pub use tuple::{Transport, TransportSupport, Tuple};
pub use zone::ZoneClient;

/// Trait for DNS resolution backends.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, uri: &SipUri) -> Result<Vec<Tuple>>;
}

/// Resolver running the full RFC 3263 procedure over a [`DnsClient`].
#[derive(Clone)]
pub struct SipResolver {
    client: Arc<dyn DnsClient>,
    support: TransportSupport,
    marks: Arc<TupleMarkManager>,
}

impl SipResolver {
    /// Creates a resolver using system DNS configuration.
    pub fn from_system() -> Self {
        Self::with_client(Arc::new(TrustDnsClient::from_system()))
    }

    pub fn with_client(client: Arc<dyn DnsClient>) -> Self {
        Self {
            client,
            support: TransportSupport::default(),
            marks: Arc::new(TupleMarkManager::new()),
        }
    }

    pub fn with_support(mut self, support: TransportSupport) -> Self {
        self.support = support;
        self
    }

    /// Disables NAPTR lookups (useful for testing or non-compliant networks).
    pub fn disable_naptr(mut self) -> Self {
        self.support = self.support.disable_naptr();
        self
    }

    /// Shared blacklist/greylist state. Marks set through a [`DnsResult`]
    /// created by [`SipResolver::start`] land here.
    pub fn marks(&self) -> Arc<TupleMarkManager> {
        Arc::clone(&self.marks)
    }

    /// Starts a resolution that the caller drives tuple by tuple.
    pub fn start(&self, uri: &SipUri) -> (DnsResult, AsyncDriver) {
        let mut result = DnsResult::new(self.support.clone(), self.marks());
        result.lookup(uri);
        (result, AsyncDriver::new(Arc::clone(&self.client)))
    }
}

#[async_trait::async_trait]
impl Resolver for SipResolver {
    async fn resolve(&self, uri: &SipUri) -> Result<Vec<Tuple>> {
        let span = span_for_resolution(uri.as_str());
        async {
            let (mut result, mut driver) = self.start(uri);
            let tuples = driver.collect(&mut result).await;
            driver.finish(result).await;
            if tuples.is_empty() {
                Err(anyhow!("No DNS targets found for {}", uri.host))
            } else {
                Ok(tuples)
            }
        }
        .instrument(span)
        .await
    }
}

/// Static resolver for testing that returns pre-configured endpoints.
#[derive(Clone)]
pub struct StaticResolver {
    targets: Vec<Tuple>,
}

impl StaticResolver {
    pub fn new(targets: Vec<Tuple>) -> Self {
        Self { targets }
    }

    pub fn single(addr: SocketAddr, transport: Transport) -> Self {
        Self {
            targets: vec![Tuple::new(addr, transport, addr.ip().to_string())],
        }
    }
}

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _uri: &SipUri) -> Result<Vec<Tuple>> {
        Ok(self.targets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_returns_configured_targets() {
        let targets = vec![
            Tuple::new("192.0.2.1:5060".parse().unwrap(), Transport::Udp, "a.example.com"),
            Tuple::new("192.0.2.2:5060".parse().unwrap(), Transport::Tcp, "b.example.com"),
        ];
        let resolver = StaticResolver::new(targets.clone());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let uri = SipUri::parse("sip:test@example.com").unwrap();
        let result = rt.block_on(resolver.resolve(&uri)).expect("resolve");

        assert_eq!(result, targets);
    }

    #[test]
    fn single_static_resolver() {
        let resolver = StaticResolver::single("192.0.2.1:5070".parse().unwrap(), Transport::Udp);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let uri = SipUri::parse("sip:test@example.com").unwrap();
        let result = rt.block_on(resolver.resolve(&uri)).expect("resolve");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].addr.port(), 5070);
        assert_eq!(result[0].transport, Transport::Udp);
        assert_eq!(result[0].target_domain, "192.0.2.1");
    }
}
