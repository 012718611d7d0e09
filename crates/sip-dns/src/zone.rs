//! In-memory DNS zone for tests and offline tooling.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::client::{BlockingDnsClient, DnsClient, LookupError};
use crate::records::{DnsAnswer, DnsQuery, NaptrRecord, QueryKind, SrvTarget};

/// Answers queries from static tables and logs every query it sees.
///
/// ```
/// use sip_dns::ZoneClient;
///
/// let zone = ZoneClient::new()
///     .with_srv("_sip._udp.example.com", 10, 60, 5060, "a.example.com")
///     .with_host("a.example.com", "192.0.2.1".parse().unwrap());
/// assert!(zone.queries().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ZoneClient {
    naptr: HashMap<SmolStr, Vec<NaptrRecord>>,
    srv: HashMap<SmolStr, Vec<SrvTarget>>,
    glue: HashMap<SmolStr, Vec<IpAddr>>,
    hosts: HashMap<SmolStr, Vec<IpAddr>>,
    timeouts: Vec<DnsQuery>,
    log: Mutex<Vec<DnsQuery>>,
}

impl ZoneClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_naptr(
        mut self,
        name: &str,
        order: u16,
        preference: u16,
        service: &str,
        replacement: &str,
    ) -> Self {
        let key = normalize(name);
        let record = NaptrRecord::new(key.clone(), order, preference, service, normalize(replacement));
        self.naptr.entry(key).or_default().push(record);
        self
    }

    pub fn with_srv(mut self, name: &str, priority: u16, weight: u16, port: u16, target: &str) -> Self {
        self.srv
            .entry(normalize(name))
            .or_default()
            .push(SrvTarget::new(priority, weight, port, normalize(target)));
        self
    }

    /// Address returned in the additional section of SRV answers naming `host`.
    pub fn with_srv_glue(mut self, host: &str, ip: IpAddr) -> Self {
        self.glue.entry(normalize(host)).or_default().push(ip);
        self
    }

    pub fn with_host(mut self, host: &str, ip: IpAddr) -> Self {
        self.hosts.entry(normalize(host)).or_default().push(ip);
        self
    }

    /// Makes the given query time out.
    pub fn with_timeout(mut self, name: &str, kind: QueryKind) -> Self {
        self.timeouts.push(DnsQuery::new(normalize(name), kind));
        self
    }

    /// Every query answered so far, in arrival order.
    pub fn queries(&self) -> Vec<DnsQuery> {
        self.log.lock().clone()
    }

    fn answer(&self, query: &DnsQuery) -> Result<DnsAnswer, LookupError> {
        self.log.lock().push(query.clone());

        let name = normalize(&query.name);
        if self.timeouts.iter().any(|q| q.kind == query.kind && q.name == name) {
            return Err(LookupError::Timeout);
        }

        match query.kind {
            QueryKind::Naptr => self
                .naptr
                .get(&name)
                .map(|records| DnsAnswer::Naptr(records.clone()))
                .ok_or(LookupError::NoRecords),
            QueryKind::Srv => {
                let records = self.srv.get(&name).ok_or(LookupError::NoRecords)?;
                let glue = records
                    .iter()
                    .filter_map(|r| self.glue.get(&r.target).map(|ips| (r.target.clone(), ips)))
                    .flat_map(|(host, ips)| ips.iter().map(move |ip| (host.clone(), *ip)))
                    .collect();
                Ok(DnsAnswer::Srv {
                    records: records.clone(),
                    glue,
                })
            }
            QueryKind::A | QueryKind::Aaaa => {
                let want_v6 = query.kind == QueryKind::Aaaa;
                let addrs: Vec<IpAddr> = self
                    .hosts
                    .get(&name)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|ip| ip.is_ipv6() == want_v6)
                    .collect();
                if addrs.is_empty() {
                    Err(LookupError::NoRecords)
                } else {
                    Ok(DnsAnswer::Host(addrs))
                }
            }
        }
    }
}

impl BlockingDnsClient for ZoneClient {
    fn query_blocking(&self, query: &DnsQuery) -> Result<DnsAnswer, LookupError> {
        self.answer(query)
    }
}

#[async_trait]
impl DnsClient for ZoneClient {
    async fn query(&self, query: &DnsQuery) -> Result<DnsAnswer, LookupError> {
        self.answer(query)
    }
}

fn normalize(name: &str) -> SmolStr {
    SmolStr::new(name.trim_end_matches('.').to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_by_family_and_logs() {
        let zone = ZoneClient::new()
            .with_host("Host.Example.com.", "192.0.2.1".parse().unwrap())
            .with_host("host.example.com", "2001:db8::1".parse().unwrap());

        let a = zone.query_blocking(&DnsQuery::new("host.example.com", QueryKind::A));
        assert_eq!(a, Ok(DnsAnswer::Host(vec!["192.0.2.1".parse().unwrap()])));
        let missing = zone.query_blocking(&DnsQuery::new("other.example.com", QueryKind::A));
        assert_eq!(missing, Err(LookupError::NoRecords));
        assert_eq!(zone.queries().len(), 2);
    }

    #[test]
    fn srv_answers_carry_glue() {
        let zone = ZoneClient::new()
            .with_srv("_sip._udp.example.com", 1, 0, 5060, "a.example.com")
            .with_srv_glue("a.example.com", "192.0.2.5".parse().unwrap());
        let answer = zone
            .query_blocking(&DnsQuery::new("_sip._udp.example.com", QueryKind::Srv))
            .unwrap();
        match answer {
            DnsAnswer::Srv { records, glue } => {
                assert_eq!(records.len(), 1);
                assert_eq!(glue, vec![(SmolStr::new("a.example.com"), "192.0.2.5".parse().unwrap())]);
            }
            other => panic!("unexpected answer {:?}", other),
        }
    }

    #[test]
    fn configured_timeout() {
        let zone = ZoneClient::new().with_timeout("example.com", QueryKind::Naptr);
        let answer = zone.query_blocking(&DnsQuery::new("example.com", QueryKind::Naptr));
        assert_eq!(answer, Err(LookupError::Timeout));
    }
}
