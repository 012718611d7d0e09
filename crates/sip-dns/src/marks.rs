// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared blacklist/greylist of resolved tuples.

use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::tuple::{Transport, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkType {
    Ok,
    /// Usable, but only after every unmarked tuple.
    Grey,
    /// Never returned until the mark expires.
    Black,
}

/// Tuple marks shared by every resolution of one stack. Marks expire on their
/// own; an expired mark reads as [`MarkType::Ok`].
#[derive(Debug, Default)]
pub struct TupleMarkManager {
    marks: DashMap<(SocketAddr, Transport), (MarkType, Instant)>,
}

impl TupleMarkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, tuple: &Tuple, expiry: Instant, kind: MarkType) {
        debug!(tuple = %tuple, kind = ?kind, "marking tuple");
        if kind == MarkType::Ok {
            self.marks.remove(&(tuple.addr, tuple.transport));
        } else {
            self.marks.insert((tuple.addr, tuple.transport), (kind, expiry));
        }
    }

    pub fn mark_type(&self, tuple: &Tuple) -> MarkType {
        self.mark_type_at(tuple, Instant::now())
    }

    pub fn mark_type_at(&self, tuple: &Tuple, now: Instant) -> MarkType {
        let key = (tuple.addr, tuple.transport);
        let current = self.marks.get(&key).map(|entry| *entry.value());
        match current {
            Some((kind, expiry)) if expiry > now => kind,
            Some(_) => {
                self.marks.remove(&key);
                MarkType::Ok
            }
            None => MarkType::Ok,
        }
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tuple(port: u16) -> Tuple {
        Tuple::new(
            SocketAddr::from(([192, 0, 2, 1], port)),
            Transport::Udp,
            "example.com",
        )
    }

    #[test]
    fn marks_expire() {
        let marks = TupleMarkManager::new();
        let now = Instant::now();
        marks.mark(&tuple(5060), now + Duration::from_secs(30), MarkType::Black);
        assert_eq!(marks.mark_type_at(&tuple(5060), now), MarkType::Black);
        assert_eq!(marks.mark_type_at(&tuple(5062), now), MarkType::Ok);
        assert_eq!(
            marks.mark_type_at(&tuple(5060), now + Duration::from_secs(31)),
            MarkType::Ok
        );
        assert!(marks.is_empty());
    }

    #[test]
    fn transport_is_part_of_the_key() {
        let marks = TupleMarkManager::new();
        let udp = tuple(5060);
        let mut tcp = udp.clone();
        tcp.transport = Transport::Tcp;
        marks.mark(&udp, Instant::now() + Duration::from_secs(60), MarkType::Grey);
        assert_eq!(marks.mark_type(&udp), MarkType::Grey);
        assert_eq!(marks.mark_type(&tcp), MarkType::Ok);
    }

    #[test]
    fn ok_mark_clears() {
        let marks = TupleMarkManager::new();
        let t = tuple(5060);
        marks.mark(&t, Instant::now() + Duration::from_secs(60), MarkType::Black);
        marks.mark(&t, Instant::now(), MarkType::Ok);
        assert_eq!(marks.mark_type(&t), MarkType::Ok);
    }
}
