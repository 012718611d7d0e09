// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ranking of failure responses for best response selection (RFC 3261 §16.7).
//!
//! Lower ranks are preferred: they are responses the caller can act on
//! (a challenge, a redirect, a precondition). The numbers only matter
//! relative to each other and can be overridden per status code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Rank of the stored best response before any final response arrived.
pub const INITIAL_RANK: u8 = 50;

/// Rank given to 6xx responses, which beat any 3xx-5xx.
pub const GLOBAL_FAILURE_RANK: u8 = 0;

/// Policy table mapping 3xx-5xx status codes to a rank.
///
/// ```
/// use sip_proxy::ResponsePriorities;
///
/// let priorities = ResponsePriorities::default();
/// assert!(priorities.rank(401) < priorities.rank(404));
/// assert!(priorities.rank(503) < priorities.rank(408));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsePriorities {
    /// Per-code overrides of the built-in ranks.
    pub overrides: BTreeMap<u16, u8>,
}

impl ResponsePriorities {
    pub fn with_override(mut self, code: u16, rank: u8) -> Self {
        self.overrides.insert(code, rank);
        self
    }

    pub fn rank(&self, code: u16) -> u8 {
        if code >= 600 {
            return GLOBAL_FAILURE_RANK;
        }
        self.overrides
            .get(&code)
            .copied()
            .unwrap_or_else(|| default_rank(code))
    }
}

/// Built-in ranks.
pub fn default_rank(code: u16) -> u8 {
    match code {
        412 => 1,
        484 => 2,
        422 | 423 => 3,
        401 | 407 => 4,
        300..=399 => 5,
        402 => 6,
        493 => 10,
        420 => 12,
        406 | 415 | 488 => 13,
        416 | 417 => 20,
        405 | 501 => 21,
        580 => 22,
        485 => 23,
        428 | 429 | 494 => 24,
        413 | 414 => 25,
        421 => 26,
        486 => 30,
        480 => 31,
        410 => 32,
        436 | 437 | 513 => 33,
        403 => 34,
        404 => 35,
        487 => 36,
        503 => 40,
        482 | 483 => 41,
        408 => 49,
        500..=599 => 42,
        _ => 43,
    }
}
