// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request forking for a stateful SIP proxy (RFC 3261 §16).
//!
//! A [`ResponseContext`] owns the branches of one proxied request, partitioned
//! into candidate, active and terminated targets, and selects the best final
//! response among them. A [`QValueTargetHandler`] decides when each group of
//! equal q-value targets is started. [`ForkSession`] ties both together over
//! a single event stream and [`ForkDriver`] runs a session on a tokio task.
//!
//! The core is sans-IO: every decision comes back as a [`ForkAction`] for the
//! caller to carry out.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use sip_core::{Headers, Method, Request, RequestLine, SipUri};
//! use sip_proxy::{ForkAction, ForkConfig, ForkSession, Target};
//!
//! let mut headers = Headers::new();
//! headers.push("Via", "SIP/2.0/UDP client.example.com;branch=z9hG4bKclient");
//! headers.push("Max-Forwards", "70");
//! let uri = SipUri::parse("sip:bob@example.com").unwrap();
//! let request = Request::new(RequestLine::new(Method::Options, uri), headers, Bytes::new()).unwrap();
//!
//! let mut session = ForkSession::new(request, Arc::new(ForkConfig::default()));
//! session.add_targets(vec![Target::new(SipUri::parse("sip:bob@10.0.0.1").unwrap())]);
//! let actions = session.start();
//! assert!(actions.iter().any(|a| matches!(a, ForkAction::Start { .. })));
//! ```

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod forward;
pub mod priority;
pub mod qvalue;
pub mod session;
pub mod target;

pub use config::{ForkBehavior, ForkConfig};
pub use context::{ForkAction, ResponseContext};
pub use driver::{ForkDriver, ForkHandle, ForkRouter, TransactionLayer};
pub use error::ForkError;
pub use forward::{make_response, prepare_branch_request, strip_top_via, DEFAULT_MAX_FORWARDS};
pub use priority::{ResponsePriorities, GLOBAL_FAILURE_RANK, INITIAL_RANK};
pub use qvalue::{ForkControl, QValueTargetHandler};
pub use session::{ForkEvent, ForkSession};
pub use target::{generate_branch_id, QValue, Target, TargetStatus, TransactionId};
