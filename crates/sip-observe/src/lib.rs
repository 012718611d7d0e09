// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observability hooks for the SIP processing core.
//!
//! The preparser, the resolver and the forking layer report a handful of
//! low-cardinality events through a process-wide [`CoreMetrics`] sink. Until
//! a sink is installed every event goes to a no-op implementation.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_observe::{set_core_metrics, TracingCoreMetrics};
//! set_core_metrics(Arc::new(TracingCoreMetrics));
//! // Events are now emitted as tracing records
//! ```

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::Level;

/// Metrics sink for the processing core.
///
/// `transport`, `kind` and `reason` arguments are static identifiers such as
/// "tcp", "SRV" or "timeout"; never pass message content through them.
pub trait CoreMetrics: Send + Sync + 'static {
    fn on_message_framed(&self, transport: &str);
    fn on_preparse_error(&self, transport: &str);
    fn on_dns_query(&self, kind: &str);
    fn on_dns_failure(&self, kind: &str, reason: &str);
    fn on_tuples_resolved(&self, count: usize);
    fn on_branch_started(&self);
    fn on_branch_cancelled(&self);
    fn on_final_forwarded(&self, code: u16);
}

#[derive(Debug, Default)]
struct NoopCoreMetrics;

impl CoreMetrics for NoopCoreMetrics {
    fn on_message_framed(&self, _transport: &str) {}
    fn on_preparse_error(&self, _transport: &str) {}
    fn on_dns_query(&self, _kind: &str) {}
    fn on_dns_failure(&self, _kind: &str, _reason: &str) {}
    fn on_tuples_resolved(&self, _count: usize) {}
    fn on_branch_started(&self) {}
    fn on_branch_cancelled(&self) {}
    fn on_final_forwarded(&self, _code: u16) {}
}

static CORE_METRICS: OnceCell<Arc<dyn CoreMetrics>> = OnceCell::new();
static NOOP_CORE_METRICS: NoopCoreMetrics = NoopCoreMetrics;

/// Installs the global metrics sink.
///
/// Returns `false` if a sink was already installed.
pub fn set_core_metrics(metrics: Arc<dyn CoreMetrics>) -> bool {
    CORE_METRICS.set(metrics).is_ok()
}

/// Returns the installed sink, or the no-op sink.
pub fn core_metrics() -> &'static dyn CoreMetrics {
    CORE_METRICS
        .get()
        .map(|arc| arc.as_ref())
        .unwrap_or(&NOOP_CORE_METRICS)
}

/// Span wrapping work done on behalf of one server transaction.
pub fn span_for_transaction(op: &'static str, tid: &str) -> tracing::Span {
    tracing::span!(Level::INFO, "sip", op = op, tid = tid)
}

/// Span wrapping one resolution of a request target.
pub fn span_for_resolution(target: &str) -> tracing::Span {
    tracing::span!(Level::DEBUG, "resolve", target = target)
}

/// Sink that turns every event into a `tracing` record.
#[derive(Debug, Default)]
pub struct TracingCoreMetrics;

impl CoreMetrics for TracingCoreMetrics {
    fn on_message_framed(&self, transport: &str) {
        tracing::trace!(transport, "message framed");
    }

    fn on_preparse_error(&self, transport: &str) {
        tracing::warn!(transport, "preparse error");
    }

    fn on_dns_query(&self, kind: &str) {
        tracing::trace!(kind, "dns query");
    }

    fn on_dns_failure(&self, kind: &str, reason: &str) {
        tracing::debug!(kind, reason, "dns query failed");
    }

    fn on_tuples_resolved(&self, count: usize) {
        tracing::debug!(count, "tuples resolved");
    }

    fn on_branch_started(&self) {
        tracing::debug!("branch started");
    }

    fn on_branch_cancelled(&self) {
        tracing::debug!("branch cancelled");
    }

    fn on_final_forwarded(&self, code: u16) {
        tracing::debug!(code, "final response forwarded");
    }
}
