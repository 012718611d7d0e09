// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-request forking state and best response selection.
//!
//! A [`ResponseContext`] owns every target forked from one server
//! transaction. Each target lives in exactly one of three maps:
//!
//! | map        | statuses                                          |
//! |------------|---------------------------------------------------|
//! | candidate  | `Candidate`                                       |
//! | active     | `Trying`, `Proceeding`, `WaitingToCancel`, `Cancelled` |
//! | terminated | `Terminated`                                      |
//!
//! Moving a target between maps is the only way its status changes. The
//! context performs no I/O: starting and cancelling client transactions and
//! forwarding responses upstream are queued as [`ForkAction`]s and collected
//! with [`ResponseContext::drain_actions`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sip_core::{default_reason, Method, Request, Response};
use sip_observe::core_metrics;
use tracing::{debug, info, trace, warn};

use crate::config::ForkConfig;
use crate::forward::{make_response, prepare_branch_request, strip_top_via};
use crate::priority::INITIAL_RANK;
use crate::session::ForkEvent;
use crate::target::{Target, TargetStatus, TransactionId};

/// Work requested by the forking layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ForkAction {
    /// Start a client transaction for `request`.
    Start { tid: TransactionId, request: Request },
    /// Send CANCEL on a branch that has received a provisional.
    Cancel { tid: TransactionId },
    /// Send a response upstream on the server transaction.
    Forward(Response),
    /// Answer a CANCEL received for the server transaction.
    RespondToCancel(Response),
    /// Feed `event` back into the session after `after`.
    Schedule { event: ForkEvent, after: Duration },
}

pub struct ResponseContext {
    original: Request,
    config: Arc<ForkConfig>,
    invite: bool,
    secure: bool,

    candidates: BTreeMap<TransactionId, Target>,
    active: BTreeMap<TransactionId, Target>,
    terminated: BTreeMap<TransactionId, Target>,

    best_response: Option<Response>,
    best_rank: u8,
    forwarded_final: bool,
    forwarded_2xx: bool,

    actions: Vec<ForkAction>,
}

impl ResponseContext {
    pub fn new(original: Request, config: Arc<ForkConfig>) -> Self {
        let invite = original.method().is_invite();
        let secure = original.uri().sips;
        Self {
            original,
            config,
            invite,
            secure,
            candidates: BTreeMap::new(),
            active: BTreeMap::new(),
            terminated: BTreeMap::new(),
            best_response: None,
            best_rank: INITIAL_RANK,
            forwarded_final: false,
            forwarded_2xx: false,
            actions: Vec::new(),
        }
    }

    pub fn original(&self) -> &Request {
        &self.original
    }

    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    pub fn is_invite(&self) -> bool {
        self.invite
    }

    /// Adds one target as a candidate. Rejected when its destination is
    /// already known, or when the request is secure and the target is not.
    pub fn add_target(&mut self, mut target: Target) -> bool {
        if self.forwarded_final && !self.invite {
            debug!(uri = %target.uri(), "final response already sent, ignoring target");
            return false;
        }
        if self.secure && !target.uri().sips {
            warn!(uri = %target.uri(), "refusing non-sips target for sips request");
            return false;
        }
        if self.contains(target.tid()) || self.all_targets().any(|t| t.uri().same_destination(target.uri())) {
            debug!(uri = %target.uri(), "duplicate target suppressed");
            return false;
        }
        target.set_status(TargetStatus::Candidate);
        trace!(tid = %target.tid(), uri = %target.uri(), q = %target.q(), "candidate added");
        self.candidates.insert(target.tid().clone(), target);
        true
    }

    /// Adds targets in order, returning the ids of those accepted.
    pub fn add_target_batch(&mut self, targets: impl IntoIterator<Item = Target>) -> Vec<TransactionId> {
        targets
            .into_iter()
            .filter_map(|target| {
                let tid = target.tid().clone();
                self.add_target(target).then_some(tid)
            })
            .collect()
    }

    /// Starts every candidate. Returns `true` if at least one started.
    pub fn begin_client_transactions(&mut self) -> bool {
        let tids: Vec<TransactionId> = self.candidates.keys().cloned().collect();
        let mut started = false;
        for tid in tids {
            started |= self.begin_client_transaction(&tid);
        }
        started
    }

    /// Starts one candidate.
    pub fn begin_client_transaction(&mut self, tid: &str) -> bool {
        if self.forwarded_2xx && self.invite {
            debug!(tid = %tid, "2xx already forwarded, not starting branch");
            return false;
        }
        let Some(mut target) = self.candidates.remove(tid) else {
            return false;
        };

        match prepare_branch_request(
            &self.original,
            &target,
            &self.config.via_host,
            &self.config.via_transport,
        ) {
            Ok(request) => {
                info!(tid = %tid, uri = %target.uri(), "starting branch");
                target.set_status(TargetStatus::Trying);
                self.actions.push(ForkAction::Start {
                    tid: target.tid().clone(),
                    request,
                });
                self.active.insert(target.tid().clone(), target);
                core_metrics().on_branch_started();
                true
            }
            Err(err) => {
                warn!(tid = %tid, error = %err, "cannot start branch");
                if let Ok(response) = make_response(&self.original, 483) {
                    self.consider_failure(response);
                }
                target.set_status(TargetStatus::Terminated);
                self.terminated.insert(target.tid().clone(), target);
                false
            }
        }
    }

    pub fn cancel_active_client_transactions(&mut self) {
        let tids: Vec<TransactionId> = self.active.keys().cloned().collect();
        for tid in tids {
            self.cancel_client_transaction(&tid);
        }
    }

    pub fn cancel_all_client_transactions(&mut self) {
        self.clear_candidate_transactions();
        self.cancel_active_client_transactions();
    }

    /// Moves every candidate straight to terminated.
    pub fn clear_candidate_transactions(&mut self) {
        for (tid, mut target) in std::mem::take(&mut self.candidates) {
            target.set_status(TargetStatus::Terminated);
            self.terminated.insert(tid, target);
        }
    }

    /// Cancels one target. A branch without a provisional cannot be
    /// cancelled yet and is marked `WaitingToCancel`. Non-INVITE branches
    /// are never cancelled (RFC 3261 §9.1); they run to their final response.
    pub fn cancel_client_transaction(&mut self, tid: &str) -> bool {
        if self.candidates.contains_key(tid) {
            return self.terminate_client_transaction(tid);
        }
        let invite = self.invite;
        let Some(target) = self.active.get_mut(tid) else {
            return false;
        };
        if !invite {
            trace!(tid = %tid, "non-INVITE branch left to complete");
            return false;
        }
        match target.status() {
            TargetStatus::Trying => {
                debug!(tid = %tid, "no provisional yet, waiting to cancel");
                target.set_status(TargetStatus::WaitingToCancel);
            }
            TargetStatus::Proceeding => {
                debug!(tid = %tid, "cancelling branch");
                target.set_status(TargetStatus::Cancelled);
                self.actions.push(ForkAction::Cancel {
                    tid: target.tid().clone(),
                });
                core_metrics().on_branch_cancelled();
            }
            _ => {}
        }
        true
    }

    /// Moves a candidate or active target to terminated.
    pub fn terminate_client_transaction(&mut self, tid: &str) -> bool {
        let Some(mut target) = self
            .candidates
            .remove(tid)
            .or_else(|| self.active.remove(tid))
        else {
            return false;
        };
        target.set_status(TargetStatus::Terminated);
        self.terminated.insert(target.tid().clone(), target);
        true
    }

    /// Forgets a target entirely.
    pub fn remove_client_transaction(&mut self, tid: &str) -> Option<Target> {
        self.candidates
            .remove(tid)
            .or_else(|| self.active.remove(tid))
            .or_else(|| self.terminated.remove(tid))
    }

    pub fn are_all_transactions_terminated(&self) -> bool {
        self.candidates.is_empty() && self.active.is_empty()
    }

    pub fn has_candidate_transactions(&self) -> bool {
        !self.candidates.is_empty()
    }

    pub fn has_active_transactions(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn has_terminated_transactions(&self) -> bool {
        !self.terminated.is_empty()
    }

    pub fn has_targets(&self) -> bool {
        self.has_candidate_transactions()
            || self.has_active_transactions()
            || self.has_terminated_transactions()
    }

    pub fn is_candidate(&self, tid: &str) -> bool {
        self.candidates.contains_key(tid)
    }

    pub fn is_active(&self, tid: &str) -> bool {
        self.active.contains_key(tid)
    }

    pub fn is_terminated(&self, tid: &str) -> bool {
        self.terminated.contains_key(tid)
    }

    pub fn target(&self, tid: &str) -> Option<&Target> {
        self.candidates
            .get(tid)
            .or_else(|| self.active.get(tid))
            .or_else(|| self.terminated.get(tid))
    }

    fn contains(&self, tid: &str) -> bool {
        self.target(tid).is_some()
    }

    fn all_targets(&self) -> impl Iterator<Item = &Target> {
        self.candidates
            .values()
            .chain(self.active.values())
            .chain(self.terminated.values())
    }

    /// Whether a final response (or a 2xx) went upstream.
    pub fn final_forwarded(&self) -> bool {
        self.forwarded_final
    }

    pub fn best_response(&self) -> Option<&Response> {
        self.best_response.as_ref()
    }

    pub fn best_rank(&self) -> u8 {
        self.best_rank
    }

    /// Feeds a response received on branch `tid`. Returns `false` when the
    /// response was dropped.
    pub fn process_response(&mut self, tid: &str, mut response: Response) -> bool {
        let code = response.code();
        let Some(status) = self.active.get(tid).map(Target::status) else {
            warn!(tid = %tid, code, "response for unknown branch dropped");
            return false;
        };

        if !strip_top_via(&mut response) {
            debug!(tid = %tid, code, "response has no Via left, not forwarding");
            if response.is_final() {
                self.terminate_client_transaction(tid);
                self.maybe_forward_best();
            }
            return false;
        }

        match code {
            100..=199 => self.on_provisional(tid, status, response),
            200..=299 => self.on_success(tid, response),
            _ => {
                self.terminate_client_transaction(tid);
                if code >= 600 {
                    self.on_global_failure(response);
                } else {
                    self.consider_failure(response);
                }
                self.maybe_forward_best();
            }
        }
        true
    }

    fn on_provisional(&mut self, tid: &str, status: TargetStatus, response: Response) {
        match status {
            TargetStatus::WaitingToCancel => {
                if let Some(target) = self.active.get_mut(tid) {
                    debug!(tid = %tid, "provisional arrived, sending deferred CANCEL");
                    target.set_status(TargetStatus::Cancelled);
                    self.actions.push(ForkAction::Cancel {
                        tid: target.tid().clone(),
                    });
                    core_metrics().on_branch_cancelled();
                }
                return;
            }
            TargetStatus::Trying => {
                if let Some(target) = self.active.get_mut(tid) {
                    target.set_status(TargetStatus::Proceeding);
                }
            }
            _ => {}
        }

        if status == TargetStatus::Cancelled {
            trace!(tid = %tid, code = response.code(), "provisional on cancelled branch dropped");
            return;
        }
        if response.code() == 100 {
            return;
        }
        if !self.forwarded_final {
            trace!(tid = %tid, code = response.code(), "forwarding provisional");
            self.actions.push(ForkAction::Forward(response));
        }
    }

    fn on_success(&mut self, tid: &str, response: Response) {
        self.terminate_client_transaction(tid);
        if self.forwarded_2xx && !self.invite {
            debug!(tid = %tid, "additional 2xx for non-INVITE swallowed");
            return;
        }
        if self.forwarded_final && !self.forwarded_2xx {
            warn!(tid = %tid, "2xx after a final failure was already forwarded");
        }
        info!(tid = %tid, code = response.code(), "forwarding 2xx");
        core_metrics().on_final_forwarded(response.code());
        self.actions.push(ForkAction::Forward(response));
        self.forwarded_final = true;
        self.forwarded_2xx = true;
        if self.invite {
            self.cancel_all_client_transactions();
        }
    }

    fn on_global_failure(&mut self, response: Response) {
        if self.forwarded_final {
            return;
        }
        if self.best_rank > crate::priority::GLOBAL_FAILURE_RANK {
            debug!(code = response.code(), "6xx received, cancelling remaining branches");
            self.best_response = Some(response);
            self.best_rank = crate::priority::GLOBAL_FAILURE_RANK;
        }
        self.cancel_all_client_transactions();
    }

    /// Compares a 3xx-5xx against the stored best response.
    fn consider_failure(&mut self, response: Response) {
        if self.forwarded_final {
            return;
        }
        let rank = self.config.priorities.rank(response.code());
        if rank < self.best_rank {
            debug!(code = response.code(), rank, "new best response");
            self.best_response = Some(response);
            self.best_rank = rank;
        } else if rank == self.best_rank {
            if let Some(best) = self.best_response.as_mut() {
                merge_equal_rank(best, &response);
            }
        }
    }

    fn maybe_forward_best(&mut self) {
        if !self.forwarded_final && self.are_all_transactions_terminated() {
            self.forward_best_response();
        }
    }

    /// Sends the best response upstream, ending the fork.
    pub fn forward_best_response(&mut self) {
        if self.forwarded_final {
            return;
        }
        self.clear_candidate_transactions();
        if self.invite {
            self.cancel_active_client_transactions();
        }
        self.forwarded_final = true;

        let response = match self.best_response.take() {
            Some(best) if best.code() == 408 && !self.invite => {
                // RFC 4320: a non-INVITE 408 is not worth sending.
                info!("abandoning non-INVITE transaction with 408 best response");
                return;
            }
            Some(mut best) if best.code() == 503 => {
                let _ = best.set_status(480, default_reason(480));
                best
            }
            Some(best) => best,
            None => match make_response(&self.original, self.config.default_final_code) {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "cannot build default final response");
                    return;
                }
            },
        };
        info!(code = response.code(), "forwarding best response");
        core_metrics().on_final_forwarded(response.code());
        self.actions.push(ForkAction::Forward(response));
    }

    /// CANCEL received for the server transaction.
    pub fn process_cancel(&mut self, cancel: &Request) {
        if cancel.method() != &Method::Cancel {
            warn!(method = %cancel.method(), "process_cancel called with non-CANCEL request");
        }
        match make_response(cancel, 200) {
            Ok(ok) => self.actions.push(ForkAction::RespondToCancel(ok)),
            Err(err) => warn!(error = %err, "cannot answer CANCEL"),
        }
        self.cancel_all_client_transactions();
        if !self.forwarded_final && !self.has_active_transactions() {
            if let Ok(terminated) = make_response(&self.original, 487) {
                self.forwarded_final = true;
                core_metrics().on_final_forwarded(487);
                self.actions.push(ForkAction::Forward(terminated));
            }
        }
    }

    /// Timer C fired: branches with a provisional are cancelled, branches
    /// that never answered give up with a local 408.
    pub fn process_timer_c(&mut self) {
        let tids: Vec<TransactionId> = self.active.keys().cloned().collect();
        for tid in tids {
            let Some(status) = self.active.get(&tid).map(Target::status) else {
                continue;
            };
            match status {
                TargetStatus::Proceeding => {
                    self.cancel_client_transaction(&tid);
                }
                TargetStatus::Trying | TargetStatus::WaitingToCancel => {
                    debug!(tid = %tid, "timer C expired without provisional");
                    self.terminate_client_transaction(&tid);
                    if let Ok(timeout) = make_response(&self.original, 408) {
                        self.consider_failure(timeout);
                    }
                }
                _ => {}
            }
        }
        self.maybe_forward_best();
    }

    pub fn drain_actions(&mut self) -> Vec<ForkAction> {
        std::mem::take(&mut self.actions)
    }

    pub(crate) fn push_action(&mut self, action: ForkAction) {
        self.actions.push(action);
    }
}

/// Folds an equal-rank response into the stored best.
fn merge_equal_rank(best: &mut Response, response: &Response) {
    let best_code = best.code();
    let code = response.code();

    if matches!(best_code, 401 | 407) && matches!(code, 401 | 407) {
        for name in ["WWW-Authenticate", "Proxy-Authenticate"] {
            let values: Vec<_> = response.headers().get_all(name).cloned().collect();
            for value in values {
                best.headers_mut().push(name, value);
            }
        }
        if best.headers().contains("Proxy-Authenticate") && best_code != 407 {
            let _ = best.set_status(407, default_reason(407));
        }
        trace!(code, "merged authentication challenges");
        return;
    }

    if (300..400).contains(&code) {
        if !(300..400).contains(&best_code) {
            best.headers_mut().remove_all("Contact");
        }
        let existing: Vec<_> = best.headers().get_all("Contact").cloned().collect();
        for contact in response.headers().get_all("Contact") {
            if contact.trim() == "*" || existing.contains(contact) {
                continue;
            }
            best.headers_mut().push("Contact", contact.clone());
        }
        if best.code() != 300 {
            let _ = best.set_status(300, default_reason(300));
        }
        trace!(code, "merged redirect contacts");
    }
}
