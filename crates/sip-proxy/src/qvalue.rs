//! Q-value driven fork scheduling.
//!
//! Targets are queued per batch, highest q first. A queue is serviced only
//! while none of the context's branches is active; each service launches
//! one group whose shape depends on [`ForkBehavior`]. Timed follow-ups
//! (cancelling a group, starting the next one without waiting) are returned
//! as [`ForkControl`] messages for the session to deliver later. Every group
//! start bumps a generation; a `BeginNextGroup` armed for an earlier
//! generation is ignored when it fires.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::ForkBehavior;
use crate::context::ResponseContext;
use crate::target::{QValue, Target, TransactionId};

/// Timed self-message of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkControl {
    /// Start the next group even if the current one is still active.
    /// Only honoured while `generation` is still the latest group started.
    BeginNextGroup { generation: u64 },
    /// Cancel the given group if it is still running.
    CancelGroup(Vec<TransactionId>),
}

pub struct QValueTargetHandler {
    queues: VecDeque<VecDeque<(TransactionId, QValue)>>,
    generation: u64,
}

impl QValueTargetHandler {
    pub fn new() -> Self {
        Self {
            queues: VecDeque::new(),
            generation: 0,
        }
    }

    /// Adds a batch to the context and queues the accepted targets.
    /// Returns how many were accepted.
    pub fn add_batch(&mut self, ctx: &mut ResponseContext, targets: Vec<Target>) -> usize {
        let mut queue: Vec<(TransactionId, QValue)> = targets
            .iter()
            .map(|t| (t.tid().clone(), t.q()))
            .collect();
        let accepted = ctx.add_target_batch(targets);
        queue.retain(|(tid, _)| accepted.contains(tid));
        // Stable: equal q keeps insertion order.
        queue.sort_by(|a, b| b.1.cmp(&a.1));
        let count = queue.len();
        if count > 0 {
            self.queues.push_back(queue.into());
        }
        count
    }

    /// Targets still queued.
    pub fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Runs after every event. Starts the next group when nothing is active.
    pub fn process(&mut self, ctx: &mut ResponseContext) -> Vec<(ForkControl, Duration)> {
        if ctx.final_forwarded() || ctx.has_active_transactions() {
            return Vec::new();
        }
        self.begin_next_group(ctx)
    }

    /// Delivers a timed control message.
    pub fn on_control(
        &mut self,
        ctx: &mut ResponseContext,
        control: ForkControl,
    ) -> Vec<(ForkControl, Duration)> {
        if ctx.final_forwarded() {
            trace!(?control, "fork already finished, control ignored");
            return Vec::new();
        }
        match control {
            ForkControl::CancelGroup(tids) => {
                for tid in &tids {
                    if ctx.is_active(tid) {
                        debug!(tid = %tid, "cancelling fork group member");
                        ctx.cancel_client_transaction(tid);
                    }
                }
                Vec::new()
            }
            ForkControl::BeginNextGroup { generation } if generation != self.generation => {
                trace!(generation, current = self.generation, "stale fork group timer ignored");
                Vec::new()
            }
            ForkControl::BeginNextGroup { .. } => self.begin_next_group(ctx),
        }
    }

    fn begin_next_group(&mut self, ctx: &mut ResponseContext) -> Vec<(ForkControl, Duration)> {
        let mut scheduled = Vec::new();
        loop {
            let Some(group) = self.take_group(ctx) else {
                break;
            };
            let started: Vec<TransactionId> = group
                .into_iter()
                .filter(|tid| ctx.begin_client_transaction(tid))
                .collect();
            if started.is_empty() {
                // Nothing in this group could start; try the next one now.
                continue;
            }
            self.generation += 1;
            debug!(count = started.len(), generation = self.generation, "fork group started");

            if self.queued() > 0 {
                let config = ctx.config();
                if config.cancel_between_fork_groups {
                    scheduled.push((ForkControl::CancelGroup(started.clone()), config.before_cancel()));
                }
                if !config.wait_for_terminate {
                    scheduled.push((
                        ForkControl::BeginNextGroup {
                            generation: self.generation,
                        },
                        config.between_fork_groups(),
                    ));
                }
            }
            break;
        }

        if ctx.are_all_transactions_terminated() {
            ctx.forward_best_response();
        }
        scheduled
    }

    /// Pops the next group from the first queue holding live candidates.
    fn take_group(&mut self, ctx: &ResponseContext) -> Option<Vec<TransactionId>> {
        let behavior = ctx.config().behavior;
        while let Some(queue) = self.queues.front_mut() {
            queue.retain(|(tid, _)| ctx.is_candidate(tid));
            let Some(&(_, top_q)) = queue.front() else {
                self.queues.pop_front();
                continue;
            };
            let take = match behavior {
                ForkBehavior::FullSequential => 1,
                ForkBehavior::EqualQParallel => queue.iter().take_while(|(_, q)| *q == top_q).count(),
                ForkBehavior::FullParallel => queue.len(),
            };
            let group: Vec<TransactionId> = queue.drain(..take).map(|(tid, _)| tid).collect();
            if queue.is_empty() {
                self.queues.pop_front();
            }
            return Some(group);
        }
        None
    }
}

impl Default for QValueTargetHandler {
    fn default() -> Self {
        Self::new()
    }
}
