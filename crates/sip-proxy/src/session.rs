// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One forked request: response context, scheduler and Timer C.
//!
//! Every input is a [`ForkEvent`] handled to completion by
//! [`ForkSession::handle`], which returns the actions to execute. Timers
//! are actions too ([`ForkAction::Schedule`]); when one fires, the event it
//! carries is fed back through `handle`. Timer C events carry a serial so a
//! timer that was refreshed in the meantime is ignored.

use std::sync::Arc;

use sip_core::{Request, Response};
use tracing::{debug, trace};

use crate::config::ForkConfig;
use crate::context::{ForkAction, ResponseContext};
use crate::qvalue::{ForkControl, QValueTargetHandler};
use crate::target::{Target, TransactionId};

/// Input to a [`ForkSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum ForkEvent {
    /// Response received on a client transaction.
    Response { tid: TransactionId, response: Response },
    /// CANCEL received for the server transaction.
    Cancel(Request),
    /// Timer C fired.
    TimerC { serial: u64 },
    /// Scheduler self-message.
    ForkControl(ForkControl),
}

pub struct ForkSession {
    context: ResponseContext,
    handler: QValueTargetHandler,
    timer_c_serial: u64,
    started: bool,
}

impl ForkSession {
    pub fn new(original: Request, config: Arc<ForkConfig>) -> Self {
        Self {
            context: ResponseContext::new(original, config),
            handler: QValueTargetHandler::new(),
            timer_c_serial: 0,
            started: false,
        }
    }

    pub fn context(&self) -> &ResponseContext {
        &self.context
    }

    pub fn original(&self) -> &Request {
        self.context.original()
    }

    /// Adds a batch of targets (one scheduler queue). Targets added after
    /// [`ForkSession::start`] are picked up by the next event.
    pub fn add_targets(&mut self, targets: Vec<Target>) -> usize {
        self.handler.add_batch(&mut self.context, targets)
    }

    /// Launches the first group and arms Timer C for INVITE.
    pub fn start(&mut self) -> Vec<ForkAction> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let scheduled = self.handler.process(&mut self.context);
        self.schedule_controls(scheduled);
        if self.context.is_invite() && !self.context.final_forwarded() {
            self.arm_timer_c();
        }
        self.context.drain_actions()
    }

    pub fn handle(&mut self, event: ForkEvent) -> Vec<ForkAction> {
        match event {
            ForkEvent::Response { tid, response } => {
                let refresh = self.context.is_invite() && (101..200).contains(&response.code());
                if self.context.process_response(&tid, response) && refresh {
                    self.arm_timer_c();
                }
                let scheduled = self.handler.process(&mut self.context);
                self.schedule_controls(scheduled);
            }
            ForkEvent::Cancel(cancel) => self.context.process_cancel(&cancel),
            ForkEvent::TimerC { serial } => {
                if serial != self.timer_c_serial {
                    trace!(serial, current = self.timer_c_serial, "stale timer C ignored");
                } else if !self.context.final_forwarded() {
                    debug!("timer C fired");
                    self.context.process_timer_c();
                    let scheduled = self.handler.process(&mut self.context);
                    self.schedule_controls(scheduled);
                }
            }
            ForkEvent::ForkControl(control) => {
                let scheduled = self.handler.on_control(&mut self.context, control);
                self.schedule_controls(scheduled);
            }
        }
        self.context.drain_actions()
    }

    /// The final response went upstream and no branch is still running.
    pub fn is_finished(&self) -> bool {
        self.started && self.context.final_forwarded() && !self.context.has_active_transactions()
    }

    fn arm_timer_c(&mut self) {
        let Some(after) = self.context.config().timer_c() else {
            return;
        };
        self.timer_c_serial += 1;
        self.context.push_action(ForkAction::Schedule {
            event: ForkEvent::TimerC {
                serial: self.timer_c_serial,
            },
            after,
        });
    }

    fn schedule_controls(&mut self, scheduled: Vec<(ForkControl, std::time::Duration)>) {
        for (control, after) in scheduled {
            self.context.push_action(ForkAction::Schedule {
                event: ForkEvent::ForkControl(control),
                after,
            });
        }
    }
}
