// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runs a [`ForkSession`] on a tokio task.
//!
//! Events for a session are serialized through one channel: responses
//! routed by [`ForkRouter`], CANCELs sent through the [`ForkHandle`] and
//! timers, which are spawned sleeps that post their event back into the
//! same channel. When the session finishes the receiver is dropped and
//! timers still pending deliver into nothing.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sip_core::{Request, Response};
use sip_observe::span_for_transaction;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn, Instrument};

use crate::context::ForkAction;
use crate::error::ForkError;
use crate::forward::{make_response, top_via_branch};
use crate::session::{ForkEvent, ForkSession};
use crate::target::TransactionId;

const EVENT_QUEUE_DEPTH: usize = 128;

/// Client/server transaction operations the forking layer needs.
#[async_trait]
pub trait TransactionLayer: Send + Sync {
    /// Sends `request` on a new client transaction identified by `tid`.
    async fn start_client_transaction(
        &self,
        tid: &TransactionId,
        request: Request,
    ) -> Result<(), ForkError>;

    /// Sends CANCEL for the client transaction `tid`.
    async fn cancel_client_transaction(&self, tid: &TransactionId);

    /// Sends a response on the original server transaction.
    async fn send_upstream(&self, response: Response);

    /// Answers the CANCEL server transaction.
    async fn answer_cancel(&self, response: Response);
}

/// Routes client transaction responses to the session owning the branch.
#[derive(Default)]
pub struct ForkRouter {
    branches: DashMap<TransactionId, mpsc::Sender<ForkEvent>>,
}

impl ForkRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tid: TransactionId, events: mpsc::Sender<ForkEvent>) {
        self.branches.insert(tid, events);
    }

    pub fn unregister(&self, tid: &str) {
        self.branches.remove(tid);
    }

    /// Delivers a response. Returns `false` for unknown branches or a
    /// session that already finished.
    pub async fn route_response(&self, tid: &str, response: Response) -> bool {
        let Some(events) = self.branches.get(tid).map(|entry| entry.value().clone()) else {
            debug!(tid = %tid, code = response.code(), "no fork session for response");
            return false;
        };
        events
            .send(ForkEvent::Response {
                tid: TransactionId::new(tid),
                response,
            })
            .await
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Handle to a running fork.
pub struct ForkHandle {
    events: mpsc::Sender<ForkEvent>,
    task: JoinHandle<()>,
}

impl ForkHandle {
    /// Delivers a CANCEL for the server transaction.
    pub async fn cancel(&self, request: Request) -> Result<(), ForkError> {
        self.events
            .send(ForkEvent::Cancel(request))
            .await
            .map_err(|_| ForkError::DriverStopped)
    }

    pub fn events(&self) -> mpsc::Sender<ForkEvent> {
        self.events.clone()
    }

    /// Waits for the session to finish.
    pub async fn finished(self) -> Result<(), ForkError> {
        self.task.await.map_err(|_| ForkError::DriverStopped)
    }
}

pub struct ForkDriver {
    session: ForkSession,
    layer: Arc<dyn TransactionLayer>,
    router: Arc<ForkRouter>,
    tx: mpsc::Sender<ForkEvent>,
    branches: Vec<TransactionId>,
    pending: VecDeque<ForkEvent>,
}

impl ForkDriver {
    /// Spawns the session; its first group starts immediately.
    pub fn spawn(
        session: ForkSession,
        layer: Arc<dyn TransactionLayer>,
        router: Arc<ForkRouter>,
    ) -> ForkHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let tid = top_via_branch(session.original().headers())
            .unwrap_or("unknown")
            .to_owned();
        let span = span_for_transaction("fork", &tid);
        let driver = ForkDriver {
            session,
            layer,
            router,
            tx: tx.clone(),
            branches: Vec::new(),
            pending: VecDeque::new(),
        };
        let task = tokio::spawn(driver.run(rx).instrument(span));
        ForkHandle { events: tx, task }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ForkEvent>) {
        let actions = self.session.start();
        self.execute(actions).await;

        while !self.session.is_finished() {
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => match rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };
            let actions = self.session.handle(event);
            self.execute(actions).await;
        }

        debug!(branches = self.branches.len(), "fork session finished");
        for tid in &self.branches {
            self.router.unregister(tid);
        }
    }

    async fn execute(&mut self, actions: Vec<ForkAction>) {
        for action in actions {
            match action {
                ForkAction::Start { tid, request } => {
                    self.router.register(tid.clone(), self.tx.clone());
                    self.branches.push(tid.clone());
                    let fallback = make_response(&request, 503);
                    if let Err(err) = self.layer.start_client_transaction(&tid, request).await {
                        warn!(tid = %tid, error = %err, "client transaction failed to start");
                        match fallback {
                            Ok(response) => self.pending.push_back(ForkEvent::Response { tid, response }),
                            Err(err) => warn!(error = %err, "cannot synthesize 503"),
                        }
                    }
                }
                ForkAction::Cancel { tid } => self.layer.cancel_client_transaction(&tid).await,
                ForkAction::Forward(response) => self.layer.send_upstream(response).await,
                ForkAction::RespondToCancel(response) => self.layer.answer_cancel(response).await,
                ForkAction::Schedule { event, after } => {
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        time::sleep(after).await;
                        // Session may be gone; then this is a no-op.
                        let _ = tx.send(event).await;
                    });
                }
            }
        }
    }
}
