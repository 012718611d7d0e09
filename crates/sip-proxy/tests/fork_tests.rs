use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;
use sip_core::{default_reason, Headers, Method, Request, RequestLine, Response, SipUri, StatusLine};
use sip_proxy::{
    make_response, ForkAction, ForkConfig, ForkDriver, ForkError, ForkRouter, ForkSession, QValue,
    ResponseContext, Target, TransactionId, TransactionLayer,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn request(method: Method) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP client.example.com;branch=z9hG4bKclient");
    headers.push("Max-Forwards", "70");
    headers.push("From", "<sip:alice@example.com>;tag=a");
    headers.push("To", "<sip:bob@example.com>");
    headers.push("Call-ID", "fork-tests");
    headers.push("CSeq", format!("1 {}", method));
    Request::new(
        RequestLine::new(method, SipUri::parse("sip:bob@example.com").unwrap()),
        headers,
        Bytes::new(),
    )
    .unwrap()
}

fn cancel_request() -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP client.example.com;branch=z9hG4bKclient");
    headers.push("Call-ID", "fork-tests");
    headers.push("CSeq", "1 CANCEL");
    Request::new(
        RequestLine::new(Method::Cancel, SipUri::parse("sip:bob@example.com").unwrap()),
        headers,
        Bytes::new(),
    )
    .unwrap()
}

fn target(n: u8) -> Target {
    Target::new(SipUri::parse(&format!("sip:bob@192.0.2.{}", n)).unwrap()).with_tid(format!("z9hG4bK-t{}", n))
}

/// Response as received on a branch, carrying the proxy Via on top.
fn branch_response(code: u16) -> Response {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP 127.0.0.1;branch=z9hG4bK-x");
    headers.push("Via", "SIP/2.0/UDP client.example.com;branch=z9hG4bKclient");
    if matches!(code, 401) {
        headers.push("WWW-Authenticate", "Digest realm=\"example.com\", nonce=\"n1\"");
    }
    Response::new(StatusLine::new(code, default_reason(code)).unwrap(), headers, Bytes::new()).unwrap()
}

fn forwarded(actions: &[ForkAction]) -> Vec<u16> {
    actions
        .iter()
        .filter_map(|a| match a {
            ForkAction::Forward(r) => Some(r.code()),
            _ => None,
        })
        .collect()
}

fn started(actions: &[ForkAction]) -> Vec<TransactionId> {
    actions
        .iter()
        .filter_map(|a| match a {
            ForkAction::Start { tid, .. } => Some(tid.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn best_response_independent_of_arrival_order() {
    let orders: [[u16; 3]; 6] = [
        [404, 401, 503],
        [404, 503, 401],
        [401, 404, 503],
        [401, 503, 404],
        [503, 404, 401],
        [503, 401, 404],
    ];
    for order in orders {
        let mut ctx = ResponseContext::new(request(Method::Invite), Arc::new(ForkConfig::default()));
        for n in 1..=3 {
            assert!(ctx.add_target(target(n)));
        }
        assert!(ctx.begin_client_transactions());
        ctx.drain_actions();

        for (i, code) in order.iter().enumerate() {
            let tid = format!("z9hG4bK-t{}", i + 1);
            assert!(ctx.process_response(&tid, branch_response(*code)));
        }
        let actions = ctx.drain_actions();
        assert_eq!(forwarded(&actions), vec![401], "order {:?}", order);
        assert_eq!(ctx.best_rank(), 4);
        assert!(ctx.are_all_transactions_terminated());
    }
}

#[test]
fn higher_q_group_answers_before_lower_q_is_tried() {
    let mut session = ForkSession::new(request(Method::Invite), Arc::new(ForkConfig::default()));
    let accepted = session.add_targets(vec![
        target(1),
        target(2),
        target(3).with_q(QValue::from_millis(500)),
    ]);
    assert_eq!(accepted, 3);

    let actions = session.start();
    let mut first_group = started(&actions);
    first_group.sort();
    assert_eq!(first_group, vec!["z9hG4bK-t1", "z9hG4bK-t2"]);
    assert!(session.context().is_candidate("z9hG4bK-t3"));

    let actions = session.handle(sip_proxy::ForkEvent::Response {
        tid: "z9hG4bK-t1".into(),
        response: branch_response(486),
    });
    assert!(forwarded(&actions).is_empty());

    let actions = session.handle(sip_proxy::ForkEvent::Response {
        tid: "z9hG4bK-t2".into(),
        response: branch_response(180),
    });
    assert_eq!(forwarded(&actions), vec![180]);

    let actions = session.handle(sip_proxy::ForkEvent::Response {
        tid: "z9hG4bK-t2".into(),
        response: branch_response(200),
    });
    assert_eq!(forwarded(&actions), vec![200]);
    assert!(started(&actions).is_empty());

    // The q=0.5 target was never started.
    assert!(session.context().is_terminated("z9hG4bK-t3"));
    assert!(session.is_finished());
}

#[test]
fn lower_q_group_starts_after_first_group_fails() {
    let mut session = ForkSession::new(request(Method::Invite), Arc::new(ForkConfig::default()));
    session.add_targets(vec![target(1), target(2).with_q(QValue::from_millis(500))]);
    assert_eq!(started(&session.start()), vec!["z9hG4bK-t1"]);

    let actions = session.handle(sip_proxy::ForkEvent::Response {
        tid: "z9hG4bK-t1".into(),
        response: branch_response(404),
    });
    assert_eq!(started(&actions), vec!["z9hG4bK-t2"]);
    assert!(forwarded(&actions).is_empty());

    let actions = session.handle(sip_proxy::ForkEvent::Response {
        tid: "z9hG4bK-t2".into(),
        response: branch_response(486),
    });
    assert_eq!(forwarded(&actions), vec![486]);
    assert!(session.is_finished());
}

#[derive(Debug, Clone)]
enum Op {
    Begin(u8),
    Cancel(u8),
    Terminate(u8),
    Respond(u8, u16),
    Cancelled,
    TimerC,
}

fn op() -> impl Strategy<Value = Op> {
    let code = prop::sample::select(vec![100u16, 180, 183, 200, 302, 401, 404, 486, 503, 603]);
    prop_oneof![
        (0u8..5).prop_map(Op::Begin),
        (0u8..5).prop_map(Op::Cancel),
        (0u8..5).prop_map(Op::Terminate),
        ((0u8..5), code).prop_map(|(n, c)| Op::Respond(n, c)),
        Just(Op::Cancelled),
        Just(Op::TimerC),
    ]
}

proptest! {
    #[test]
    fn targets_stay_in_exactly_one_partition(ops in prop::collection::vec(op(), 0..40)) {
        let mut ctx = ResponseContext::new(request(Method::Invite), Arc::new(ForkConfig::default()));
        let tids: Vec<String> = (0..5u8).map(|n| format!("z9hG4bK-t{}", n)).collect();
        for n in 0..5u8 {
            prop_assert!(ctx.add_target(target(n)));
        }
        let mut seen_terminated = BTreeSet::new();
        let mut finals = 0;

        for op in ops {
            match op {
                Op::Begin(n) => { ctx.begin_client_transaction(&tids[n as usize]); }
                Op::Cancel(n) => { ctx.cancel_client_transaction(&tids[n as usize]); }
                Op::Terminate(n) => { ctx.terminate_client_transaction(&tids[n as usize]); }
                Op::Respond(n, code) => { ctx.process_response(&tids[n as usize], branch_response(code)); }
                Op::Cancelled => ctx.process_cancel(&cancel_request()),
                Op::TimerC => ctx.process_timer_c(),
            }
            finals += forwarded(&ctx.drain_actions()).iter().filter(|c| **c >= 300).count();

            for tid in &tids {
                let memberships = [ctx.is_candidate(tid), ctx.is_active(tid), ctx.is_terminated(tid)]
                    .iter()
                    .filter(|m| **m)
                    .count();
                prop_assert_eq!(memberships, 1, "{} in {} partitions", tid, memberships);

                let status = ctx.target(tid).unwrap().status();
                prop_assert_eq!(ctx.is_active(tid), status.is_active());
                if seen_terminated.contains(tid) {
                    prop_assert!(ctx.is_terminated(tid));
                }
                if ctx.is_terminated(tid) {
                    seen_terminated.insert(tid.clone());
                }
            }
            prop_assert!(finals <= 1);
        }
    }
}

#[derive(Debug)]
enum LayerCall {
    Start(TransactionId, Request),
    Cancel(TransactionId),
    Upstream(Response),
    AnswerCancel(Response),
}

struct RecordingLayer {
    calls: mpsc::UnboundedSender<LayerCall>,
    fail_start: bool,
}

#[async_trait]
impl TransactionLayer for RecordingLayer {
    async fn start_client_transaction(&self, tid: &TransactionId, request: Request) -> Result<(), ForkError> {
        if self.fail_start {
            return Err(ForkError::Transaction("transport unavailable".into()));
        }
        let _ = self.calls.send(LayerCall::Start(tid.clone(), request));
        Ok(())
    }

    async fn cancel_client_transaction(&self, tid: &TransactionId) {
        let _ = self.calls.send(LayerCall::Cancel(tid.clone()));
    }

    async fn send_upstream(&self, response: Response) {
        let _ = self.calls.send(LayerCall::Upstream(response));
    }

    async fn answer_cancel(&self, response: Response) {
        let _ = self.calls.send(LayerCall::AnswerCancel(response));
    }
}

async fn next_call(rx: &mut mpsc::UnboundedReceiver<LayerCall>) -> LayerCall {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("layer call within 5s")
        .expect("layer still connected")
}

fn layer(fail_start: bool) -> (Arc<RecordingLayer>, mpsc::UnboundedReceiver<LayerCall>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingLayer { calls: tx, fail_start }), rx)
}

#[tokio::test]
async fn driver_forwards_first_2xx_and_cancels_the_rest() {
    let (layer, mut calls) = layer(false);
    let router = Arc::new(ForkRouter::new());
    let mut session = ForkSession::new(request(Method::Invite), Arc::new(ForkConfig::default()));
    session.add_targets(vec![target(1), target(2)]);
    let handle = ForkDriver::spawn(session, layer, router.clone());

    let mut branches = Vec::new();
    for _ in 0..2 {
        match next_call(&mut calls).await {
            LayerCall::Start(tid, request) => branches.push((tid, request)),
            other => panic!("expected start, got {:?}", other),
        }
    }
    branches.sort_by(|a, b| a.0.cmp(&b.0));
    let (t1, req1) = branches[0].clone();
    let (t2, req2) = branches[1].clone();
    assert_eq!(router.len(), 2);

    assert!(router.route_response(&t1, make_response(&req1, 180).unwrap()).await);
    match next_call(&mut calls).await {
        LayerCall::Upstream(r) => assert_eq!(r.code(), 180),
        other => panic!("expected 180 upstream, got {:?}", other),
    }

    assert!(router.route_response(&t1, make_response(&req1, 200).unwrap()).await);
    match next_call(&mut calls).await {
        LayerCall::Upstream(r) => {
            assert_eq!(r.code(), 200);
            assert_eq!(r.headers().get_all("Via").count(), 1);
        }
        other => panic!("expected 200 upstream, got {:?}", other),
    }

    // Branch 2 had no provisional, so CANCEL waits for one.
    assert!(router.route_response(&t2, make_response(&req2, 100).unwrap()).await);
    match next_call(&mut calls).await {
        LayerCall::Cancel(tid) => assert_eq!(tid, t2),
        other => panic!("expected cancel, got {:?}", other),
    }

    assert!(router.route_response(&t2, make_response(&req2, 487).unwrap()).await);
    handle.finished().await.unwrap();
    assert!(router.is_empty());
    assert!(!router.route_response(&t2, make_response(&req2, 487).unwrap()).await);
}

#[tokio::test]
async fn driver_answers_cancel_and_forwards_487() {
    let (layer, mut calls) = layer(false);
    let router = Arc::new(ForkRouter::new());
    let mut session = ForkSession::new(request(Method::Invite), Arc::new(ForkConfig::default()));
    session.add_targets(vec![target(1)]);
    let handle = ForkDriver::spawn(session, layer, router.clone());

    let (tid, branch) = match next_call(&mut calls).await {
        LayerCall::Start(tid, request) => (tid, request),
        other => panic!("expected start, got {:?}", other),
    };
    assert!(router.route_response(&tid, make_response(&branch, 180).unwrap()).await);
    assert!(matches!(next_call(&mut calls).await, LayerCall::Upstream(r) if r.code() == 180));

    handle.cancel(cancel_request()).await.unwrap();
    assert!(matches!(next_call(&mut calls).await, LayerCall::AnswerCancel(r) if r.code() == 200));
    assert!(matches!(next_call(&mut calls).await, LayerCall::Cancel(t) if t == tid));

    assert!(router.route_response(&tid, make_response(&branch, 487).unwrap()).await);
    assert!(matches!(next_call(&mut calls).await, LayerCall::Upstream(r) if r.code() == 487));
    handle.finished().await.unwrap();
}

#[tokio::test]
async fn failed_branch_start_becomes_480() {
    let (layer, mut calls) = layer(true);
    let router = Arc::new(ForkRouter::new());
    let mut session = ForkSession::new(request(Method::Invite), Arc::new(ForkConfig::default()));
    session.add_targets(vec![target(1)]);
    let handle = ForkDriver::spawn(session, layer, router.clone());

    match next_call(&mut calls).await {
        LayerCall::Upstream(r) => assert_eq!(r.code(), 480),
        other => panic!("expected 480 upstream, got {:?}", other),
    }
    handle.finished().await.unwrap();
    assert!(router.is_empty());
}
