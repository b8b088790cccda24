//! Black-box scenarios driving a `Runtime` end to end, as if a host binary
//! had decoded frames off a real socket and handed them to
//! `Runtime::on_frame`. Every test builds its own `Runtime`, since stage-type
//! registration closes after the first stage is created.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use roomcore::auth::{HmacTokenVerifier, StageTarget};
use roomcore::player::{ActorContext, ActorRegistry};
use roomcore::sender::ReplyScope;
use roomcore::session::session::{CloseReason, TransportKind};
use roomcore::session::transport::TransportSink;
use roomcore::stage::{HandlerResult, StageContext, UserStage};
use roomcore::util::ids::{AccountId, TimerId};
use roomcore::wire::Packet;
use roomcore::{Runtime, RuntimeConfig};

/// Captures every frame a session would have written to its socket.
struct RecordingSink {
    sent: Arc<StdMutex<Vec<Packet>>>,
}

#[async_trait]
impl TransportSink for RecordingSink {
    async fn send_frame(&self, packet: Packet) -> std::io::Result<()> {
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }
    async fn close(&self) {}
}

fn recording_sink() -> (Arc<RecordingSink>, Arc<StdMutex<Vec<Packet>>>) {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    (Arc::new(RecordingSink { sent: Arc::clone(&sent) }), sent)
}

/// Polls `sent` until a packet with `msg_id` shows up, or panics after
/// `budget` elapses. Everything here runs through background tokio tasks
/// (the session's writer task, the mailbox worker), so polling is the only
/// option a black-box test has.
async fn wait_for_reply(sent: &StdMutex<Vec<Packet>>, msg_id: &str, budget: Duration) -> Packet {
    let step = Duration::from_millis(5);
    let mut waited = Duration::ZERO;
    loop {
        if let Some(packet) = sent.lock().unwrap().iter().find(|p| p.msg_id() == msg_id) {
            return packet.clone();
        }
        if waited >= budget {
            panic!("timed out waiting for {msg_id}, sent so far: {:?}", sent.lock().unwrap().iter().map(Packet::msg_id).collect::<Vec<_>>());
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
}

async fn wait_until(budget: Duration, mut predicate: impl FnMut() -> bool) {
    let step = Duration::from_millis(5);
    let mut waited = Duration::ZERO;
    loop {
        if predicate() {
            return;
        }
        assert!(waited < budget, "condition did not become true within {budget:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}

static NEXT_ACCOUNT: AtomicI64 = AtomicI64::new(1);

fn next_account() -> AccountId {
    AccountId::from_raw(NEXT_ACCOUNT.fetch_add(1, Ordering::Relaxed))
}

/// Joins a fresh session to `stage_type`/`stage_target` and waits for the
/// `JoinRoomRes` that confirms it. Returns the session, its recorded
/// outbound frames, the account id used and the stage id the server
/// assigned (read off `JoinRoomRes`, since a `CreateNew` target means the
/// client does not know it up front).
async fn connect(
    runtime: &Arc<Runtime>,
    verifier: &HmacTokenVerifier,
    account_id: AccountId,
    stage_target: StageTarget,
    stage_type: &str,
) -> (Arc<roomcore::session::session::Session>, Arc<StdMutex<Vec<Packet>>>, roomcore::util::ids::StageId) {
    let (sink, sent) = recording_sink();
    let session = runtime.accept_session(TransportKind::Tcp, sink);

    let token = verifier
        .issue_token(account_id, stage_target, stage_type, Bytes::new(), Duration::from_secs(60))
        .expect("token issuance");
    let connect_packet = Packet::new(
        "ConnectWithToken",
        1,
        roomcore::util::ids::StageId::from_raw(0),
        0,
        roomcore::wire::PacketFlags::empty(),
        Bytes::from(token.into_bytes()),
    )
    .expect("well-formed ConnectWithToken packet");
    runtime.on_frame(&session, connect_packet).await;

    let join_res = wait_for_reply(&sent, "JoinRoomRes", Duration::from_millis(500)).await;
    let stage_id = join_res.stage_id();
    (session, sent, stage_id)
}

fn client_packet(msg_id: &str, msg_seq: u16, stage_id: roomcore::util::ids::StageId, payload: Bytes) -> Packet {
    Packet::new(msg_id, msg_seq, stage_id, 0, roomcore::wire::PacketFlags::empty(), payload).expect("well-formed packet")
}

fn test_runtime(config: RuntimeConfig) -> (Arc<Runtime>, Arc<HmacTokenVerifier>) {
    let verifier = Arc::new(HmacTokenVerifier::new(b"scenario-test-secret".to_vec()));
    let runtime = Runtime::new(config, Arc::clone(&verifier) as Arc<dyn roomcore::auth::TokenVerifier>);
    (runtime, verifier)
}

// ---------------------------------------------------------------------
// Basic request/reply through a stage.
// ---------------------------------------------------------------------

struct EchoStage;

#[async_trait]
impl UserStage for EchoStage {
    async fn on_dispatch(
        &mut self,
        _ctx: &StageContext,
        _actor: &ActorContext,
        reply: Option<&ReplyScope>,
        packet: &Packet,
        _registry: &ActorRegistry,
    ) -> HandlerResult<()> {
        if packet.msg_id() == "Echo" {
            if let Some(reply) = reply {
                reply.reply("EchoReply", packet.payload().clone());
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn basic_request_reply_roundtrips_through_a_stage() {
    let (runtime, verifier) = test_runtime(RuntimeConfig::default());
    runtime.register_stage_type("Echo", || Box::new(EchoStage) as Box<dyn UserStage>);

    let (session, sent, stage_id) = connect(&runtime, &verifier, next_account(), StageTarget::CreateNew, "Echo").await;

    runtime.on_frame(&session, client_packet("Echo", 7, stage_id, Bytes::from_static(b"hi"))).await;
    let reply = wait_for_reply(&sent, "EchoReply", Duration::from_millis(500)).await;
    assert_eq!(reply.msg_seq(), 7);
    assert_eq!(reply.error_code(), 0);
    assert_eq!(reply.payload().as_ref(), b"hi");
}

// ---------------------------------------------------------------------
// Reconnect preserves actor state within the grace window; exceeding it
// tears the actor down and the next join starts fresh.
// ---------------------------------------------------------------------

#[derive(Default)]
struct CounterStage {
    counters: StdMutex<HashMap<i64, u32>>,
}

#[async_trait]
impl UserStage for CounterStage {
    async fn on_join_room(&mut self, _ctx: &StageContext, actor: &ActorContext, _user_info: Bytes) -> HandlerResult<()> {
        self.counters.lock().unwrap().entry(actor.account_id().get()).or_insert(0);
        Ok(())
    }

    async fn on_leave_room(&mut self, _ctx: &StageContext, actor: &ActorContext, _reason: roomcore::stage::LeaveReason) {
        self.counters.lock().unwrap().remove(&actor.account_id().get());
    }

    async fn on_dispatch(
        &mut self,
        _ctx: &StageContext,
        actor: &ActorContext,
        reply: Option<&ReplyScope>,
        packet: &Packet,
        _registry: &ActorRegistry,
    ) -> HandlerResult<()> {
        let mut counters = self.counters.lock().unwrap();
        let count = counters.entry(actor.account_id().get()).or_insert(0);
        match packet.msg_id() {
            "Inc" => {
                *count += 1;
                if let Some(reply) = reply {
                    reply.reply("IncRes", Bytes::new());
                }
            }
            "Get" => {
                let value = count.to_string();
                if let Some(reply) = reply {
                    reply.reply("GetRes", Bytes::from(value.into_bytes()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::test]
async fn reconnect_within_grace_window_preserves_actor_state() {
    let config = RuntimeConfig::builder()
        .with_reconnect_grace(Duration::from_millis(400))
        .build()
        .expect("valid config");
    let (runtime, verifier) = test_runtime(config);
    runtime.register_stage_type("Counter", || Box::new(CounterStage::default()) as Box<dyn UserStage>);

    let account_id = next_account();
    let (session, sent, stage_id) = connect(&runtime, &verifier, account_id, StageTarget::CreateNew, "Counter").await;

    for seq in 2..5u16 {
        runtime.on_frame(&session, client_packet("Inc", seq, stage_id, Bytes::new())).await;
        wait_for_reply(&sent, "IncRes", Duration::from_millis(200)).await;
        sent.lock().unwrap().clear();
    }
    runtime.on_frame(&session, client_packet("Get", 10, stage_id, Bytes::new())).await;
    let get_res = wait_for_reply(&sent, "GetRes", Duration::from_millis(200)).await;
    assert_eq!(get_res.payload().as_ref(), b"3");

    session.close(CloseReason::NetworkError).await;
    // Long enough for the close watcher's polling to notice, short enough
    // to stay inside the 400ms reconnect grace.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (session2, sent2, stage_id2) = connect(&runtime, &verifier, account_id, StageTarget::Existing(stage_id.get()), "Counter").await;
    assert_eq!(stage_id2, stage_id);

    runtime.on_frame(&session2, client_packet("Get", 1, stage_id2, Bytes::new())).await;
    let get_res = wait_for_reply(&sent2, "GetRes", Duration::from_millis(200)).await;
    assert_eq!(get_res.payload().as_ref(), b"3", "reconnect within the grace window must keep the same actor");
}

#[tokio::test]
async fn reconnect_after_grace_window_gets_a_fresh_actor() {
    let config = RuntimeConfig::builder()
        .with_reconnect_grace(Duration::from_millis(150))
        .build()
        .expect("valid config");
    let (runtime, verifier) = test_runtime(config);
    runtime.register_stage_type("Counter", || Box::new(CounterStage::default()) as Box<dyn UserStage>);

    let account_id = next_account();
    let (session, sent, stage_id) = connect(&runtime, &verifier, account_id, StageTarget::CreateNew, "Counter").await;

    runtime.on_frame(&session, client_packet("Inc", 2, stage_id, Bytes::new())).await;
    wait_for_reply(&sent, "IncRes", Duration::from_millis(200)).await;

    session.close(CloseReason::NetworkError).await;
    // Comfortably past close-detection plus the 150ms reconnect grace.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let (session2, sent2, stage_id2) = connect(&runtime, &verifier, account_id, StageTarget::Existing(stage_id.get()), "Counter").await;
    assert_eq!(stage_id2, stage_id);

    runtime.on_frame(&session2, client_packet("Get", 1, stage_id2, Bytes::new())).await;
    let get_res = wait_for_reply(&sent2, "GetRes", Duration::from_millis(200)).await;
    assert_eq!(get_res.payload().as_ref(), b"0", "an actor rebuilt after the grace window must start from scratch");
}

// ---------------------------------------------------------------------
// Per-actor dispatch stays FIFO across a suspending handler, even with two
// actors' traffic interleaved in the same stage's mailbox.
// ---------------------------------------------------------------------

struct SlowStage {
    log: Arc<StdMutex<Vec<(i64, u8)>>>,
}

#[async_trait]
impl UserStage for SlowStage {
    async fn on_dispatch(
        &mut self,
        _ctx: &StageContext,
        actor: &ActorContext,
        _reply: Option<&ReplyScope>,
        packet: &Packet,
        _registry: &ActorRegistry,
    ) -> HandlerResult<()> {
        if packet.msg_id() == "Slow" {
            let value = packet.payload().first().copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.log.lock().unwrap().push((actor.account_id().get(), value));
        }
        Ok(())
    }
}

#[tokio::test]
async fn per_actor_dispatch_stays_fifo_across_suspension() {
    let (runtime, verifier) = test_runtime(RuntimeConfig::default());
    let log = Arc::new(StdMutex::new(Vec::new()));
    runtime.register_stage_type("Slow", {
        let log = Arc::clone(&log);
        move || Box::new(SlowStage { log: Arc::clone(&log) }) as Box<dyn UserStage>
    });

    let account_a = next_account();
    let (session_a, _sent_a, stage_id) = connect(&runtime, &verifier, account_a, StageTarget::CreateNew, "Slow").await;
    let account_b = next_account();
    let (session_b, _sent_b, _) = connect(&runtime, &verifier, account_b, StageTarget::Existing(stage_id.get()), "Slow").await;

    for value in 1..=3u8 {
        runtime.on_frame(&session_a, client_packet("Slow", 0, stage_id, Bytes::from(vec![value]))).await;
        runtime.on_frame(&session_b, client_packet("Slow", 0, stage_id, Bytes::from(vec![value]))).await;
    }

    wait_until(Duration::from_secs(2), || log.lock().unwrap().len() == 6).await;

    let entries = log.lock().unwrap().clone();
    let a_order: Vec<u8> = entries.iter().filter(|(acc, _)| *acc == account_a.get()).map(|(_, v)| *v).collect();
    let b_order: Vec<u8> = entries.iter().filter(|(acc, _)| *acc == account_b.get()).map(|(_, v)| *v).collect();
    assert_eq!(a_order, vec![1, 2, 3], "actor A's own messages must stay in send order");
    assert_eq!(b_order, vec![1, 2, 3], "actor B's own messages must stay in send order");
}

// ---------------------------------------------------------------------
// Broadcast reaches every connected actor a filter admits, from inside a
// handler still holding the stage's serialization guarantee.
// ---------------------------------------------------------------------

struct BroadcastStage;

#[async_trait]
impl UserStage for BroadcastStage {
    async fn on_dispatch(
        &mut self,
        ctx: &StageContext,
        actor: &ActorContext,
        reply: Option<&ReplyScope>,
        packet: &Packet,
        registry: &ActorRegistry,
    ) -> HandlerResult<()> {
        if packet.msg_id() == "Trigger" {
            let announce = Packet::fire_and_forget("Announce", ctx.stage_id(), packet.payload().clone())
                .expect("well-formed announce packet");
            let triggering_account = actor.account_id();
            let reached = ctx.broadcast(registry, &announce, |id| id != triggering_account);
            if let Some(reply) = reply {
                reply.reply("TriggerAck", Bytes::from(reached.to_string().into_bytes()));
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn broadcast_reaches_every_connected_actor_except_the_sender() {
    let (runtime, verifier) = test_runtime(RuntimeConfig::default());
    runtime.register_stage_type("Broadcast", || Box::new(BroadcastStage) as Box<dyn UserStage>);

    let account_a = next_account();
    let (session_a, sent_a, stage_id) = connect(&runtime, &verifier, account_a, StageTarget::CreateNew, "Broadcast").await;
    let account_b = next_account();
    let (_session_b, sent_b, _) = connect(&runtime, &verifier, account_b, StageTarget::Existing(stage_id.get()), "Broadcast").await;

    runtime.on_frame(&session_a, client_packet("Trigger", 5, stage_id, Bytes::from_static(b"hello"))).await;

    let ack = wait_for_reply(&sent_a, "TriggerAck", Duration::from_millis(500)).await;
    assert_eq!(ack.payload().as_ref(), b"1", "exactly one other actor should have been reached");

    let announce = wait_for_reply(&sent_b, "Announce", Duration::from_millis(500)).await;
    assert_eq!(announce.payload().as_ref(), b"hello");
    assert!(
        sent_a.lock().unwrap().iter().all(|p| p.msg_id() != "Announce"),
        "the triggering actor filtered itself out and must not receive its own broadcast"
    );
}

// ---------------------------------------------------------------------
// A request deferred to an Async-Block keeps the actor's busy-flag held
// across the suspension: a second request from the same actor must not
// run ahead of it, and the client must see the real deferred reply rather
// than a premature default-success Ack (§4.6, §4.11).
// ---------------------------------------------------------------------

struct AsyncBlockStage {
    log: Arc<StdMutex<Vec<u8>>>,
}

#[async_trait]
impl UserStage for AsyncBlockStage {
    async fn on_dispatch(
        &mut self,
        ctx: &StageContext,
        actor: &ActorContext,
        reply: Option<&ReplyScope>,
        packet: &Packet,
        _registry: &ActorRegistry,
    ) -> HandlerResult<()> {
        if packet.msg_id() == "Defer" {
            let value = packet.payload().first().copied().unwrap_or(0);
            let log = Arc::clone(&self.log);
            let reply_for_call = reply.cloned();
            let reply_for_post = reply_for_call.clone();
            roomcore::asyncblock::run(
                ctx,
                actor,
                reply_for_call.as_ref(),
                move || {
                    std::thread::sleep(Duration::from_millis(40));
                    value
                },
                move |_ctx, _registry, value: u8| {
                    log.lock().unwrap().push(value);
                    if let Some(reply) = &reply_for_post {
                        reply.reply("DeferReply", Bytes::from(vec![value]));
                    }
                },
            );
        }
        Ok(())
    }
}

#[tokio::test]
async fn async_block_deferred_request_keeps_actor_busy_and_answers_once() {
    let (runtime, verifier) = test_runtime(RuntimeConfig::default());
    let log = Arc::new(StdMutex::new(Vec::new()));
    runtime.register_stage_type("AsyncBlock", {
        let log = Arc::clone(&log);
        move || Box::new(AsyncBlockStage { log: Arc::clone(&log) }) as Box<dyn UserStage>
    });

    let account = next_account();
    let (session, sent, stage_id) = connect(&runtime, &verifier, account, StageTarget::CreateNew, "AsyncBlock").await;

    runtime.on_frame(&session, client_packet("Defer", 1, stage_id, Bytes::from(vec![1u8]))).await;
    runtime.on_frame(&session, client_packet("Defer", 2, stage_id, Bytes::from(vec![2u8]))).await;

    wait_until(Duration::from_secs(2), || log.lock().unwrap().len() == 2).await;
    assert_eq!(*log.lock().unwrap(), vec![1, 2], "the second request must not run ahead of the first's deferred completion");

    let replies: Vec<Packet> = sent.lock().unwrap().iter().filter(|p| p.msg_seq() == 1 || p.msg_seq() == 2).cloned().collect();
    assert_eq!(replies.len(), 2, "exactly one reply per request — no premature default-success Ack");
    for reply in &replies {
        assert_eq!(reply.msg_id(), "DeferReply", "the real deferred reply must win, not the default Ack");
    }
    let r1 = replies.iter().find(|p| p.msg_seq() == 1).expect("reply to seq 1");
    let r2 = replies.iter().find(|p| p.msg_seq() == 2).expect("reply to seq 2");
    assert_eq!(r1.payload().as_ref(), &[1u8]);
    assert_eq!(r2.payload().as_ref(), &[2u8]);
}

// ---------------------------------------------------------------------
// A timer whose handler runs long coalesces the periods it misses into
// the next delivered tick instead of bursting through a backlog.
// ---------------------------------------------------------------------

struct TimerStage {
    missed_log: Arc<StdMutex<Vec<u32>>>,
}

#[async_trait]
impl UserStage for TimerStage {
    async fn on_create(&mut self, ctx: &StageContext, _init: Bytes) -> HandlerResult<()> {
        ctx.add_repeat(Duration::from_millis(10), Duration::from_millis(10));
        Ok(())
    }

    async fn on_timer(&mut self, _ctx: &StageContext, _timer_id: TimerId, missed_ticks: u32, _registry: &ActorRegistry) {
        // Slow enough that several nominal periods elapse while this one
        // tick is still being handled.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.missed_log.lock().unwrap().push(missed_ticks);
    }
}

#[tokio::test]
async fn slow_timer_handler_coalesces_missed_periods_instead_of_bursting() {
    let (runtime, _verifier) = test_runtime(RuntimeConfig::default());
    let missed_log = Arc::new(StdMutex::new(Vec::new()));
    runtime.register_stage_type("Timed", {
        let missed_log = Arc::clone(&missed_log);
        move || Box::new(TimerStage { missed_log: Arc::clone(&missed_log) }) as Box<dyn UserStage>
    });

    runtime.create_stage("Timed", Bytes::new()).await.expect("stage creation");

    wait_until(Duration::from_secs(2), || missed_log.lock().unwrap().len() >= 3).await;

    let delivered = missed_log.lock().unwrap().clone();
    assert!(
        delivered.iter().skip(1).any(|&missed| missed >= 1),
        "a tick delivered after the handler stalls should report the periods it coalesced, got {delivered:?}"
    );
}
