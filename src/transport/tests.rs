use super::holepunch::HolePunchState;
use super::*;
use crate::message::{Command, Message, MessageType};
use crate::peer::{PeerAddress, PeerId, PeerSocketAddress};
use crate::tracker::{BloomFilter, TrackerStorage};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

struct TestNode {
    endpoint: Endpoint,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<PendingRegistry>,
    cached: Arc<RconCache>,
    sender: Arc<Sender>,
    pool: Arc<ChannelPool>,
    status: Arc<StatusListeners>,
}

impl TestNode {
    fn local(&self) -> PeerAddress {
        self.endpoint.local().clone()
    }
}

fn test_config() -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_secs(2),
        idle_tcp: Duration::from_secs(2),
        idle_udp: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(200),
        ..TransportConfig::default()
    }
}

async fn spawn_node_with(id_hex: &str, pinger: Arc<dyn PingFactory>) -> TestNode {
    let config = test_config();
    let id = PeerId::from_hex(id_hex).unwrap();
    let registry = Arc::new(PendingRegistry::new());
    let cached = Arc::new(RconCache::new(config.rcon_cache_capacity));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&cached)));
    let endpoint = Endpoint::bind(PeerAddress::localhost(id, 0, 0), Arc::clone(&dispatcher))
        .await
        .unwrap();
    let status = Arc::new(StatusListeners::new());
    let sender = Arc::new(Sender::new(
        endpoint.local().clone(),
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&cached),
        Arc::clone(&status),
        pinger,
    ));
    let pool = Arc::new(ChannelPool::new(&config));
    TestNode {
        endpoint,
        dispatcher,
        registry,
        cached,
        sender,
        pool,
        status,
    }
}

async fn spawn_node(id_hex: &str) -> TestNode {
    spawn_node_with(id_hex, Arc::new(InstantPinger)).await
}

struct InstantPinger;

#[async_trait]
impl PingFactory for InstantPinger {
    async fn ping(&self, target: PeerSocketAddress) -> Result<PeerSocketAddress, TransportError> {
        Ok(target)
    }
}

/// Answers each relay after a per-target delay, so ping races in tests are
/// deterministic.
struct StaggeredPinger {
    delays: Vec<(PeerSocketAddress, Duration)>,
}

#[async_trait]
impl PingFactory for StaggeredPinger {
    async fn ping(&self, target: PeerSocketAddress) -> Result<PeerSocketAddress, TransportError> {
        let delay = self
            .delays
            .iter()
            .find(|(socket, _)| *socket == target)
            .map(|(_, delay)| *delay)
            .unwrap_or(Duration::from_millis(5));
        sleep(delay).await;
        Ok(target)
    }
}

struct FnHandler<F>(F);

impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(&Message) -> Option<Message> + Send + Sync,
{
    fn handle(&self, request: &Message) -> Option<Message> {
        (self.0)(request)
    }
}

fn handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(&Message) -> Option<Message> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

struct RecordingStatus {
    failed: Mutex<Vec<PeerId>>,
}

impl RecordingStatus {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            failed: Mutex::new(Vec::new()),
        })
    }

    fn failed_peers(&self) -> Vec<PeerId> {
        self.failed.lock().clone()
    }
}

impl PeerStatusListener for RecordingStatus {
    fn peer_failed(&self, peer: &PeerAddress, _reason: &TransportError) {
        self.failed.lock().push(peer.id);
    }
}

/// A TCP port with nothing listening on it.
async fn dead_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    drop(socket);
    port
}

const DATA_CMD: Command = Command::Other(77);

// ----------------------------------------------------------------------
// Strategy selection
// ----------------------------------------------------------------------

fn strategy_message(
    sender_relayed: bool,
    recipient_relayed: bool,
    command: Command,
    udp: bool,
) -> Message {
    let sender =
        PeerAddress::localhost(PeerId::from_hex("0x1").unwrap(), 1, 1).with_relayed(sender_relayed);
    let mut recipient =
        PeerAddress::localhost(PeerId::from_hex("0x2").unwrap(), 2, 2).with_relayed(recipient_relayed);
    if recipient_relayed {
        recipient = recipient.with_relays(vec![PeerSocketAddress::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            9,
            9,
        )]);
    }
    let mut msg = Message::request(command, sender, recipient);
    msg.udp = udp;
    msg
}

#[test]
fn test_strategy_direct_when_recipient_reachable() {
    let msg = strategy_message(false, false, DATA_CMD, false);
    assert_eq!(tcp_strategy(&msg).unwrap(), StrategyVerdict::Direct);
    assert_eq!(udp_strategy(&msg).unwrap(), StrategyVerdict::Direct);
}

#[test]
fn test_strategy_rcon_tcp_relay_udp() {
    let msg = strategy_message(false, true, DATA_CMD, false);
    assert_eq!(tcp_strategy(&msg).unwrap(), StrategyVerdict::Rcon);
    // Reverse connections are impossible over UDP; a relay is used instead.
    assert_eq!(udp_strategy(&msg).unwrap(), StrategyVerdict::Relay);
}

#[test]
fn test_strategy_hole_punch_for_relayed_direct_data() {
    let msg = strategy_message(true, true, Command::DirectData, true);
    assert_eq!(udp_strategy(&msg).unwrap(), StrategyVerdict::HolePunch);
    // Anything but DIRECT_DATA goes through the relay.
    let msg = strategy_message(true, true, Command::Neighbor, true);
    assert_eq!(udp_strategy(&msg).unwrap(), StrategyVerdict::Relay);
    // And over TCP both-relayed is always a relay send.
    let msg = strategy_message(true, true, Command::DirectData, false);
    assert_eq!(tcp_strategy(&msg).unwrap(), StrategyVerdict::Relay);
}

#[test]
fn test_strategy_rejects_relayed_recipient_without_relays() {
    let mut msg = strategy_message(false, true, DATA_CMD, false);
    msg.recipient = msg.recipient.with_relays(Vec::new());
    assert!(matches!(
        tcp_strategy(&msg),
        Err(TransportError::RelayUnavailable)
    ));
    assert!(matches!(
        udp_strategy(&msg),
        Err(TransportError::RelayUnavailable)
    ));
}

#[test]
fn test_select_strategy_follows_udp_flag() {
    let msg = strategy_message(false, true, DATA_CMD, false);
    assert_eq!(select_strategy(&msg).unwrap(), StrategyVerdict::Rcon);
    let msg = strategy_message(false, true, DATA_CMD, true);
    assert_eq!(select_strategy(&msg).unwrap(), StrategyVerdict::Relay);
    let msg = strategy_message(true, true, Command::DirectData, true);
    assert_eq!(select_strategy(&msg).unwrap(), StrategyVerdict::HolePunch);
}

#[test]
fn test_strategy_idempotent() {
    let msg = strategy_message(true, true, Command::DirectData, true);
    assert_eq!(udp_strategy(&msg).unwrap(), udp_strategy(&msg).unwrap());
    let msg = strategy_message(false, true, DATA_CMD, false);
    assert_eq!(tcp_strategy(&msg).unwrap(), tcp_strategy(&msg).unwrap());
}

// ----------------------------------------------------------------------
// Completion semantics
// ----------------------------------------------------------------------

fn dummy_request() -> Message {
    Message::request(
        DATA_CMD,
        PeerAddress::localhost(PeerId::random(), 1, 1),
        PeerAddress::localhost(PeerId::random(), 2, 2),
    )
}

#[test]
fn test_completion_single_transition() {
    let completion = ResponseCompletion::new(dummy_request());
    let transitions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&transitions);
    completion.on_complete(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    completion.succeed(None);
    completion.fail(TransportError::IdleTimeout);
    completion.cancel();

    assert_eq!(transitions.load(Ordering::SeqCst), 1);
    assert!(matches!(completion.outcome_now(), Some(Outcome::Ok(None))));
}

#[test]
fn test_completion_listener_after_terminal_runs_immediately() {
    let completion = ResponseCompletion::new(dummy_request());
    completion.fail(TransportError::Denied);
    let ran = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&ran);
    completion.on_complete(move |outcome| {
        assert!(matches!(outcome, Outcome::Failed(TransportError::Denied)));
        seen.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_completion_cancel_runs_hooks_once() {
    let completion = ResponseCompletion::new(dummy_request());
    let hooks = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hooks);
    completion.add_cancel_hook(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    completion.cancel();
    completion.cancel();

    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert!(matches!(completion.outcome_now(), Some(Outcome::Cancelled)));
}

#[test]
fn test_completion_cancel_after_terminal_is_noop() {
    let completion = ResponseCompletion::new(dummy_request());
    let hooks = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hooks);
    completion.add_cancel_hook(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    completion.succeed(None);
    completion.cancel();

    // Hooks are dropped, not run, once the outcome is decided.
    assert_eq!(hooks.load(Ordering::SeqCst), 0);
    assert!(matches!(completion.outcome_now(), Some(Outcome::Ok(None))));
}

#[tokio::test]
async fn test_completion_outcome_await() {
    let completion = ResponseCompletion::new(dummy_request());
    let waiter = completion.clone();
    let task = tokio::spawn(async move { waiter.outcome().await });
    sleep(Duration::from_millis(20)).await;
    completion.succeed(None);
    let outcome = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert!(outcome.is_ok());
}

// ----------------------------------------------------------------------
// Registry and cache
// ----------------------------------------------------------------------

#[test]
fn test_registry_rejects_duplicate_id() {
    let registry = PendingRegistry::new();
    let completion = ResponseCompletion::new(dummy_request());
    registry.register(&completion).unwrap();
    let twin = ResponseCompletion::new(completion.request());
    assert!(registry.register(&twin).is_err());
}

#[test]
fn test_registry_entry_removed_before_listeners() {
    let registry = Arc::new(PendingRegistry::new());
    let completion = ResponseCompletion::new(dummy_request());
    registry.register(&completion).unwrap();

    let observed = Arc::new(AtomicUsize::new(usize::MAX));
    let seen = Arc::clone(&observed);
    let registry_view = Arc::clone(&registry);
    completion.on_complete(move |_| {
        seen.store(registry_view.len(), Ordering::SeqCst);
    });

    let reply = completion.request().reply(MessageType::Ok);
    assert!(registry.complete(reply));
    assert_eq!(observed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_registry_cancellation_evicts_entry() {
    let registry = PendingRegistry::new();
    let completion = ResponseCompletion::new(dummy_request());
    registry.register(&completion).unwrap();
    completion.cancel();
    assert!(registry.is_empty());
}

#[test]
fn test_registry_shutdown_fails_pending() {
    let registry = PendingRegistry::new();
    let completions: Vec<_> = (0..3)
        .map(|_| ResponseCompletion::new(dummy_request()))
        .collect();
    for completion in &completions {
        registry.register(completion).unwrap();
    }
    registry.shutdown();
    assert!(registry.is_empty());
    for completion in &completions {
        assert!(matches!(
            completion.outcome_now(),
            Some(Outcome::Failed(TransportError::Shutdown))
        ));
    }
}

#[test]
fn test_rcon_cache_lru_eviction_cancels() {
    let cache = RconCache::new(2);
    let first = ResponseCompletion::new(dummy_request());
    let second = ResponseCompletion::new(dummy_request());
    let third = ResponseCompletion::new(dummy_request());
    cache.insert(first.clone());
    cache.insert(second.clone());
    cache.insert(third.clone());

    assert_eq!(cache.len(), 2);
    assert!(!cache.contains(first.message_id()));
    assert!(matches!(first.outcome_now(), Some(Outcome::Cancelled)));
    assert!(second.outcome_now().is_none());
    assert!(third.outcome_now().is_none());
}

#[test]
fn test_rcon_cache_take() {
    let cache = RconCache::new(16);
    let completion = ResponseCompletion::new(dummy_request());
    cache.insert(completion.clone());
    let taken = cache.take(completion.message_id()).unwrap();
    assert_eq!(taken.message_id(), completion.message_id());
    assert!(cache.is_empty());
    assert!(cache.take(completion.message_id()).is_none());
}

// ----------------------------------------------------------------------
// Watchdog
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_watchdog_fires_after_idle() {
    let watchdog = Watchdog::new(Duration::from_millis(80));
    timeout(Duration::from_secs(1), watchdog.expired())
        .await
        .expect("watchdog should fire");
}

#[tokio::test]
async fn test_watchdog_touch_defers_expiry() {
    let watchdog = Watchdog::new(Duration::from_millis(120));
    let ticker = watchdog.clone();
    let toucher = tokio::spawn(async move {
        for _ in 0..4 {
            sleep(Duration::from_millis(60)).await;
            ticker.touch();
        }
    });
    // Four touches at 60 ms keep a 120 ms budget alive well past 240 ms.
    assert!(
        timeout(Duration::from_millis(200), watchdog.expired())
            .await
            .is_err(),
        "watchdog fired despite activity"
    );
    toucher.await.unwrap();
}

// ----------------------------------------------------------------------
// Hole-punch reply validation
// ----------------------------------------------------------------------

#[test]
fn test_hole_punch_state_extracts_pairs() {
    let state = HolePunchState::new(Command::DirectData);
    let mut reply = dummy_request();
    reply.command = Command::Holep;
    reply.kind = MessageType::Ok;
    reply.ints = vec![4000, 5000, 4001, 5001];
    assert_eq!(
        state.evaluate(&reply).unwrap(),
        vec![(4000, 5000), (4001, 5001)]
    );
}

#[test]
fn test_hole_punch_state_rejects_bad_replies() {
    let state = HolePunchState::new(Command::DirectData);

    let mut odd = dummy_request();
    odd.command = Command::Holep;
    odd.kind = MessageType::Ok;
    odd.ints = vec![1, 2, 3];
    assert!(matches!(
        state.evaluate(&odd),
        Err(TransportError::HolePunchMalformed("odd port list"))
    ));

    let mut empty = odd.clone();
    empty.ints.clear();
    assert!(matches!(
        state.evaluate(&empty),
        Err(TransportError::HolePunchMalformed("missing port list"))
    ));

    let mut wrong = odd.clone();
    wrong.command = Command::Ping;
    wrong.ints = vec![1, 2];
    assert!(matches!(
        state.evaluate(&wrong),
        Err(TransportError::HolePunchMalformed("unexpected reply"))
    ));
}

// ----------------------------------------------------------------------
// End-to-end: direct delivery
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_direct_tcp_round_trip() {
    let a = spawn_node("0x50").await;
    let b = spawn_node("0x20").await;

    b.dispatcher.register_handler(
        DATA_CMD,
        handler(|req| {
            let mut reply = req.reply(MessageType::Ok);
            reply
                .data_map
                .insert(req.sender.id, Bytes::from_static(b"pong"));
            Some(reply)
        }),
    );

    let request = Message::request(DATA_CMD, a.local(), b.local());
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    let reply = outcome.reply().expect("expected a reply");
    assert_eq!(reply.kind, MessageType::Ok);
    assert_eq!(
        reply.data_map.get(&a.local().id),
        Some(&Bytes::from_static(b"pong"))
    );
    assert!(a.registry.is_empty());
}

#[tokio::test]
async fn test_direct_udp_round_trip() {
    let a = spawn_node("0x51").await;
    let b = spawn_node("0x21").await;

    b.dispatcher.register_handler(
        DATA_CMD,
        handler(|req| Some(req.reply(MessageType::Ok))),
    );

    let request = Message::request(DATA_CMD, a.local(), b.local());
    let completion = ResponseCompletion::new(request);
    a.sender
        .send_udp(&completion, &a.pool, Duration::from_secs(2), false);

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert_eq!(outcome.reply().unwrap().kind, MessageType::Ok);
    assert!(a.registry.is_empty());
}

#[tokio::test]
async fn test_fire_and_forget_completes_after_write() {
    let a = spawn_node("0x52").await;
    let b = spawn_node("0x22").await;

    let received = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&received);
    b.dispatcher.register_handler(
        DATA_CMD,
        handler(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            None
        }),
    );

    let request = Message::request(DATA_CMD, a.local(), b.local());
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        true,
    );

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Ok(None)));
    // No watchdog, no registry entry for a fire-and-forget send.
    assert!(a.registry.is_empty());

    timeout(Duration::from_secs(2), async {
        while received.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recipient never saw the message");
}

#[tokio::test]
async fn test_idle_timeout_on_mute_server() {
    let a = spawn_node("0x53").await;
    let b = spawn_node("0x23").await;
    // No handler registered on b: requests are swallowed silently.

    let listener = RecordingStatus::new();
    a.status.register(listener.clone());

    let request = Message::request(DATA_CMD, a.local(), b.local());
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_millis(300),
        Duration::from_secs(2),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(TransportError::IdleTimeout)));
    assert!(a.registry.is_empty());
    assert_eq!(listener.failed_peers(), vec![b.local().id]);
}

#[tokio::test]
async fn test_connect_refused_reports_peer_failure() {
    let a = spawn_node("0x54").await;
    let listener = RecordingStatus::new();
    a.status.register(listener.clone());

    let dead = PeerAddress::localhost(PeerId::from_hex("0x24").unwrap(), dead_tcp_port().await, 1);
    let request = Message::request(DATA_CMD, a.local(), dead.clone());
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_millis(500),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(TransportError::Connect(_))));
    assert_eq!(listener.failed_peers(), vec![dead.id]);
}

#[tokio::test]
async fn test_cancel_in_flight_send() {
    let a = spawn_node("0x55").await;
    let b = spawn_node("0x25").await;

    let request = Message::request(DATA_CMD, a.local(), b.local());
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(30),
        Duration::from_secs(2),
        None,
        false,
    );

    sleep(Duration::from_millis(100)).await;
    completion.cancel();

    assert!(matches!(completion.outcome_now(), Some(Outcome::Cancelled)));
    assert!(a.registry.is_empty());
}

#[tokio::test]
async fn test_shutdown_fails_in_flight_sends() {
    let a = spawn_node("0x56").await;
    let b = spawn_node("0x26").await;

    let request = Message::request(DATA_CMD, a.local(), b.local());
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(30),
        Duration::from_secs(2),
        None,
        false,
    );
    sleep(Duration::from_millis(100)).await;

    a.sender.shutdown(&a.pool);

    let outcome = timeout(Duration::from_secs(2), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(TransportError::Shutdown)));

    // The pool refuses new channels from now on.
    let late = ResponseCompletion::new(Message::request(DATA_CMD, a.local(), b.local()));
    a.sender.send_tcp(
        &late,
        &a.pool,
        Duration::from_secs(1),
        Duration::from_secs(1),
        None,
        false,
    );
    let outcome = timeout(Duration::from_secs(2), late.outcome()).await.unwrap();
    assert!(matches!(outcome, Outcome::Failed(TransportError::Shutdown)));
}

#[tokio::test]
async fn test_peer_connection_reuse() {
    let a = spawn_node("0x57").await;
    let b = spawn_node("0x27").await;

    b.dispatcher.register_handler(
        DATA_CMD,
        handler(|req| Some(req.reply(MessageType::Ok))),
    );

    let pc = PeerConnection::open(
        a.local(),
        b.local(),
        &a.pool,
        Arc::clone(&a.dispatcher),
        a.sender.config(),
    )
    .await
    .unwrap();

    for _ in 0..2 {
        let mut request = Message::request(DATA_CMD, a.local(), b.local());
        request.keep_alive = true;
        let completion = ResponseCompletion::new(request);
        a.sender.send_tcp(
            &completion,
            &a.pool,
            Duration::from_secs(2),
            Duration::from_secs(2),
            Some(Arc::clone(&pc)),
            false,
        );
        let outcome = timeout(Duration::from_secs(5), completion.outcome())
            .await
            .unwrap();
        assert_eq!(outcome.reply().unwrap().kind, MessageType::Ok);
    }
    assert!(pc.is_alive());
    pc.close();
}

// ----------------------------------------------------------------------
// End-to-end: relay fallback
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_relay_fallback_drops_dead_relays() {
    // Two dead relays that answer pings fastest, then a live one.
    let dead1 = PeerSocketAddress::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        dead_tcp_port().await,
        free_udp_port().await,
    );
    let dead2 = PeerSocketAddress::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        dead_tcp_port().await,
        free_udp_port().await,
    );

    let live = spawn_node("0x99").await;
    live.dispatcher.register_handler(
        DATA_CMD,
        handler(|req| Some(req.reply(MessageType::Ok))),
    );
    let live_socket = live.local().socket();

    let pinger = Arc::new(StaggeredPinger {
        delays: vec![
            (dead1, Duration::from_millis(0)),
            (dead2, Duration::from_millis(30)),
            (live_socket, Duration::from_millis(60)),
        ],
    });
    let a = spawn_node_with("0x58", pinger).await;

    let recipient = PeerAddress::localhost(PeerId::from_hex("0x28").unwrap(), 0, 0)
        .with_relayed(true)
        .with_relays(vec![dead1, dead2, live_socket]);
    let request = Message::request(DATA_CMD, a.local().with_relayed(true), recipient);
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_millis(500),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(10), completion.outcome())
        .await
        .unwrap();
    assert_eq!(outcome.reply().unwrap().kind, MessageType::Ok);
    // Only the relay that carried the message survives in the descriptor.
    assert_eq!(completion.request().recipient.relays, vec![live_socket]);
}

#[tokio::test]
async fn test_relay_denied_is_terminal() {
    let relay = spawn_node("0x9a").await;
    relay.dispatcher.register_handler(
        DATA_CMD,
        handler(|req| Some(req.reply(MessageType::Denied))),
    );
    let relay_socket = relay.local().socket();

    let a = spawn_node("0x59").await;
    let recipient = PeerAddress::localhost(PeerId::from_hex("0x29").unwrap(), 0, 0)
        .with_relayed(true)
        .with_relays(vec![relay_socket]);
    let request = Message::request(DATA_CMD, a.local().with_relayed(true), recipient);
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(TransportError::Denied)));
    // The denied relay is not removed; DENIED is not a connectivity fault.
    assert_eq!(completion.request().recipient.relays, vec![relay_socket]);
}

#[tokio::test]
async fn test_relay_send_without_relays_fails() {
    let a = spawn_node("0x5a").await;
    let recipient =
        PeerAddress::localhost(PeerId::from_hex("0x2a").unwrap(), 0, 0).with_relayed(true);
    let request = Message::request(DATA_CMD, a.local().with_relayed(true), recipient);
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(1),
        Duration::from_secs(1),
        None,
        false,
    );
    let outcome = timeout(Duration::from_secs(2), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failed(TransportError::RelayUnavailable)
    ));
}

// ----------------------------------------------------------------------
// End-to-end: reverse connection
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_reverse_connection_round_trip() {
    let a = spawn_node("0x5b").await;
    let relay = spawn_node("0x9b").await;

    // The "relay" acknowledges the setup request and makes the unreachable
    // peer dial the requester back; the test plays that peer itself.
    let recipient_id = PeerId::from_hex("0x2b").unwrap();
    relay.dispatcher.register_handler(
        Command::Rcon,
        handler(move |req| {
            assert_eq!(req.kind, MessageType::Request1);
            assert!(req.keep_alive);
            let original_id = req.ints[0];
            let dial_back = req.sender.tcp_socket();
            let unreachable =
                PeerAddress::localhost(recipient_id, 0, 0).with_relayed(true);
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                let mut stream = TcpStream::connect(dial_back).await.unwrap();

                // Announce ourselves with the original message id.
                let mut hello = Message::request(
                    Command::Rcon,
                    unreachable.clone(),
                    PeerAddress::localhost(PeerId::random(), 0, 0),
                );
                hello.message_id = original_id;
                hello.kind = MessageType::Request3;
                hello.keep_alive = true;
                stream
                    .write_all(&crate::message::codec::encode_framed(&hello, None).unwrap())
                    .await
                    .unwrap();

                // The cached original arrives over this channel; answer it.
                let mut decoder = crate::message::StreamDecoder::new();
                let mut buf = vec![0u8; 8192];
                loop {
                    let n = stream.read(&mut buf).await.unwrap();
                    assert!(n > 0, "requester closed before sending the original");
                    decoder.extend(&buf[..n]);
                    if let Some(original) = decoder.next_frame().unwrap() {
                        assert_eq!(original.message_id, original_id);
                        assert_eq!(original.command, DATA_CMD);
                        let reply = original.reply(MessageType::Ok);
                        stream
                            .write_all(
                                &crate::message::codec::encode_framed(&reply, None).unwrap(),
                            )
                            .await
                            .unwrap();
                        break;
                    }
                }
                // Hold the channel open until the requester is done.
                sleep(Duration::from_millis(500)).await;
            });
            Some(req.reply(MessageType::Ok))
        }),
    );

    let recipient = PeerAddress::localhost(recipient_id, 0, 0)
        .with_relayed(true)
        .with_firewalled_tcp(true)
        .with_relays(vec![relay.local().socket()]);
    let request = Message::request(DATA_CMD, a.local(), recipient);
    let original_id = request.message_id;
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(3),
        Duration::from_secs(2),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(10), completion.outcome())
        .await
        .unwrap();
    let reply = outcome.reply().expect("reverse connection should succeed");
    assert_eq!(reply.message_id, original_id);
    assert_eq!(reply.kind, MessageType::Ok);
    assert!(a.cached.is_empty());
    assert!(a.registry.is_empty());
}

#[tokio::test]
async fn test_reverse_connection_denied_is_fatal() {
    let a = spawn_node("0x5c").await;
    let relay = spawn_node("0x9c").await;
    relay.dispatcher.register_handler(
        Command::Rcon,
        handler(|req| Some(req.reply(MessageType::Denied))),
    );

    let recipient = PeerAddress::localhost(PeerId::from_hex("0x2c").unwrap(), 0, 0)
        .with_relayed(true)
        .with_relays(vec![relay.local().socket()]);
    let request = Message::request(DATA_CMD, a.local(), recipient);
    let completion = ResponseCompletion::new(request);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        false,
    );

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(TransportError::Denied)));
    assert!(a.cached.is_empty());
}

// ----------------------------------------------------------------------
// End-to-end: hole punching
// ----------------------------------------------------------------------

fn relayed_pair(a: &TestNode, relay_socket: PeerSocketAddress, recipient_hex: &str) -> Message {
    let sender = a.local().with_relayed(true);
    let recipient = PeerAddress::localhost(PeerId::from_hex(recipient_hex).unwrap(), 0, 0)
        .with_relayed(true)
        .with_firewalled_udp(true)
        .with_relays(vec![relay_socket]);
    let mut msg = Message::request(Command::DirectData, sender, recipient);
    msg.udp = true;
    msg.buffers.push(Bytes::from_static(b"punched payload"));
    msg
}

#[tokio::test]
async fn test_hole_punch_round_trip() {
    let relay = spawn_node("0x9d").await;

    // The far peer: a bare UDP socket that answers the duplicate.
    let far = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let far_port = far.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        let (n, src) = far.recv_from(&mut buf).await.unwrap();
        let msg = crate::message::codec::decode(&buf[..n]).unwrap();
        assert_eq!(msg.command, Command::DirectData);
        assert_eq!(msg.buffers[0], Bytes::from_static(b"punched payload"));
        let reply = msg.reply(MessageType::Ok);
        let frame = crate::message::codec::encode(&reply, None).unwrap();
        far.send_to(&frame, src).await.unwrap();
    });

    let punched_local = free_udp_port().await;
    relay.dispatcher.register_handler(
        Command::Holep,
        handler(move |req| {
            assert!(req.udp);
            assert_eq!(req.ints.len(), 3);
            let mut reply = req.reply(MessageType::Ok);
            reply.ints = vec![punched_local as u32, far_port as u32];
            Some(reply)
        }),
    );

    let a = spawn_node("0x5d").await;
    let request = relayed_pair(&a, relay.local().socket(), "0x2d");
    let completion = ResponseCompletion::new(request);
    a.sender
        .send_udp(&completion, &a.pool, Duration::from_secs(2), false);

    let outcome = timeout(Duration::from_secs(10), completion.outcome())
        .await
        .unwrap();
    let reply = outcome.reply().expect("hole punch should succeed");
    assert_eq!(reply.command, Command::DirectData);
    assert_eq!(reply.kind, MessageType::Ok);
}

#[tokio::test]
async fn test_hole_punch_odd_port_list_fails() {
    let relay = spawn_node("0x9e").await;

    // Nothing must be sent at the advertised ports; a listener there would
    // prove a duplicate leaked out despite the malformed reply.
    let trap = UdpSocket::bind("127.0.0.1:5000").await.ok();

    relay.dispatcher.register_handler(
        Command::Holep,
        handler(|req| {
            let mut reply = req.reply(MessageType::Ok);
            reply.ints = vec![4000, 5000, 6000];
            Some(reply)
        }),
    );

    let a = spawn_node("0x5e").await;
    let request = relayed_pair(&a, relay.local().socket(), "0x2e");
    let completion = ResponseCompletion::new(request);
    a.sender
        .send_udp(&completion, &a.pool, Duration::from_secs(2), false);

    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failed(TransportError::HolePunchMalformed("odd port list"))
    ));
    assert!(a.registry.is_empty());

    if let Some(trap) = trap {
        let mut buf = [0u8; 1500];
        let received = timeout(Duration::from_millis(300), trap.recv_from(&mut buf)).await;
        assert!(received.is_err(), "a duplicate was sent despite the odd port list");
    }
}

// ----------------------------------------------------------------------
// End-to-end: tracker scenarios over the transport
// ----------------------------------------------------------------------

const TRACKER_ADD: Command = Command::Other(20);
const TRACKER_GET: Command = Command::Other(21);

fn install_tracker_handlers(node: &TestNode, storage: Arc<TrackerStorage>) {
    let add_storage = Arc::clone(&storage);
    node.dispatcher.register_handler(
        TRACKER_ADD,
        handler(move |req| {
            let location = PeerId::from_bytes(&req.buffers[0])?;
            let domain = PeerId::from_bytes(&req.buffers[1])?;
            let data = req.data_map.get(&req.sender.id).cloned().unwrap_or_default();
            add_storage.put(location, domain, req.sender.clone(), data);
            Some(req.reply(MessageType::Ok))
        }),
    );
    node.dispatcher.register_handler(
        TRACKER_GET,
        handler(move |req| {
            let location = PeerId::from_bytes(&req.buffers[0])?;
            let domain = PeerId::from_bytes(&req.buffers[1])?;
            let exclude = BloomFilter::from_bytes(&req.buffers[2])?;
            let mut reply = req.reply(MessageType::Ok);
            for entry in storage.get(location, domain, Some(&exclude)) {
                reply.data_map.insert(entry.peer.id, entry.data);
            }
            Some(reply)
        }),
    );
}

#[tokio::test]
async fn test_tracker_add_then_get_over_tcp() {
    let a = spawn_node("0x50").await;
    let b = spawn_node("0x20").await;
    let storage = Arc::new(TrackerStorage::new(Duration::from_secs(60)));
    install_tracker_handlers(&b, Arc::clone(&storage));

    let location = PeerId::random();
    let domain = PeerId::random();

    let mut add = Message::request(TRACKER_ADD, a.local(), b.local());
    add.buffers = vec![
        Bytes::copy_from_slice(location.as_bytes()),
        Bytes::copy_from_slice(domain.as_bytes()),
    ];
    add.data_map
        .insert(a.local().id, Bytes::from_static(b"data"));
    let completion = ResponseCompletion::new(add);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        false,
    );
    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    assert_eq!(outcome.reply().unwrap().kind, MessageType::Ok);
    assert!(storage.contains(location, domain, &a.local().id));

    // Read back with an empty exclusion filter: our own announcement
    // returns, carrying the stored peer.
    let empty_filter = BloomFilter::new(4096, 1000);
    let mut get = Message::request(TRACKER_GET, a.local(), b.local());
    get.buffers = vec![
        Bytes::copy_from_slice(location.as_bytes()),
        Bytes::copy_from_slice(domain.as_bytes()),
        empty_filter.to_bytes(),
    ];
    let completion = ResponseCompletion::new(get);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        false,
    );
    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    let reply = outcome.reply().unwrap();
    assert_eq!(reply.kind, MessageType::Ok);
    assert_eq!(
        reply.data_map.get(&a.local().id),
        Some(&Bytes::from_static(b"data"))
    );
}

#[tokio::test]
async fn test_tracker_get_excludes_known_peers() {
    let a = spawn_node("0x50").await;
    let b = spawn_node("0x20").await;
    let storage = Arc::new(TrackerStorage::new(Duration::from_secs(60)));
    install_tracker_handlers(&b, Arc::clone(&storage));

    let location = PeerId::random();
    let domain = PeerId::random();
    storage.put(location, domain, a.local(), Bytes::from_static(b"data"));

    // Excluding ourselves leaves nothing to report.
    let mut filter = BloomFilter::new(4096, 1000);
    filter.insert(&a.local().id);
    let mut get = Message::request(TRACKER_GET, a.local(), b.local());
    get.buffers = vec![
        Bytes::copy_from_slice(location.as_bytes()),
        Bytes::copy_from_slice(domain.as_bytes()),
        filter.to_bytes(),
    ];
    let completion = ResponseCompletion::new(get);
    a.sender.send_tcp(
        &completion,
        &a.pool,
        Duration::from_secs(2),
        Duration::from_secs(2),
        None,
        false,
    );
    let outcome = timeout(Duration::from_secs(5), completion.outcome())
        .await
        .unwrap();
    let reply = outcome.reply().unwrap();
    assert_eq!(reply.kind, MessageType::Ok);
    assert!(reply.data_map.is_empty());
}

// ----------------------------------------------------------------------
// Ping factory
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_udp_pinger_round_trip() {
    let b = spawn_node("0x2f").await;
    let pinger = UdpPinger::new(
        PeerAddress::localhost(PeerId::from_hex("0x5f").unwrap(), 0, 0),
        Duration::from_secs(2),
    );
    let answered = timeout(Duration::from_secs(5), pinger.ping(b.local().socket()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answered, b.local().socket());
}
