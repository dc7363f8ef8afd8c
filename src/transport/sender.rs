use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::channel::ChannelPool;
use super::completion::{Outcome, ResponseCompletion};
use super::config::TransportConfig;
use super::connection::PeerConnection;
use super::error::TransportError;
use super::holepunch::{punch_duplicate, HolePunchState};
use super::registry::{PendingRegistry, RconCache};
use super::status::StatusListeners;
use super::strategy::{self, StrategyVerdict};
use super::watchdog::Watchdog;
use crate::message::{codec, Command, Message, MessageType, SignatureFactory, StreamDecoder};
use crate::peer::{PeerAddress, PeerSocketAddress};

/// Issues standalone pings, used to probe a recipient's relays.
///
/// Injected by construction so the sender does not depend on the node
/// aggregate that owns routing and RPC wiring.
#[async_trait]
pub trait PingFactory: Send + Sync {
    /// Probes `target`; resolves with the socket that answered.
    async fn ping(&self, target: PeerSocketAddress) -> Result<PeerSocketAddress, TransportError>;
}

/// The outbound half of the transport: strategy selection and delivery.
///
/// `send_tcp` / `send_udp` spawn the orchestration for one request and
/// return immediately; the caller observes the result through the
/// completion. Cancellation propagates from the completion into the spawned
/// task, the channel and the registry entry.
pub struct Sender {
    local: PeerAddress,
    config: TransportConfig,
    registry: Arc<PendingRegistry>,
    cached_requests: Arc<RconCache>,
    status: Arc<StatusListeners>,
    ping_factory: Arc<dyn PingFactory>,
    signer: Option<Arc<dyn SignatureFactory>>,
    rng: Mutex<StdRng>,
}

impl Sender {
    pub fn new(
        local: PeerAddress,
        config: TransportConfig,
        registry: Arc<PendingRegistry>,
        cached_requests: Arc<RconCache>,
        status: Arc<StatusListeners>,
        ping_factory: Arc<dyn PingFactory>,
    ) -> Self {
        // Seeded from the local id: relay choice is random but reproducible
        // for a given node.
        let rng = StdRng::seed_from_u64(local.id.seed());
        Self {
            local,
            config,
            registry,
            cached_requests,
            status,
            ping_factory,
            signer: None,
            rng: Mutex::new(rng),
        }
    }

    pub fn signature_factory(mut self, signer: Arc<dyn SignatureFactory>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Requests waiting for a reverse connection, keyed by message id.
    pub fn cached_requests(&self) -> &Arc<RconCache> {
        &self.cached_requests
    }

    pub fn status_listeners(&self) -> &Arc<StatusListeners> {
        &self.status
    }

    /// Sends a message via TCP.
    ///
    /// Picks direct, reverse-connection or relay delivery from the
    /// recipient's descriptor. With `fire_and_forget` the completion
    /// resolves `Ok(None)` right after the write and no watchdog is armed.
    /// An existing live `peer_connection` is reused instead of opening a
    /// channel.
    pub fn send_tcp(
        self: &Arc<Self>,
        completion: &ResponseCompletion,
        pool: &Arc<ChannelPool>,
        idle: Duration,
        connect_timeout: Duration,
        peer_connection: Option<Arc<PeerConnection>>,
        fire_and_forget: bool,
    ) {
        if completion.is_complete() {
            return;
        }
        self.install_failure_reporter(completion);
        let verdict = match strategy::tcp_strategy(&completion.request()) {
            Ok(verdict) => verdict,
            Err(e) => {
                completion.fail(e);
                return;
            }
        };
        let this = Arc::clone(self);
        let pool = Arc::clone(pool);
        let task_completion = completion.clone();
        let handle = tokio::spawn(async move {
            match verdict {
                StrategyVerdict::Direct => {
                    this.direct_tcp(
                        &task_completion,
                        &pool,
                        idle,
                        connect_timeout,
                        peer_connection,
                        fire_and_forget,
                    )
                    .await
                }
                StrategyVerdict::Rcon => {
                    this.reverse_connect(
                        &task_completion,
                        &pool,
                        idle,
                        connect_timeout,
                        peer_connection,
                    )
                    .await
                }
                StrategyVerdict::Relay => {
                    this.relay_send(
                        &task_completion,
                        &pool,
                        idle,
                        connect_timeout,
                        fire_and_forget,
                        false,
                    )
                    .await
                }
                StrategyVerdict::HolePunch => {
                    task_completion.fail(TransportError::InvalidStrategy(
                        "hole punching applies to UDP only",
                    ));
                }
            }
        });
        completion.add_cancel_hook(move || handle.abort());
    }

    /// Sends a message via UDP.
    ///
    /// Picks direct, relay or hole-punch delivery; a reverse connection is
    /// never legal over UDP.
    pub fn send_udp(
        self: &Arc<Self>,
        completion: &ResponseCompletion,
        pool: &Arc<ChannelPool>,
        idle: Duration,
        fire_and_forget: bool,
    ) {
        if completion.is_complete() {
            return;
        }
        self.install_failure_reporter(completion);
        completion.update_request(|m| m.udp = true);
        let verdict = match strategy::udp_strategy(&completion.request()) {
            Ok(verdict) => verdict,
            Err(e) => {
                completion.fail(e);
                return;
            }
        };
        let this = Arc::clone(self);
        let pool = Arc::clone(pool);
        let task_completion = completion.clone();
        let handle = tokio::spawn(async move {
            match verdict {
                StrategyVerdict::Direct => {
                    this.direct_udp(&task_completion, &pool, idle, fire_and_forget, None)
                        .await
                }
                StrategyVerdict::Relay => {
                    let connect_timeout = this.config.connect_timeout;
                    this.relay_send(&task_completion, &pool, idle, connect_timeout, fire_and_forget, true)
                        .await
                }
                StrategyVerdict::HolePunch => {
                    this.hole_punch(&task_completion, &pool, idle).await
                }
                StrategyVerdict::Rcon => {
                    task_completion.fail(TransportError::InvalidStrategy(
                        "UDP messages cannot use a reverse connection",
                    ));
                }
            }
        });
        completion.add_cancel_hook(move || handle.abort());
    }

    /// Fails every in-flight and cached request and refuses new channels.
    pub fn shutdown(&self, pool: &ChannelPool) {
        pool.close();
        for completion in self.cached_requests.drain() {
            completion.fail(TransportError::Shutdown);
        }
        self.registry.shutdown();
    }

    // ------------------------------------------------------------------
    // Direct delivery
    // ------------------------------------------------------------------

    async fn direct_tcp(
        &self,
        completion: &ResponseCompletion,
        pool: &ChannelPool,
        idle: Duration,
        connect_timeout: Duration,
        peer_connection: Option<Arc<PeerConnection>>,
        fire_and_forget: bool,
    ) {
        let message = completion.request();
        let my_id = completion.message_id();

        // Reuse a live long-lived connection when one is supplied.
        if let Some(pc) = peer_connection.filter(|pc| pc.is_alive()) {
            if !fire_and_forget {
                if let Err(e) = self.registry.register(completion) {
                    completion.fail(e);
                    return;
                }
            }
            if let Err(e) = pc.write(&message).await {
                self.registry.remove(my_id);
                self.log_send_failure(&message, &e);
                completion.fail(e);
                return;
            }
            if fire_and_forget {
                completion.succeed(None);
                return;
            }
            let watchdog = pc.watchdog();
            watchdog.touch();
            let resolved = completion.outcome();
            tokio::pin!(resolved);
            tokio::select! {
                _ = &mut resolved => {}
                _ = watchdog.expired() => {
                    self.registry.remove(my_id);
                    completion.fail(TransportError::IdleTimeout);
                }
            }
            return;
        }

        let slot = match pool
            .connect_tcp(message.recipient.tcp_socket(), connect_timeout)
            .await
        {
            Ok(slot) => slot,
            Err(e) => {
                self.log_send_failure(&message, &e);
                completion.fail(e);
                return;
            }
        };
        if !fire_and_forget {
            if let Err(e) = self.registry.register(completion) {
                drop(slot);
                completion.fail(e);
                return;
            }
        }
        let frame = match codec::encode_framed(&message, self.signer_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.remove(my_id);
                drop(slot);
                completion.fail(e.into());
                return;
            }
        };
        let (read_half, mut write_half) = slot.stream.into_split();
        let permit = slot.permit;

        if let Err(e) = write_half.write_all(&frame).await {
            let err = TransportError::Write(e.to_string());
            self.registry.remove(my_id);
            drop(write_half);
            drop(read_half);
            permit.release();
            self.log_send_failure(&message, &err);
            completion.fail(err);
            return;
        }

        if fire_and_forget {
            debug!(message_id = my_id, "fire and forget, closing channel");
            drop(write_half);
            drop(read_half);
            permit.release();
            completion.succeed(None);
            return;
        }

        let watchdog = Watchdog::new(idle);
        let result = await_tcp_reply(read_half, &watchdog, my_id, &self.registry, completion).await;
        // Slot back before anyone observes the outcome.
        drop(write_half);
        permit.release();
        match result {
            Ok(Some(reply)) => completion.succeed(Some(reply)),
            Ok(None) => {}
            Err(e) => {
                self.log_send_failure(&message, &e);
                completion.fail(e);
            }
        }
    }

    async fn direct_udp(
        &self,
        completion: &ResponseCompletion,
        pool: &ChannelPool,
        idle: Duration,
        fire_and_forget: bool,
        local_port: Option<u16>,
    ) {
        let message = completion.request();
        let my_id = completion.message_id();

        let slot = match pool.bind_udp(local_port).await {
            Ok(slot) => slot,
            Err(e) => {
                self.log_send_failure(&message, &e);
                completion.fail(e);
                return;
            }
        };
        if !fire_and_forget {
            if let Err(e) = self.registry.register(completion) {
                drop(slot);
                completion.fail(e);
                return;
            }
        }
        let frame = match codec::encode(&message, self.signer_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.remove(my_id);
                drop(slot);
                completion.fail(e.into());
                return;
            }
        };
        let target = message.recipient.udp_socket();
        if let Err(e) = slot.socket.send_to(&frame, target).await {
            let err = TransportError::Write(format!("{}: {}", target, e));
            self.registry.remove(my_id);
            drop(slot);
            self.log_send_failure(&message, &err);
            completion.fail(err);
            return;
        }

        if fire_and_forget {
            drop(slot);
            completion.succeed(None);
            return;
        }

        let watchdog = Watchdog::new(idle);
        let result =
            await_udp_reply(&slot.socket, &watchdog, my_id, &self.registry, completion).await;
        drop(slot);
        match result {
            Ok(Some(reply)) => completion.succeed(Some(reply)),
            Ok(None) => {}
            Err(e) => {
                self.log_send_failure(&message, &e);
                completion.fail(e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Reverse connection
    // ------------------------------------------------------------------

    /// Asks a relay of the unreachable recipient to make it dial us back.
    /// The original request waits in the cache; once the back-dial arrives,
    /// the dispatcher writes it over the new channel and the reply
    /// correlates through the registry.
    async fn reverse_connect(
        self: &Arc<Self>,
        completion: &ResponseCompletion,
        pool: &Arc<ChannelPool>,
        idle: Duration,
        connect_timeout: Duration,
        peer_connection: Option<Arc<PeerConnection>>,
    ) {
        // The relay would drop its channel to the recipient otherwise.
        completion.update_request(|m| m.keep_alive = true);
        let original = completion.request();
        let relay = match self.random_relay(&original.recipient) {
            Some(relay) => relay,
            None => {
                completion.fail(TransportError::RelayUnavailable);
                return;
            }
        };
        debug!(recipient = %original.recipient, %relay, "initiating reverse connection setup");

        let mut rcon = Message::request(
            Command::Rcon,
            original.sender.clone(),
            original.recipient.with_socket(relay).with_relayed(false),
        );
        rcon.version = original.version;
        rcon.keep_alive = true;
        // The relay forwards this id to the recipient; the back-dial frame
        // carries it so we can find the cached original.
        rcon.ints.push(original.message_id);

        let cache = Arc::clone(&self.cached_requests);
        let original_id = original.message_id;
        completion.add_cancel_hook(move || cache.remove(original_id));
        self.cached_requests.insert(completion.clone());

        let rcon_completion = ResponseCompletion::new(rcon);
        self.direct_tcp(
            &rcon_completion,
            pool,
            idle,
            connect_timeout,
            peer_connection,
            false,
        )
        .await;

        match rcon_completion.outcome().await {
            Outcome::Ok(Some(reply))
                if reply.command == Command::Rcon && reply.kind == MessageType::Ok =>
            {
                debug!(peer = %original.recipient.id, "reverse connection set up");
            }
            Outcome::Ok(Some(reply)) if reply.kind == MessageType::Denied => {
                self.cached_requests.remove(original_id);
                completion.fail(TransportError::Denied);
            }
            Outcome::Ok(_) => {
                self.cached_requests.remove(original_id);
                completion.fail(TransportError::Connect(
                    "reverse connection setup rejected".into(),
                ));
            }
            Outcome::Failed(e) => {
                self.cached_requests.remove(original_id);
                completion.fail(e);
            }
            Outcome::Cancelled => {
                self.cached_requests.remove(original_id);
                completion.cancel();
            }
        }
    }

    // ------------------------------------------------------------------
    // Relay fallback
    // ------------------------------------------------------------------

    /// Routes the message through whichever recipient relay answers a ping
    /// first. Failed relays are dropped from the in-flight descriptor and
    /// the remaining ones are tried; DENIED is terminal.
    async fn relay_send(
        self: &Arc<Self>,
        completion: &ResponseCompletion,
        pool: &Arc<ChannelPool>,
        idle: Duration,
        connect_timeout: Duration,
        fire_and_forget: bool,
        udp: bool,
    ) {
        loop {
            let relays = completion.request().recipient.relays.clone();
            if relays.is_empty() {
                completion.fail(TransportError::RelayUnavailable);
                return;
            }
            let winner = match self.ping_first(&relays).await {
                Some(winner) => winner,
                None => {
                    debug!("no relay answered the probe");
                    completion.fail(TransportError::RelayUnavailable);
                    return;
                }
            };
            debug!(%winner, "relay selected");
            completion.update_request(|m| {
                m.recipient = m.recipient.with_socket(winner).with_relayed(true);
            });

            let attempt = ResponseCompletion::new(completion.request());
            if udp {
                self.direct_udp(&attempt, pool, idle, fire_and_forget, None).await;
            } else {
                self.direct_tcp(&attempt, pool, idle, connect_timeout, None, fire_and_forget)
                    .await;
            }
            match attempt.outcome().await {
                Outcome::Ok(Some(reply)) if reply.kind == MessageType::Denied => {
                    completion.fail(TransportError::Denied);
                    return;
                }
                Outcome::Ok(reply) => {
                    completion.succeed(reply);
                    return;
                }
                Outcome::Cancelled => {
                    completion.cancel();
                    return;
                }
                Outcome::Failed(e) => {
                    debug!(%winner, %e, "relay attempt failed, removing relay");
                    completion.update_request(|m| {
                        let remaining: Vec<PeerSocketAddress> = m
                            .recipient
                            .relays
                            .iter()
                            .copied()
                            .filter(|r| *r != winner)
                            .collect();
                        m.recipient = m.recipient.with_relays(remaining);
                    });
                }
            }
        }
    }

    /// Pings all relays in parallel; the first to answer wins and the
    /// remaining probes are cancelled.
    async fn ping_first(&self, relays: &[PeerSocketAddress]) -> Option<PeerSocketAddress> {
        let (tx, mut rx) = mpsc::channel(relays.len().max(1));
        let mut probes = Vec::with_capacity(relays.len());
        for relay in relays {
            let ping_factory = Arc::clone(&self.ping_factory);
            let tx = tx.clone();
            let relay = *relay;
            probes.push(tokio::spawn(async move {
                if let Ok(answered) = ping_factory.ping(relay).await {
                    let _ = tx.send(answered).await;
                }
            }));
        }
        drop(tx);
        let winner = rx.recv().await;
        for probe in &probes {
            probe.abort();
        }
        winner
    }

    // ------------------------------------------------------------------
    // Hole punching
    // ------------------------------------------------------------------

    /// Coordinates a UDP hole punch: hint through a relay, then one
    /// duplicate of the original per punched port pair. The first duplicate
    /// answered resolves the completion; the rest only adjust the counter.
    async fn hole_punch(
        self: &Arc<Self>,
        completion: &ResponseCompletion,
        pool: &Arc<ChannelPool>,
        idle: Duration,
    ) {
        let original = completion.request();
        let relay = match self.random_relay(&original.recipient) {
            Some(relay) => relay,
            None => {
                completion.fail(TransportError::RelayUnavailable);
                return;
            }
        };
        let mut hint = Message::request(
            Command::Holep,
            original.sender.clone(),
            original.recipient.with_socket(relay).with_relayed(false),
        );
        hint.version = original.version;
        hint.udp = true;
        hint.ints = (0..self.config.hole_punch_ports)
            .map(|_| pool.random_port() as u32)
            .collect();
        debug!(recipient = %original.recipient, ports = ?hint.ints, "sending hole-punch hint");

        let hint_completion = ResponseCompletion::new(hint);
        self.direct_udp(&hint_completion, pool, idle, false, None).await;
        let reply = match hint_completion.outcome().await {
            Outcome::Ok(Some(reply)) => reply,
            Outcome::Ok(None) => {
                completion.fail(TransportError::HolePunchMalformed("empty hint reply"));
                return;
            }
            Outcome::Failed(e) => {
                completion.fail(e);
                return;
            }
            Outcome::Cancelled => {
                completion.cancel();
                return;
            }
        };

        let state = HolePunchState::new(original.command);
        let pairs = match state.evaluate(&reply) {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(%e, "hole punch aborted");
                completion.fail(e);
                return;
            }
        };
        let total = pairs.len();
        debug!(total, peer = %original.recipient.id, "hole-punch reply enumerates open ports");

        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let last_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        for (local_port, remote_port) in pairs {
            let dup = punch_duplicate(&original, local_port, remote_port);
            let dup_completion = ResponseCompletion::new(dup);
            let this = Arc::clone(self);
            let pool = Arc::clone(pool);
            let completion = completion.clone();
            let successes = Arc::clone(&successes);
            let failures = Arc::clone(&failures);
            let last_error = Arc::clone(&last_error);
            let expect = state.original_command();
            tokio::spawn(async move {
                this.direct_udp(&dup_completion, &pool, idle, false, Some(local_port))
                    .await;
                match dup_completion.outcome().await {
                    Outcome::Ok(Some(reply))
                        if reply.command == expect && reply.kind == MessageType::Ok =>
                    {
                        let n = successes.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!(
                            "{}/{} hole-punch message(s) reached peer {}",
                            n, total, reply.sender.id
                        );
                        completion.succeed(Some(reply));
                    }
                    outcome => {
                        if let Outcome::Failed(e) = outcome {
                            *last_error.lock() = Some(e);
                        }
                        let failed = failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if failed == total {
                            let e = last_error.lock().take().unwrap_or_else(|| {
                                TransportError::Connect(
                                    "no hole-punch message reached the peer".into(),
                                )
                            });
                            completion.fail(e);
                        }
                    }
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Shared bits
    // ------------------------------------------------------------------

    fn install_failure_reporter(&self, completion: &ResponseCompletion) {
        let status = Arc::clone(&self.status);
        let recipient = completion.request().recipient.clone();
        completion.on_complete(move |outcome| {
            if let Outcome::Failed(e) = outcome {
                status.notify_failure(&recipient, e);
            }
        });
    }

    fn random_relay(&self, recipient: &PeerAddress) -> Option<PeerSocketAddress> {
        if recipient.relays.is_empty() {
            return None;
        }
        let idx = self.rng.lock().random_range(0..recipient.relays.len());
        Some(recipient.relays[idx])
    }

    fn signer_ref(&self) -> Option<&dyn SignatureFactory> {
        self.signer.as_deref()
    }

    fn log_send_failure(&self, message: &Message, error: &TransportError) {
        if error.is_expected_race() {
            debug!(message_id = message.message_id, recipient = %message.recipient, %error, "send failed");
        } else {
            warn!(message_id = message.message_id, recipient = %message.recipient, %error, "send failed");
        }
    }
}

/// Reads frames until the reply for `my_id` arrives, the watchdog fires, or
/// the completion resolves elsewhere. Returns `Ok(None)` in the last case.
/// The registry entry for `my_id` is always gone by the time this returns.
async fn await_tcp_reply(
    mut read_half: OwnedReadHalf,
    watchdog: &Watchdog,
    my_id: u32,
    registry: &PendingRegistry,
    completion: &ResponseCompletion,
) -> Result<Option<Message>, TransportError> {
    let resolved = completion.outcome();
    tokio::pin!(resolved);
    let mut decoder = StreamDecoder::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        tokio::select! {
            _ = &mut resolved => {
                registry.remove(my_id);
                return Ok(None);
            }
            _ = watchdog.expired() => {
                registry.remove(my_id);
                return Err(TransportError::IdleTimeout);
            }
            read = read_half.read(&mut buf) => {
                let n = match read {
                    Ok(0) => {
                        registry.remove(my_id);
                        return Err(TransportError::Connect("channel closed before reply".into()));
                    }
                    Ok(n) => n,
                    Err(e) => {
                        registry.remove(my_id);
                        return Err(TransportError::Connect(e.to_string()));
                    }
                };
                watchdog.touch();
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(msg)) if msg.kind.is_response() && msg.message_id == my_id => {
                            registry.remove(my_id);
                            return Ok(Some(msg));
                        }
                        Ok(Some(msg)) if msg.kind.is_response() => {
                            registry.complete(msg);
                        }
                        Ok(Some(msg)) => {
                            debug!(command = ?msg.command, "ignoring request on outbound channel");
                        }
                        Ok(None) => break,
                        Err(e) => {
                            registry.remove(my_id);
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }
}

/// Datagram variant of [`await_tcp_reply`].
async fn await_udp_reply(
    socket: &UdpSocket,
    watchdog: &Watchdog,
    my_id: u32,
    registry: &PendingRegistry,
    completion: &ResponseCompletion,
) -> Result<Option<Message>, TransportError> {
    let resolved = completion.outcome();
    tokio::pin!(resolved);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            _ = &mut resolved => {
                registry.remove(my_id);
                return Ok(None);
            }
            _ = watchdog.expired() => {
                registry.remove(my_id);
                return Err(TransportError::IdleTimeout);
            }
            received = socket.recv_from(&mut buf) => {
                let (n, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        registry.remove(my_id);
                        return Err(TransportError::Connect(e.to_string()));
                    }
                };
                watchdog.touch();
                match codec::decode(&buf[..n]) {
                    Ok(msg) if msg.kind.is_response() && msg.message_id == my_id => {
                        registry.remove(my_id);
                        return Ok(Some(msg));
                    }
                    Ok(msg) if msg.kind.is_response() => {
                        registry.complete(msg);
                    }
                    Ok(msg) => {
                        debug!(command = ?msg.command, %src, "ignoring request on outbound channel");
                    }
                    Err(e) => {
                        debug!(%src, %e, "dropping undecodable datagram");
                    }
                }
            }
        }
    }
}

/// Minimal UDP ping implementation for relay probing.
///
/// Sends a PING datagram straight at the target socket and waits for an OK
/// with the matching id.
pub struct UdpPinger {
    local: PeerAddress,
    timeout: Duration,
}

impl UdpPinger {
    pub fn new(local: PeerAddress, timeout: Duration) -> Self {
        Self { local, timeout }
    }
}

#[async_trait]
impl PingFactory for UdpPinger {
    async fn ping(&self, target: PeerSocketAddress) -> Result<PeerSocketAddress, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::ChannelCreation(e.to_string()))?;
        let probe_target = PeerAddress::new(
            crate::peer::PeerId([0u8; 20]),
            target.addr,
            target.tcp_port,
            target.udp_port,
        );
        let mut ping = Message::request(Command::Ping, self.local.clone(), probe_target);
        ping.udp = true;
        let frame = codec::encode(&ping, None)?;
        socket
            .send_to(&frame, target.udp())
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;

        let mut buf = vec![0u8; 2048];
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
                .await
                .map_err(|_| TransportError::IdleTimeout)?
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (n, _src) = received;
            if let Ok(msg) = codec::decode(&buf[..n]) {
                if msg.message_id == ping.message_id && msg.kind == MessageType::Ok {
                    return Ok(target);
                }
            }
        }
    }
}
