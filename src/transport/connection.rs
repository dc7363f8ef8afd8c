use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::channel::ChannelPool;
use super::config::TransportConfig;
use super::dispatch::{DispatchAction, Dispatcher};
use super::error::TransportError;
use super::watchdog::Watchdog;
use crate::message::{codec, Command, Message, StreamDecoder};
use crate::peer::PeerAddress;
use crate::transport::completion::ResponseCompletion;

/// A long-lived TCP channel to one peer.
///
/// The connection holds its pool slot for its whole lifetime, serializes
/// writes through a per-connection mutex, and keeps itself alive with
/// periodic pings. Inbound responses correlate through the shared registry;
/// inbound requests go to the dispatcher and their replies are written back
/// on the same channel.
pub struct PeerConnection {
    peer: PeerAddress,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    watchdog: Watchdog,
    open: Arc<AtomicBool>,
    read_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl PeerConnection {
    /// Dials `peer` and starts the shared read loop and heartbeat.
    pub async fn open(
        local: PeerAddress,
        peer: PeerAddress,
        pool: &ChannelPool,
        dispatcher: Arc<Dispatcher>,
        config: &TransportConfig,
    ) -> Result<Arc<Self>, TransportError> {
        let slot = pool
            .connect_tcp(peer.tcp_socket(), config.connect_timeout)
            .await?;
        let (mut read_half, write_half) = slot.stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(write_half));
        let watchdog = Watchdog::new(config.idle_tcp);
        let open = Arc::new(AtomicBool::new(true));
        let permit = slot.permit;

        let read_task = {
            let writer = Arc::clone(&writer);
            let watchdog = watchdog.clone();
            let open = Arc::clone(&open);
            let dispatcher = Arc::clone(&dispatcher);
            let peer = peer.clone();
            tokio::spawn(async move {
                // The permit lives as long as the read loop.
                let _permit = permit;
                let mut decoder = StreamDecoder::new();
                let mut buf = vec![0u8; 8 * 1024];
                loop {
                    let n = match read_half.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            debug!(%peer, %e, "peer connection read failed");
                            break;
                        }
                    };
                    watchdog.touch();
                    decoder.extend(&buf[..n]);
                    loop {
                        match decoder.next_frame() {
                            Ok(Some(msg)) => match dispatcher.dispatch(msg) {
                                DispatchAction::Reply(reply) | DispatchAction::SendCached(reply) => {
                                    if let Ok(frame) = codec::encode_framed(&reply, None) {
                                        let mut w = writer.lock().await;
                                        if w.write_all(&frame).await.is_err() {
                                            open.store(false, Ordering::SeqCst);
                                            return;
                                        }
                                    }
                                }
                                DispatchAction::Nothing => {}
                            },
                            Ok(None) => break,
                            Err(e) => {
                                warn!(%peer, %e, "dropping peer connection on codec error");
                                open.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                }
                open.store(false, Ordering::SeqCst);
                debug!(%peer, "peer connection closed");
            })
        };

        let heartbeat_task = {
            let writer = Arc::clone(&writer);
            let watchdog = watchdog.clone();
            let open = Arc::clone(&open);
            let dispatcher = Arc::clone(&dispatcher);
            let interval = config.heartbeat_interval;
            let peer = peer.clone();
            let local = local.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                let mut last_ping_id: Option<u32> = None;
                loop {
                    ticker.tick().await;
                    if !open.load(Ordering::SeqCst) {
                        return;
                    }
                    // An unanswered beat must not pile up in the registry.
                    if let Some(prev) = last_ping_id.take() {
                        dispatcher.registry().remove(prev);
                    }
                    let mut ping = Message::request(Command::Ping, local.clone(), peer.clone());
                    ping.keep_alive = true;
                    let completion = ResponseCompletion::new(ping.clone());
                    if dispatcher.registry().register(&completion).is_err() {
                        continue;
                    }
                    let frame = match codec::encode_framed(&ping, None) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    let failed = {
                        let mut w = writer.lock().await;
                        w.write_all(&frame).await.is_err()
                    };
                    if failed {
                        dispatcher.registry().remove(completion.message_id());
                        open.store(false, Ordering::SeqCst);
                        return;
                    }
                    last_ping_id = Some(completion.message_id());
                    watchdog.touch();
                }
            })
        };

        Ok(Arc::new(Self {
            peer,
            writer,
            watchdog,
            open,
            read_task,
            heartbeat_task,
        }))
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// The connection's idle watchdog; per-send reply waits race against it.
    pub fn watchdog(&self) -> Watchdog {
        self.watchdog.clone()
    }

    /// Writes one message, serialized against other writers of this
    /// connection.
    pub async fn write(&self, msg: &Message) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Connect("peer connection closed".into()));
        }
        let frame = codec::encode_framed(msg, None)?;
        let mut w = self.writer.lock().await;
        w.write_all(&frame)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))?;
        self.watchdog.touch();
        Ok(())
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.read_task.abort();
        self.heartbeat_task.abort();
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}
