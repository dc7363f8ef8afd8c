use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatch::{DispatchAction, Dispatcher};
use super::error::TransportError;
use crate::message::{codec, StreamDecoder};
use crate::peer::PeerAddress;

/// The inbound half of a node: TCP listener plus UDP socket.
///
/// Every inbound frame goes through the dispatcher; responses correlate to
/// the pending registry, requests are answered on the channel they arrived
/// on. UDP replies go to the datagram's observed source address, which is
/// what NAT traversal needs.
pub struct Endpoint {
    local: PeerAddress,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    udp_task: JoinHandle<()>,
}

impl Endpoint {
    /// Binds the TCP and UDP sockets named by `local` and starts serving.
    ///
    /// Port 0 binds an OS-assigned port; [`local`](Self::local) reports the
    /// descriptor with the actual ports filled in.
    pub async fn bind(
        local: PeerAddress,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(local.tcp_socket())
            .await
            .map_err(|e| TransportError::ChannelCreation(format!("tcp listen: {}", e)))?;
        let tcp_addr = listener
            .local_addr()
            .map_err(|e| TransportError::ChannelCreation(e.to_string()))?;

        let udp = UdpSocket::bind(SocketAddr::new(local.addr, local.udp_port))
            .await
            .map_err(|e| TransportError::ChannelCreation(format!("udp bind: {}", e)))?;
        let udp_addr = udp
            .local_addr()
            .map_err(|e| TransportError::ChannelCreation(e.to_string()))?;

        let local = local.with_ports(tcp_addr.port(), udp_addr.port());
        info!(peer = %local, %tcp_addr, %udp_addr, "endpoint bound");

        let accept_task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, remote)) => {
                            debug!(%remote, "inbound tcp connection");
                            let dispatcher = Arc::clone(&dispatcher);
                            tokio::spawn(serve_tcp(stream, remote, dispatcher));
                        }
                        Err(e) => {
                            warn!(%e, "tcp accept failed");
                            return;
                        }
                    }
                }
            })
        };

        let udp_task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let (n, src) = match udp.recv_from(&mut buf).await {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(%e, "udp receive failed");
                            return;
                        }
                    };
                    let msg = match codec::decode(&buf[..n]) {
                        Ok(msg) => msg,
                        Err(e) => {
                            debug!(%src, %e, "dropping undecodable datagram");
                            continue;
                        }
                    };
                    match dispatcher.dispatch(msg) {
                        DispatchAction::Reply(reply) | DispatchAction::SendCached(reply) => {
                            match codec::encode(&reply, None) {
                                Ok(frame) => {
                                    if let Err(e) = udp.send_to(&frame, src).await {
                                        debug!(%src, %e, "udp reply failed");
                                    }
                                }
                                Err(e) => warn!(%e, "cannot encode udp reply"),
                            }
                        }
                        DispatchAction::Nothing => {}
                    }
                }
            })
        };

        Ok(Self {
            local,
            tcp_addr,
            udp_addr,
            accept_task,
            udp_task,
        })
    }

    /// The local descriptor with the actually bound ports.
    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Stops accepting and receiving. In-flight sends are failed by the
    /// caller through the registry.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.udp_task.abort();
        info!(peer = %self.local, "endpoint shut down");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_tcp(stream: TcpStream, remote: SocketAddr, dispatcher: Arc<Dispatcher>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut decoder = StreamDecoder::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                debug!(%remote, %e, "inbound tcp read failed");
                return;
            }
        };
        decoder.extend(&buf[..n]);
        loop {
            let msg = match decoder.next_frame() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    warn!(%remote, %e, "dropping inbound tcp channel on codec error");
                    return;
                }
            };
            let keep_open = msg.keep_alive;
            match dispatcher.dispatch(msg) {
                DispatchAction::Reply(reply) => {
                    let frame = match codec::encode_framed(&reply, None) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(%e, "cannot encode reply");
                            continue;
                        }
                    };
                    if let Err(e) = write_half.write_all(&frame).await {
                        debug!(%remote, %e, "reply write failed");
                        return;
                    }
                    // One-shot exchanges close from our side once answered.
                    if !keep_open {
                        return;
                    }
                }
                DispatchAction::SendCached(original) => {
                    let frame = match codec::encode_framed(&original, None) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(%e, "cannot encode cached request");
                            continue;
                        }
                    };
                    if let Err(e) = write_half.write_all(&frame).await {
                        debug!(%remote, %e, "cached request write failed");
                        return;
                    }
                    // Stay open: the reply to the cached request arrives on
                    // this same back-dialed channel.
                }
                DispatchAction::Nothing => {}
            }
        }
    }
}
