//! TCP transport: one listener, per-peer dialers, framed envelopes.
//!
//! The local node keeps at most one full-duplex connection per peer. When
//! both sides dial simultaneously, the connection whose dialer's NodeId
//! string compares lexicographically smaller survives and the other is
//! closed. Dial loops retry with exponential backoff (reset on a
//! successful handshake) until the peer is forgotten or the transport
//! shuts down.
//!
//! All sends are fire-and-forget; higher layers correlate replies by id.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use crate::error::ClusterError;
use crate::node::{NodeDownReason, NodeId};
use crate::proto::{ClusterMessage, Envelope, ProtoError};

/// What the transport reports to the cluster core.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// Handshake completed with a new peer.
    PeerConnected { node: NodeId },

    /// A verified message arrived from a connected peer.
    PeerMessage {
        node: NodeId,
        message: ClusterMessage,
    },

    /// The connection to a peer was lost, or a dial was refused.
    PeerLost {
        node: NodeId,
        reason: NodeDownReason,
    },
}

/// Tunables handed to the transport at bind time.
#[derive(Debug, Clone)]
pub(crate) struct TransportSettings {
    pub secret: Option<String>,
    pub max_frame_len: usize,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

struct PeerHandle {
    outbox: mpsc::UnboundedSender<ClusterMessage>,
    conn_id: u64,
    dialer: NodeId,
    /// Dropping the handle closes this, which ends the connection's
    /// reader task.
    _alive: watch::Sender<()>,
}

enum Direction {
    Inbound,
    Outbound,
}

pub(crate) struct Transport {
    local: NodeId,
    settings: TransportSettings,
    peers: dashmap::DashMap<NodeId, PeerHandle>,
    /// Peers we keep a dial loop alive for.
    wanted: dashmap::DashMap<NodeId, ()>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: broadcast::Sender<()>,
    conn_seq: AtomicU64,
}

impl Transport {
    /// Take ownership of a bound listener and start accepting.
    pub(crate) fn start(
        local: NodeId,
        listener: TcpListener,
        settings: TransportSettings,
    ) -> (Arc<Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let transport = Arc::new(Transport {
            local,
            settings,
            peers: dashmap::DashMap::new(),
            wanted: dashmap::DashMap::new(),
            events: events_tx,
            shutdown: shutdown_tx,
            conn_seq: AtomicU64::new(0),
        });

        let acceptor = Arc::clone(&transport);
        tokio::spawn(async move {
            let mut shutdown_rx = acceptor.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            debug!(peer_addr = %addr, "inbound connection");
                            let transport = Arc::clone(&acceptor);
                            tokio::spawn(async move {
                                if let Err(err) =
                                    transport.establish(stream, Direction::Inbound).await
                                {
                                    debug!(error = %err, "inbound connection dropped");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    },
                }
            }
        });

        (transport, events_rx)
    }

    /// The local node identity used in handshakes.
    pub(crate) fn local(&self) -> &NodeId {
        &self.local
    }

    /// Ensure a dial loop exists for `node`.
    ///
    /// Idempotent: a second call while a loop is alive does nothing. The
    /// loop retries with capped exponential backoff until the peer is
    /// forgotten or the transport shuts down; an established connection
    /// that later drops re-enters the loop.
    pub(crate) fn connect(self: &Arc<Self>, node: NodeId) {
        if node == self.local {
            return;
        }
        if self.wanted.insert(node.clone(), ()).is_some() {
            return;
        }

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown_rx = transport.shutdown.subscribe();
            let mut attempt: u32 = 0;
            let mut refused_reported = false;
            loop {
                if !transport.wanted.contains_key(&node) {
                    return;
                }
                if !transport.peers.contains_key(&node) {
                    match TcpStream::connect((node.dial_host(), node.port())).await {
                        Ok(stream) => {
                            match Arc::clone(&transport)
                                .establish(stream, Direction::Outbound)
                                .await
                            {
                                Ok(()) => {
                                    // Connection lived and ended; restart
                                    // the backoff for the reconnect.
                                    attempt = 0;
                                    refused_reported = false;
                                }
                                Err(err) => {
                                    debug!(node = %node, error = %err, "handshake failed");
                                    attempt = attempt.saturating_add(1);
                                }
                            }
                        }
                        Err(err) => {
                            debug!(node = %node, error = %err, "dial failed");
                            if !refused_reported {
                                refused_reported = true;
                                let _ = transport.events.send(TransportEvent::PeerLost {
                                    node: node.clone(),
                                    reason: NodeDownReason::ConnectionRefused,
                                });
                            }
                            attempt = attempt.saturating_add(1);
                        }
                    }
                }

                let delay = backoff_delay(
                    attempt,
                    transport.settings.reconnect_base,
                    transport.settings.reconnect_max,
                );
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });
    }

    /// Stop reconnecting to `node` and drop any live connection quietly.
    pub(crate) fn forget(&self, node: &NodeId) {
        self.wanted.remove(node);
        self.peers.remove(node);
    }

    /// Drop the live connection but keep wanting the peer (heartbeat
    /// timeout path; the dial loop will try again).
    pub(crate) fn drop_peer(&self, node: &NodeId) {
        self.peers.remove(node);
    }

    /// Send one message to a connected peer.
    pub(crate) fn send(&self, node: &NodeId, message: ClusterMessage) -> Result<(), ClusterError> {
        let peer = self
            .peers
            .get(node)
            .ok_or_else(|| ClusterError::NodeNotReachable { node: node.clone() })?;
        peer.outbox
            .send(message)
            .map_err(|_| ClusterError::NodeNotReachable { node: node.clone() })
    }

    /// Send one message to every connected peer.
    pub(crate) fn broadcast(&self, message: ClusterMessage) {
        for peer in self.peers.iter() {
            let _ = peer.value().outbox.send(message.clone());
        }
    }

    /// Peers with a live connection.
    pub(crate) fn connected_peers(&self) -> Vec<NodeId> {
        self.peers.iter().map(|peer| peer.key().clone()).collect()
    }

    /// `true` while a live connection to `node` exists.
    pub(crate) fn is_connected(&self, node: &NodeId) -> bool {
        self.peers.contains_key(node)
    }

    /// Close everything and stop all tasks.
    pub(crate) fn shutdown(&self) {
        let _ = self.shutdown.send(());
        self.wanted.clear();
        self.peers.clear();
    }

    /// Run one connection: handshake, register, then pump frames until it
    /// dies. Returns once the connection is finished either way.
    async fn establish(
        self: Arc<Self>,
        stream: TcpStream,
        direction: Direction,
    ) -> Result<(), ClusterError> {
        let mut codec = LengthDelimitedCodec::new();
        codec.set_max_frame_length(self.settings.max_frame_len);
        let mut framed = Framed::new(stream, codec);
        let secret = self.settings.secret.clone();

        // Handshake, both directions.
        let hello = Envelope::seal(
            ClusterMessage::Handshake {
                node: self.local.clone(),
            },
            secret.as_deref(),
        )?;
        framed.send(Bytes::from(hello.encode()?)).await?;

        let first = match framed.next().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => return Err(err.into()),
            None => {
                return Err(ProtoError::InvalidFrame {
                    reason: "connection closed during handshake".to_string(),
                }
                .into())
            }
        };
        let envelope = Envelope::decode(&first)?;
        if let Err(err) = envelope.verify(secret.as_deref()) {
            warn!(error = %err, "handshake rejected");
            return Err(ClusterError::AuthenticationFailed {
                node: "unknown".to_string(),
            });
        }
        let ClusterMessage::Handshake { node: peer } = envelope.into_message() else {
            return Err(ProtoError::InvalidFrame {
                reason: "expected handshake as first frame".to_string(),
            }
            .into());
        };
        if peer == self.local {
            return Ok(());
        }

        let dialer = match direction {
            Direction::Outbound => self.local.clone(),
            Direction::Inbound => peer.clone(),
        };
        let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ClusterMessage>();
        let (alive_tx, mut alive_rx) = watch::channel(());

        // Register, resolving a simultaneous dial deterministically: the
        // connection dialed by the smaller NodeId wins.
        let mut newly_connected = false;
        match self.peers.entry(peer.clone()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PeerHandle {
                    outbox: outbox_tx,
                    conn_id,
                    dialer,
                    _alive: alive_tx,
                });
                newly_connected = true;
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if dialer < slot.get().dialer {
                    debug!(node = %peer, "replacing duplicate connection (tiebreak)");
                    slot.insert(PeerHandle {
                        outbox: outbox_tx,
                        conn_id,
                        dialer,
                        _alive: alive_tx,
                    });
                } else {
                    debug!(node = %peer, "dropping duplicate connection (tiebreak)");
                    return Ok(());
                }
            }
        }

        if newly_connected {
            info!(node = %peer, "peer connected");
            let _ = self.events.send(TransportEvent::PeerConnected { node: peer.clone() });
        }

        let (mut sink, mut frames) = framed.split();

        // Writer: serializes all sends onto this connection.
        let writer_secret = secret.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                let envelope = match Envelope::seal(message, writer_secret.as_deref()) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(error = %err, "failed to seal outbound message");
                        continue;
                    }
                };
                let bytes = match envelope.encode() {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound message");
                        continue;
                    }
                };
                if sink.send(bytes).await.is_err() {
                    break;
                }
            }
        });

        // Reader: this task. Frames arrive in order; each is verified
        // before it reaches the upper layers.
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut quiet = false;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    quiet = true;
                    break;
                }
                // The registered handle was dropped (tiebreak replacement,
                // sweep, or forget): whoever dropped it owns the cleanup,
                // so this reader just stops pumping the stale socket.
                changed = alive_rx.changed() => {
                    if changed.is_err() {
                        quiet = true;
                        break;
                    }
                }
                frame = frames.next() => match frame {
                    Some(Ok(bytes)) => match Envelope::decode(&bytes) {
                        Ok(envelope) => match envelope.verify(secret.as_deref()) {
                            Ok(()) => {
                                let _ = self.events.send(TransportEvent::PeerMessage {
                                    node: peer.clone(),
                                    message: envelope.into_message(),
                                });
                            }
                            Err(err) => {
                                warn!(node = %peer, error = %err, "rejecting frame; closing connection");
                                break;
                            }
                        },
                        Err(err) => {
                            warn!(node = %peer, error = %err, "undecodable frame; closing connection");
                            break;
                        }
                    },
                    Some(Err(err)) => {
                        // Oversized frames land here before any parsing.
                        warn!(node = %peer, error = %err, "frame error; closing connection");
                        break;
                    }
                    None => break,
                },
            }
        }

        writer.abort();
        let removed = self
            .peers
            .remove_if(&peer, |_, handle| handle.conn_id == conn_id)
            .is_some();
        if removed && !quiet {
            info!(node = %peer, "peer connection lost");
            let _ = self.events.send(TransportEvent::PeerLost {
                node: peer,
                reason: NodeDownReason::ConnectionClosed,
            });
        }
        Ok(())
    }
}

/// Exponential backoff with jitter: `base * 2^min(attempt, 10)` capped at
/// `max`, plus up to a quarter of `base` of random jitter.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u64.saturating_pow(attempt.min(10));
    let raw = base.saturating_mul(factor as u32).min(max);
    let jitter_ceiling = (base.as_millis() as u64 / 4).max(1);
    let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
    raw + Duration::from_millis(jitter)
}
