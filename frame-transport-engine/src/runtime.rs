//! Transport runtime
//!
//! Owns the UDP socket and drives one session: handshake, the
//! established send/receive loop, keepalives and teardown. The loop is a
//! single task, so session state and the reassembly table have exactly
//! one writer; callers talk to it through a `SessionHandle`.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{TransportError, TransportResult};
use crate::frame_lease::FrameLease;
use crate::packet::{
    Bye, ByeReason, ControlMessage, Hello, HelloAck, Packet, PacketKind, StreamType,
    PROTOCOL_VERSION,
};
use crate::packetizer::Packetizer;
use crate::reassembler::Reassembler;
use crate::session::{LinkHealth, RetryConfig, Session, SessionRole, SessionState};
use crate::sink::FrameSink;
use framelink_config::TransportConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

// Largest UDP payload we will ever put a fragment into.
const MAX_DATAGRAM_PAYLOAD: usize = 65000;

fn state_to_u8(state: SessionState) -> u8 {
    match state {
        SessionState::Idle => 0,
        SessionState::Handshaking => 1,
        SessionState::Established => 2,
        SessionState::Closed => 3,
    }
}

fn state_from_u8(raw: u8) -> SessionState {
    match raw {
        0 => SessionState::Idle,
        1 => SessionState::Handshaking,
        2 => SessionState::Established,
        _ => SessionState::Closed,
    }
}

/// Caller-facing handle for a running session
///
/// Safe to use from any thread; submission never blocks on network I/O.
pub struct SessionHandle {
    stream: StreamType,
    frame_tx: mpsc::Sender<FrameLease>,
    state: AtomicU8,
    shutdown: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
}

impl SessionHandle {
    /// Stream type this handle feeds
    pub fn stream(&self) -> StreamType {
        self.stream
    }

    /// Local socket address, available once the runtime has bound
    ///
    /// The embedding application hands this to its signaling layer so
    /// the remote side learns where to dial.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Current session state as last published by the runtime
    pub fn state(&self) -> SessionState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while frames can be accepted
    pub fn is_established(&self) -> bool {
        self.state() == SessionState::Established
    }

    /// Submit one frame for transmission
    ///
    /// Non-blocking. On every `false` path the lease is consumed here,
    /// so its release fires before the caller sees the failure.
    pub fn submit_frame(&self, lease: FrameLease) -> bool {
        if !self.is_established() {
            warn!(
                stream = %self.stream,
                state = %self.state(),
                "frame rejected: session not established"
            );
            lease.release();
            return false;
        }

        match self.frame_tx.try_send(lease) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(lease)) => {
                warn!(stream = %self.stream, "frame dropped: send queue full");
                lease.release();
                false
            }
            Err(mpsc::error::TrySendError::Closed(lease)) => {
                warn!(stream = %self.stream, "frame rejected: session loop gone");
                lease.release();
                false
            }
        }
    }

    /// Ask the session loop to stop; `run` returns shortly after
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn publish_state(&self, state: SessionState) {
        self.state.store(state_to_u8(state), Ordering::Release);
    }
}

/// One session worth of transport machinery
pub struct TransportRuntime {
    config: TransportConfig,
    session: Session,
    /// Bind address (host role) or destination address (client role)
    addr: SocketAddr,
    sink: Arc<dyn FrameSink>,
    frame_rx: Option<mpsc::Receiver<FrameLease>>,
    handle: Arc<SessionHandle>,
    shutdown: CancellationToken,
}

impl TransportRuntime {
    /// Create a runtime and the handle callers submit frames through
    pub fn new(
        role: SessionRole,
        stream: StreamType,
        addr: SocketAddr,
        config: TransportConfig,
        sink: Arc<dyn FrameSink>,
    ) -> (Self, Arc<SessionHandle>) {
        let (frame_tx, frame_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let shutdown = CancellationToken::new();

        let handle = Arc::new(SessionHandle {
            stream,
            frame_tx,
            state: AtomicU8::new(state_to_u8(SessionState::Idle)),
            shutdown: shutdown.clone(),
            local_addr: OnceLock::new(),
        });

        let runtime = TransportRuntime {
            config,
            session: Session::new(role, stream),
            addr,
            sink,
            frame_rx: Some(frame_rx),
            handle: handle.clone(),
            shutdown,
        };

        (runtime, handle)
    }

    /// Run the session to completion
    ///
    /// Blocks (asynchronously) from handshake through teardown; returns
    /// on shutdown, peer teardown, keepalive expiry or fatal transport
    /// error. The handle is flipped to `Closed` on every exit path.
    pub async fn run(mut self) -> TransportResult<()> {
        let result = match self.run_inner().await {
            // A requested shutdown is a clean exit, not a failure.
            Err(TransportError::ShuttingDown) => Ok(()),
            other => other,
        };

        self.session.set_state(SessionState::Closed);
        self.handle.publish_state(SessionState::Closed);

        let stats = &self.session.stats;
        info!(
            stream = %self.session.stream,
            role = %self.session.role,
            packets_sent = stats.packets_sent,
            packets_received = stats.packets_received,
            frames_sent = stats.frames_sent,
            frames_delivered = stats.frames_delivered,
            "session closed"
        );

        result
    }

    async fn run_inner(&mut self) -> TransportResult<()> {
        if self.config.max_segment_size == 0
            || self.config.max_segment_size > MAX_DATAGRAM_PAYLOAD
        {
            return Err(TransportError::Config(format!(
                "max_segment_size {} outside 1..={}",
                self.config.max_segment_size, MAX_DATAGRAM_PAYLOAD
            )));
        }

        let socket = self.bind_socket().await?;

        self.session.set_state(SessionState::Handshaking);
        self.handle.publish_state(SessionState::Handshaking);

        let peer = match self.session.role {
            SessionRole::Host => self.handshake_as_host(&socket).await?,
            SessionRole::Client => self.handshake_as_client(&socket).await?,
        };

        self.session.peer_addr = Some(peer);
        self.session.set_state(SessionState::Established);
        self.handle.publish_state(SessionState::Established);
        info!(
            stream = %self.session.stream,
            role = %self.session.role,
            peer = %peer,
            "session established"
        );

        self.run_established(&socket, peer).await
    }

    async fn bind_socket(&self) -> TransportResult<UdpSocket> {
        let bind_addr: SocketAddr = match self.session.role {
            SessionRole::Host => self.addr,
            // Client takes an ephemeral port in the same address family
            // as the host it dials.
            SessionRole::Client => {
                if self.addr.is_ipv4() {
                    "0.0.0.0:0".parse().expect("static addr")
                } else {
                    "[::]:0".parse().expect("static addr")
                }
            }
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        let local = socket.local_addr()?;
        let _ = self.handle.local_addr.set(local);
        debug!(
            stream = %self.session.stream,
            local = %local,
            "transport socket bound"
        );
        Ok(socket)
    }

    /// Wait for a Hello, acknowledge it, learn the peer address.
    async fn handshake_as_host(&mut self, socket: &UdpSocket) -> TransportResult<SocketAddr> {
        let retry = self.retry_config();
        let shutdown = self.shutdown.clone();

        for attempt in 0..=retry.max_retries {
            // The wait window stretches with the backoff schedule so a
            // slow client still lands inside the budget.
            let window = self.config.handshake_timeout() + retry.delay_for_attempt(attempt);

            let waited = tokio::select! {
                _ = shutdown.cancelled() => return Err(TransportError::ShuttingDown),
                waited = timeout(window, self.await_hello(socket)) => waited,
            };

            match waited {
                Ok(Ok((peer, session_id))) => {
                    let ack = ControlMessage::HelloAck(HelloAck {
                        session_id,
                        version: PROTOCOL_VERSION.to_string(),
                    });
                    let wire = Packet::control(self.session.stream, &ack)?.serialize();
                    socket.send_to(&wire, peer).await?;
                    self.session.session_id = Some(session_id);
                    return Ok(peer);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        stream = %self.session.stream,
                        attempt = attempt + 1,
                        max_attempts = retry.max_retries + 1,
                        "no handshake request within window"
                    );
                }
            }
        }

        Err(TransportError::HandshakeFailed {
            stream: self.session.stream.to_string(),
            reason: "no peer handshake within retry budget".to_string(),
        })
    }

    /// Send Hello, wait for the matching HelloAck, with backoff.
    async fn handshake_as_client(&mut self, socket: &UdpSocket) -> TransportResult<SocketAddr> {
        let session_id = Uuid::new_v4();
        let hello = ControlMessage::Hello(Hello {
            version: PROTOCOL_VERSION.to_string(),
            session_id,
        });
        let wire = Packet::control(self.session.stream, &hello)?.serialize();

        let retry = self.retry_config();
        let shutdown = self.shutdown.clone();

        for attempt in 0..=retry.max_retries {
            if attempt > 0 {
                let delay = retry.jittered_delay_for_attempt(attempt);
                warn!(
                    stream = %self.session.stream,
                    attempt = attempt + 1,
                    max_attempts = retry.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "handshake unanswered, retrying with backoff"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(TransportError::ShuttingDown),
                    _ = sleep(delay) => {}
                }
            }

            socket.send_to(&wire, self.addr).await?;

            let waited = tokio::select! {
                _ = shutdown.cancelled() => return Err(TransportError::ShuttingDown),
                waited = timeout(
                    self.config.handshake_timeout(),
                    self.await_hello_ack(socket, session_id),
                ) => waited,
            };

            match waited {
                Ok(Ok(peer)) => {
                    self.session.session_id = Some(session_id);
                    return Ok(peer);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => continue,
            }
        }

        Err(TransportError::HandshakeFailed {
            stream: self.session.stream.to_string(),
            reason: "retry budget exhausted waiting for acknowledgment".to_string(),
        })
    }

    /// Read datagrams until a valid Hello for this stream arrives.
    async fn await_hello(&self, socket: &UdpSocket) -> TransportResult<(SocketAddr, Uuid)> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;

            let packet = match Packet::parse(&buf[..n]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(from = %from, error = %e, "discarding malformed datagram");
                    continue;
                }
            };

            if packet.header.kind != PacketKind::Hello
                || packet.header.stream != self.session.stream
            {
                trace!(from = %from, "ignoring non-handshake packet while handshaking");
                continue;
            }

            match ControlMessage::from_bytes(&packet.payload) {
                Ok(ControlMessage::Hello(hello)) => {
                    if hello.version != PROTOCOL_VERSION {
                        warn!(
                            from = %from,
                            peer_version = %hello.version,
                            "rejecting handshake with mismatched protocol version"
                        );
                        continue;
                    }
                    return Ok((from, hello.session_id));
                }
                Ok(_) | Err(_) => {
                    warn!(from = %from, "handshake packet with invalid body");
                    continue;
                }
            }
        }
    }

    /// Read datagrams until the HelloAck echoing our session id arrives.
    async fn await_hello_ack(
        &self,
        socket: &UdpSocket,
        session_id: Uuid,
    ) -> TransportResult<SocketAddr> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;

            let packet = match Packet::parse(&buf[..n]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(from = %from, error = %e, "discarding malformed datagram");
                    continue;
                }
            };

            if packet.header.kind != PacketKind::HelloAck
                || packet.header.stream != self.session.stream
            {
                continue;
            }

            match ControlMessage::from_bytes(&packet.payload) {
                Ok(ControlMessage::HelloAck(ack)) if ack.session_id == session_id => {
                    return Ok(from);
                }
                Ok(_) => {
                    trace!(from = %from, "acknowledgment for a different session, ignoring");
                }
                Err(e) => {
                    warn!(from = %from, error = %e, "acknowledgment with invalid body");
                }
            }
        }
    }

    async fn run_established(
        &mut self,
        socket: &UdpSocket,
        peer: SocketAddr,
    ) -> TransportResult<()> {
        let packetizer = Packetizer::new(self.config.max_segment_size);
        let mut reassembler = Reassembler::new(
            self.config.reassembly_max_entries.max(1),
            self.config.reassembly_timeout(),
        );
        let mut link = LinkHealth::new(self.config.keepalive_timeout());
        let mut keepalive = interval(self.config.keepalive_interval());
        let mut recv_buf = vec![0u8; self.config.recv_buffer_size];

        let mut frame_rx = match self.frame_rx.take() {
            Some(frame_rx) => frame_rx,
            None => {
                return Err(TransportError::InvalidSessionState {
                    state: "already running".to_string(),
                })
            }
        };
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.send_bye(socket, peer, ByeReason::Shutdown).await;
                    return Ok(());
                }

                maybe_lease = frame_rx.recv() => {
                    match maybe_lease {
                        Some(lease) => self.send_frame(socket, peer, &packetizer, lease).await,
                        // All handles dropped; nothing can feed this
                        // session anymore.
                        None => return Ok(()),
                    }
                }

                received = socket.recv_from(&mut recv_buf) => {
                    let (n, from) = received?;
                    let keep_running = self
                        .handle_datagram(socket, &recv_buf[..n], from, peer, &mut reassembler, &mut link)
                        .await?;
                    if !keep_running {
                        return Ok(());
                    }
                }

                _ = keepalive.tick() => {
                    if link.is_expired() {
                        let silent_ms = link.silent_for().as_millis() as u64;
                        warn!(
                            stream = %self.session.stream,
                            silent_ms = silent_ms,
                            "peer silent past keepalive window, closing session"
                        );
                        self.send_bye(socket, peer, ByeReason::Timeout).await;
                        return Err(TransportError::PeerTimeout { silent_ms });
                    }

                    let wire = Packet::keepalive(self.session.stream).serialize();
                    if let Err(e) = socket.send_to(&wire, peer).await {
                        warn!(error = %e, "keepalive send failed");
                    } else {
                        self.session.stats.keepalives_sent += 1;
                        self.session.stats.packets_sent += 1;
                    }

                    let swept = reassembler.sweep_expired();
                    if swept > 0 {
                        debug!(
                            stream = %self.session.stream,
                            dropped = swept,
                            "dropped incomplete frames past reassembly timeout"
                        );
                    }
                }
            }
        }
    }

    /// Packetize and transmit one leased frame, then release the lease.
    async fn send_frame(
        &mut self,
        socket: &UdpSocket,
        peer: SocketAddr,
        packetizer: &Packetizer,
        lease: FrameLease,
    ) {
        let frame_id = self.session.next_frame_id();

        let packets = packetizer.packetize(self.session.stream, frame_id, lease.payload());
        // Every byte is copied into wire buffers by now (or the frame was
        // rejected); either way the caller gets the buffer back here.
        lease.release();

        let packets = match packets {
            Ok(packets) => packets,
            Err(e) => {
                warn!(
                    stream = %self.session.stream,
                    frame_id = frame_id,
                    error = %e,
                    "frame not packetizable, dropped"
                );
                return;
            }
        };

        let fragment_count = packets.len();
        for packet in packets {
            let wire = packet.serialize();
            match socket.send_to(&wire, peer).await {
                Ok(sent) => {
                    self.session.stats.packets_sent += 1;
                    self.session.stats.bytes_sent += sent as u64;
                }
                Err(e) => {
                    // Best-effort media: losing the tail of one frame is
                    // recoverable, resending stale fragments is not.
                    warn!(
                        stream = %self.session.stream,
                        frame_id = frame_id,
                        error = %e,
                        "fragment send failed, dropping rest of frame"
                    );
                    return;
                }
            }
        }

        self.session.stats.frames_sent += 1;
        trace!(
            stream = %self.session.stream,
            frame_id = frame_id,
            fragments = fragment_count,
            "frame transmitted"
        );
    }

    /// Dispatch one received datagram; false means the session is over.
    async fn handle_datagram(
        &mut self,
        socket: &UdpSocket,
        data: &[u8],
        from: SocketAddr,
        peer: SocketAddr,
        reassembler: &mut Reassembler,
        link: &mut LinkHealth,
    ) -> TransportResult<bool> {
        if from != peer {
            debug!(from = %from, "ignoring datagram from unexpected address");
            return Ok(true);
        }

        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(from = %from, error = %e, "discarding malformed datagram");
                return Ok(true);
            }
        };

        if packet.header.stream != self.session.stream {
            trace!("ignoring packet for another stream type");
            return Ok(true);
        }

        link.record_peer_activity();
        self.session.stats.packets_received += 1;
        self.session.stats.bytes_received += packet.payload.len() as u64;

        match packet.header.kind {
            PacketKind::Data => {
                let frame_id = packet.header.frame_id;
                match reassembler.accept(&packet) {
                    Ok(Some(frame)) => {
                        self.session.stats.frames_delivered += 1;
                        self.sink.deliver(self.session.stream, frame_id, frame).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(frame_id = frame_id, error = %e, "reassembly error");
                    }
                }
            }
            PacketKind::Keepalive => {
                self.session.stats.keepalives_received += 1;
            }
            PacketKind::Bye => {
                let reason = match ControlMessage::from_bytes(&packet.payload) {
                    Ok(ControlMessage::Bye(bye)) => format!("{:?}", bye.reason),
                    _ => "unknown".to_string(),
                };
                info!(
                    stream = %self.session.stream,
                    reason = %reason,
                    "peer closed the session"
                );
                return Ok(false);
            }
            PacketKind::Hello => {
                // The client repeats Hello when our acknowledgment got
                // lost; answer again or it can never establish.
                if self.session.role == SessionRole::Host {
                    if let Ok(ControlMessage::Hello(hello)) =
                        ControlMessage::from_bytes(&packet.payload)
                    {
                        let ack = ControlMessage::HelloAck(HelloAck {
                            session_id: hello.session_id,
                            version: PROTOCOL_VERSION.to_string(),
                        });
                        let wire = Packet::control(self.session.stream, &ack)?.serialize();
                        if let Err(e) = socket.send_to(&wire, from).await {
                            warn!(error = %e, "re-acknowledgment send failed");
                        }
                    }
                }
            }
            PacketKind::HelloAck => {
                trace!("late handshake acknowledgment ignored");
            }
        }

        Ok(true)
    }

    async fn send_bye(&mut self, socket: &UdpSocket, peer: SocketAddr, reason: ByeReason) {
        let bye = ControlMessage::Bye(Bye { reason });
        match Packet::control(self.session.stream, &bye) {
            Ok(packet) => {
                if let Err(e) = socket.send_to(&packet.serialize(), peer).await {
                    debug!(error = %e, "teardown notice not sent");
                } else {
                    self.session.stats.packets_sent += 1;
                }
            }
            Err(e) => debug!(error = %e, "teardown notice not encodable"),
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.config.handshake_max_retries,
            initial_delay_ms: self.config.handshake_initial_delay_ms,
            max_delay_ms: self.config.handshake_max_delay_ms,
            ..RetryConfig::default()
        }
    }
}
