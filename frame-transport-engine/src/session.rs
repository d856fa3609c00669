//! Session state for one stream type
//!
//! A session is the conversation between host and client for exactly one
//! stream type: role, handshake progress, the outgoing frame-id sequence
//! and peer liveness. The transport runtime owns the session and is the
//! only writer; everything here is plain state plus the handshake retry
//! schedule.
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


use crate::packet::StreamType;
use rand::Rng;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Endpoint role in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Listens and acknowledges
    Host,
    /// Dials and requests
    Client,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Host => write!(f, "host"),
            SessionRole::Client => write!(f, "client"),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no network activity yet
    Idle,
    /// Handshake in flight
    Handshaking,
    /// Frames may flow
    Established,
    /// Torn down; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Established => write!(f, "established"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Handshake retry schedule with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry budget after the first attempt
    pub max_retries: u32,
    /// First retry delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Base delay before a given retry attempt (attempt 0 is immediate)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay_ms = (self.initial_delay_ms as f64) * self.multiplier.powi((attempt - 1) as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64) as u64;

        Duration::from_millis(delay_ms)
    }

    /// Base delay plus up to 20% random jitter
    ///
    /// Both endpoints retry on similar schedules; the jitter keeps their
    /// probes from landing in lockstep.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter_cap = base.as_millis() as u64 / 5;
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

/// Peer liveness tracking
///
/// Any packet from the peer counts as activity; keepalives exist so the
/// window refreshes even when no media flows.
#[derive(Debug)]
pub struct LinkHealth {
    last_peer_activity: Instant,
    keepalive_timeout: Duration,
}

impl LinkHealth {
    pub fn new(keepalive_timeout: Duration) -> Self {
        LinkHealth {
            last_peer_activity: Instant::now(),
            keepalive_timeout,
        }
    }

    /// Record that the peer was heard from
    pub fn record_peer_activity(&mut self) {
        self.last_peer_activity = Instant::now();
    }

    /// Time since the peer was last heard from
    pub fn silent_for(&self) -> Duration {
        self.last_peer_activity.elapsed()
    }

    /// True once the silence window exceeds the keepalive timeout
    pub fn is_expired(&self) -> bool {
        self.silent_for() > self.keepalive_timeout
    }
}

/// Per-session traffic counters
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_received: u64,
    /// Bytes sent (payload bytes on the wire)
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Frames accepted for transmission
    pub frames_sent: u64,
    /// Complete frames delivered to the sink
    pub frames_delivered: u64,
    /// Keepalives sent
    pub keepalives_sent: u64,
    /// Keepalives received
    pub keepalives_received: u64,
}

/// State for one (role, stream type) conversation
pub struct Session {
    /// Endpoint role
    pub role: SessionRole,
    /// Stream type this session carries
    pub stream: StreamType,
    /// Session id agreed during the handshake
    pub session_id: Option<Uuid>,
    /// Peer address once known
    pub peer_addr: Option<SocketAddr>,
    /// Lifecycle state
    state: SessionState,
    /// Next outgoing frame id
    next_frame_id: u32,
    /// Traffic counters
    pub stats: SessionStats,
}

impl Session {
    /// Create an idle session
    pub fn new(role: SessionRole, stream: StreamType) -> Self {
        Session {
            role,
            stream,
            session_id: None,
            peer_addr: None,
            state: SessionState::Idle,
            next_frame_id: 0,
            stats: SessionStats::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transition to a new state
    pub fn set_state(&mut self, state: SessionState) {
        if state != self.state {
            debug!(
                stream = %self.stream,
                role = %self.role,
                from = %self.state,
                to = %state,
                "session state transition"
            );
            self.state = state;
        }
    }

    /// Allocate the next outgoing frame id (starts at 1)
    pub fn next_frame_id(&mut self) -> u32 {
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        self.next_frame_id
    }
}
