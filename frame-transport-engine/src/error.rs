//! Error types for the frame transport engine
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


use thiserror::Error;

/// Result type for transport engine operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in the transport engine
#[derive(Error, Debug)]
pub enum TransportError {
    /// Wire packet parsing error
    #[error("packet parse error: {0}")]
    PacketParse(String),

    /// Invalid frame submitted by the caller
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Handshake failed after exhausting the retry budget
    #[error("handshake failed for {stream}: {reason}")]
    HandshakeFailed { stream: String, reason: String },

    /// Operation attempted in the wrong session state
    #[error("invalid session state: {state}")]
    InvalidSessionState { state: String },

    /// A session for this stream type is already running
    #[error("session already active for stream: {stream}")]
    SessionExists { stream: String },

    /// Peer went silent past the keepalive window
    #[error("peer timed out after {silent_ms} ms of silence")]
    PeerTimeout { silent_ms: u64 },

    /// Reassembly error
    #[error("reassembly error: {0}")]
    Reassembly(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Runtime is shutting down
    #[error("transport shutting down")]
    ShuttingDown,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}
