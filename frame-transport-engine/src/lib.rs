//! Real-time Frame Transport Engine
//!
//! This crate provides the frame transport core for live audio/video
//! sessions, including:
//! - Caller-owned frame buffer leasing with single-fire release
//! - Frame packetization over UDP-sized fragments
//! - Loss- and order-tolerant frame reassembly
//! - Host/client session handshake, keepalive and teardown
//! - A foreign-callable boundary for the embedding media application
//!
//! # Scope
//!
//! Capture, encoding, decoding and rendering live in the embedding
//! application; this crate moves opaque frames between two endpoints
//! with live-media semantics (recency over completeness, no
//! retransmission of stale frames).
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


pub mod error;
pub mod ffi;
pub mod frame_lease;
pub mod packet;
pub mod packetizer;
pub mod reassembler;
pub mod runtime;
pub mod session;
pub mod sink;

// Re-export main types
pub use error::{TransportError, TransportResult};
pub use ffi::{run_runtime_server, rust_send_frame, shutdown_stream};
pub use frame_lease::{FrameLease, ReleaseCallback};
pub use packet::{
    Bye, ByeReason, ControlMessage, Hello, HelloAck, Packet, PacketHeader, PacketKind,
    StreamType, PROTOCOL_VERSION,
};
pub use packetizer::Packetizer;
pub use reassembler::Reassembler;
pub use runtime::{SessionHandle, TransportRuntime};
pub use session::{
    LinkHealth, RetryConfig, Session, SessionRole, SessionState, SessionStats,
};
pub use sink::{FrameSink, LogSink};
