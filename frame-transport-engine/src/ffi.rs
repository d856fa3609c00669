//! Foreign-callable boundary
//!
//! The embedding application (capture/render side) drives the transport
//! through two exported calls: `run_runtime_server` stands up and runs a
//! session for one stream type, `rust_send_frame` submits a single frame
//! with callback-managed buffer ownership. Everything else in the crate
//! is reachable as a normal Rust library.
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


use crate::frame_lease::{FrameLease, ReleaseCallback};
use crate::packet::StreamType;
use crate::runtime::{SessionHandle, TransportRuntime};
use crate::session::{SessionRole, SessionState};
use crate::sink::LogSink;
use anyhow::Context;
use framelink_config::TransportConfig;
use std::ffi::c_void;
use std::net::SocketAddr;
use std::slice;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::runtime::Runtime;
use tracing::{error, warn};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| Runtime::new().expect("tokio runtime creation failed"))
}

/// Fixed mapping from stream type to its (at most one) live session
///
/// Two stream types, two slots; never a dynamic registry.
struct SessionTable {
    slots: [Mutex<Option<Arc<SessionHandle>>>; StreamType::COUNT],
}

impl SessionTable {
    const fn new() -> Self {
        SessionTable {
            slots: [Mutex::new(None), Mutex::new(None)],
        }
    }

    fn get(&self, stream: StreamType) -> Option<Arc<SessionHandle>> {
        self.slots[stream.index()]
            .lock()
            .expect("session slot lock poisoned")
            .clone()
    }

    /// Claim the slot; a live (non-closed) occupant wins over the newcomer
    fn register(&self, stream: StreamType, handle: Arc<SessionHandle>) -> bool {
        let mut slot = self.slots[stream.index()]
            .lock()
            .expect("session slot lock poisoned");

        if let Some(existing) = slot.as_ref() {
            if existing.state() != SessionState::Closed {
                return false;
            }
        }

        *slot = Some(handle);
        true
    }

    /// Vacate the slot, but only if it still holds this session
    fn clear(&self, stream: StreamType, handle: &Arc<SessionHandle>) {
        let mut slot = self.slots[stream.index()]
            .lock()
            .expect("session slot lock poisoned");

        if let Some(existing) = slot.as_ref() {
            if Arc::ptr_eq(existing, handle) {
                *slot = None;
            }
        }
    }
}

static SESSIONS: SessionTable = SessionTable::new();

/// Submit one frame for transmission on an established session
///
/// Non-blocking. Returns true once the frame is accepted for
/// transmission (best-effort delivery, no retransmission of stale
/// frames). `release_callback` fires with `context` exactly once on
/// every path, success or failure, and never before the transport has
/// finished reading the buffer.
#[no_mangle]
pub extern "C" fn rust_send_frame(
    data: *const u8,
    len: usize,
    stream: StreamType,
    context: *mut c_void,
    release_callback: ReleaseCallback,
) -> bool {
    // Wrap the buffer first: from here on, every exit path releases it.
    let lease = unsafe { FrameLease::new(data, len, context, release_callback) };

    if data.is_null() || len == 0 {
        warn!(stream = %stream, "frame rejected: empty or null buffer");
        lease.release();
        return false;
    }

    let handle = match SESSIONS.get(stream) {
        Some(handle) => handle,
        None => {
            warn!(stream = %stream, "frame rejected: no session for stream");
            lease.release();
            return false;
        }
    };

    handle.submit_frame(lease)
}

/// Stand up and run a session for one stream type
///
/// Blocking: the call returns only on shutdown, peer teardown, keepalive
/// expiry or fatal failure. `host_addr` is length-delimited UTF-8 socket
/// address text: the address to bind when `is_host`, the address to
/// dial otherwise. Malformed address bytes are a caller contract
/// violation: the error is logged and the call returns without a
/// session. A second call for a stream type whose session is still live
/// is rejected the same way.
#[no_mangle]
pub extern "C" fn run_runtime_server(
    is_host: bool,
    stream: StreamType,
    host_addr: *const u8,
    host_addr_len: usize,
) {
    framelink_logging::try_init_console_logging("frame-transport-engine", "info");

    let addr_bytes: &[u8] = if host_addr.is_null() {
        &[]
    } else {
        unsafe { slice::from_raw_parts(host_addr, host_addr_len) }
    };

    if let Err(e) = run_server_blocking(is_host, stream, addr_bytes) {
        error!(
            stream = %stream,
            error = %format!("{:#}", e),
            "transport server terminated"
        );
    }
}

/// Request shutdown of the live session for a stream type
///
/// Rust-visible only (the exported surface stays at two calls); the
/// embedding crate and the tests use it to end `run_runtime_server`.
/// Returns false when no session is registered.
pub fn shutdown_stream(stream: StreamType) -> bool {
    match SESSIONS.get(stream) {
        Some(handle) => {
            handle.shutdown();
            true
        }
        None => false,
    }
}

fn run_server_blocking(
    is_host: bool,
    stream: StreamType,
    addr_bytes: &[u8],
) -> anyhow::Result<()> {
    let addr_text =
        std::str::from_utf8(addr_bytes).context("host address is not valid UTF-8")?;
    let addr: SocketAddr = addr_text
        .trim()
        .parse()
        .with_context(|| format!("host address {:?} is not a socket address", addr_text))?;

    let config = TransportConfig::from_env().context("loading transport configuration")?;

    let role = if is_host {
        SessionRole::Host
    } else {
        SessionRole::Client
    };

    let (transport, handle) = TransportRuntime::new(role, stream, addr, config, Arc::new(LogSink));

    if !SESSIONS.register(stream, handle.clone()) {
        return Err(crate::error::TransportError::SessionExists {
            stream: stream.to_string(),
        }
        .into());
    }

    let result = runtime().block_on(transport.run());

    SESSIONS.clear(stream, &handle);

    result.with_context(|| format!("session for stream {} failed", stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn count_release(context: *mut c_void) {
        let counter = unsafe { &*(context as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_send_frame_without_session_fails_and_releases() {
        let counter = AtomicUsize::new(0);
        let buffer = vec![7u8; 32];

        // No run_runtime_server call was made for audio in this test
        // binary, so the slot is empty.
        let accepted = rust_send_frame(
            buffer.as_ptr(),
            buffer.len(),
            StreamType::Audio,
            &counter as *const AtomicUsize as *mut c_void,
            count_release,
        );

        assert!(!accepted);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_frame_rejects_empty_buffer_but_releases() {
        let counter = AtomicUsize::new(0);
        let buffer = vec![7u8; 32];

        let accepted = rust_send_frame(
            buffer.as_ptr(),
            0,
            StreamType::Audio,
            &counter as *const AtomicUsize as *mut c_void,
            count_release,
        );

        assert!(!accepted);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_without_session_reports_false() {
        assert!(!shutdown_stream(StreamType::Audio));
    }

    #[test]
    fn test_malformed_address_returns_without_session() {
        // Caller contract violation: logged, no session stood up, call
        // returns promptly instead of blocking.
        run_runtime_server(false, StreamType::Audio, b"not an address".as_ptr(), 14);
        assert!(SESSIONS.get(StreamType::Audio).is_none());
    }
}
