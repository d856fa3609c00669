//! Foreign boundary tests: exported calls driving a real session
//!
//! The host side runs through the exported blocking call on its own
//! thread, exactly as an embedding application would drive it; the
//! client side uses the library API so both roles can live in one test
//! process (the exported surface allows one session per stream type).

use async_trait::async_trait;
use bytes::Bytes;
use frame_transport_engine::{
    run_runtime_server, rust_send_frame, shutdown_stream, FrameSink, SessionRole, StreamType,
    TransportRuntime,
};
use framelink_config::TransportConfig;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct TestSink {
    tx: mpsc::UnboundedSender<(StreamType, u32, Bytes)>,
}

#[async_trait]
impl FrameSink for TestSink {
    async fn deliver(&self, stream: StreamType, frame_id: u32, payload: Bytes) {
        let _ = self.tx.send((stream, frame_id, payload));
    }
}

extern "C" fn count_release(context: *mut c_void) {
    let counter = unsafe { &*(context as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_exported_host_serves_a_library_client() {
    let addr_text = format!("127.0.0.1:{}", free_udp_port());

    let host_thread = std::thread::spawn({
        let addr_text = addr_text.clone();
        move || {
            run_runtime_server(
                true,
                StreamType::Video,
                addr_text.as_ptr(),
                addr_text.len(),
            )
        }
    });

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let (client_rt, _client) = TransportRuntime::new(
        SessionRole::Client,
        StreamType::Video,
        addr_text.parse().unwrap(),
        TransportConfig {
            handshake_timeout_ms: 250,
            handshake_initial_delay_ms: 50,
            handshake_max_delay_ms: 400,
            ..TransportConfig::default()
        },
        Arc::new(TestSink { tx: frames_tx }),
    );
    let client_task = tokio::spawn(client_rt.run());

    // Frames submitted through the exported call go out on the host's
    // session. Submissions before the handshake lands are rejected (and
    // released); poll until one is accepted.
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 249) as u8).collect();
    let releases = Arc::new(AtomicUsize::new(0));
    let context = Arc::as_ptr(&releases) as *mut c_void;

    let mut attempts: usize = 0;
    let accepted = loop {
        attempts += 1;
        if rust_send_frame(
            payload.as_ptr(),
            payload.len(),
            StreamType::Video,
            context,
            count_release,
        ) {
            break true;
        }
        if attempts >= 100 {
            break false;
        }
        sleep(Duration::from_millis(100)).await;
    };
    assert!(accepted, "host session never accepted a frame");

    let (stream, _, delivered) = timeout(Duration::from_secs(10), frames_rx.recv())
        .await
        .expect("delivery deadline")
        .expect("sink channel open");
    assert_eq!(stream, StreamType::Video);
    assert_eq!(&delivered[..], payload.as_slice());

    // Every submission, accepted or rejected, released its lease.
    timeout(Duration::from_secs(5), async {
        while releases.load(Ordering::SeqCst) != attempts {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all leases released");

    // The Rust-visible shutdown ends the exported blocking call.
    assert!(shutdown_stream(StreamType::Video));
    host_thread.join().unwrap();

    // The host's teardown notice ends the client cleanly too.
    let client_result = timeout(Duration::from_secs(5), client_task)
        .await
        .expect("client exit deadline")
        .unwrap();
    assert!(client_result.is_ok());
}
