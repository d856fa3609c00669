//! End-to-end session tests over loopback UDP

use async_trait::async_trait;
use bytes::Bytes;
use frame_transport_engine::{
    FrameLease, FrameSink, LogSink, SessionHandle, SessionRole, SessionState, StreamType,
    TransportResult, TransportRuntime,
};
use framelink_config::TransportConfig;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
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

fn counted_lease(buffer: &[u8], counter: &Arc<AtomicUsize>) -> FrameLease {
    unsafe {
        FrameLease::new(
            buffer.as_ptr(),
            buffer.len(),
            Arc::as_ptr(counter) as *mut c_void,
            count_release,
        )
    }
}

fn fast_config() -> TransportConfig {
    TransportConfig {
        handshake_timeout_ms: 250,
        handshake_initial_delay_ms: 50,
        handshake_max_delay_ms: 400,
        keepalive_interval_ms: 100,
        keepalive_timeout_ms: 800,
        ..TransportConfig::default()
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

struct Pair {
    host: Arc<SessionHandle>,
    client: Arc<SessionHandle>,
    host_task: JoinHandle<TransportResult<()>>,
    client_task: JoinHandle<TransportResult<()>>,
}

/// Stand up an established host/client pair on loopback.
async fn establish_pair(
    stream: StreamType,
    host_sink: Arc<dyn FrameSink>,
    client_sink: Arc<dyn FrameSink>,
) -> Pair {
    let (host_rt, host) = TransportRuntime::new(
        SessionRole::Host,
        stream,
        "127.0.0.1:0".parse().unwrap(),
        fast_config(),
        host_sink,
    );
    let host_task = tokio::spawn(host_rt.run());

    wait_until("host socket bind", || host.local_addr().is_some()).await;
    let host_addr = host.local_addr().unwrap();

    let (client_rt, client) = TransportRuntime::new(
        SessionRole::Client,
        stream,
        host_addr,
        fast_config(),
        client_sink,
    );
    let client_task = tokio::spawn(client_rt.run());

    wait_until("handshake", || {
        host.is_established() && client.is_established()
    })
    .await;

    Pair {
        host,
        client,
        host_task,
        client_task,
    }
}

#[tokio::test]
async fn test_video_round_trip_client_to_host() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let pair = establish_pair(
        StreamType::Video,
        Arc::new(TestSink { tx: frames_tx }),
        Arc::new(LogSink),
    )
    .await;

    // 5000 bytes at the default 1200-byte segment size: five fragments.
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let releases = Arc::new(AtomicUsize::new(0));

    assert!(pair.client.submit_frame(counted_lease(&payload, &releases)));

    let (stream, frame_id, delivered) = timeout(Duration::from_secs(5), frames_rx.recv())
        .await
        .expect("delivery deadline")
        .expect("sink channel open");

    assert_eq!(stream, StreamType::Video);
    assert_eq!(frame_id, 1);
    assert_eq!(delivered.len(), 5000);
    assert_eq!(&delivered[..], payload.as_slice());

    wait_until("lease release", || releases.load(Ordering::SeqCst) == 1).await;

    pair.client.shutdown();
    pair.host.shutdown();
    assert!(pair.client_task.await.unwrap().is_ok());
    assert!(pair.host_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_host_to_client_direction() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let pair = establish_pair(
        StreamType::Audio,
        Arc::new(LogSink),
        Arc::new(TestSink { tx: frames_tx }),
    )
    .await;

    let payload = vec![0x5Au8; 640];
    let releases = Arc::new(AtomicUsize::new(0));

    assert!(pair.host.submit_frame(counted_lease(&payload, &releases)));

    let (stream, frame_id, delivered) = timeout(Duration::from_secs(5), frames_rx.recv())
        .await
        .expect("delivery deadline")
        .expect("sink channel open");

    assert_eq!(stream, StreamType::Audio);
    assert_eq!(frame_id, 1);
    assert_eq!(&delivered[..], payload.as_slice());

    wait_until("lease release", || releases.load(Ordering::SeqCst) == 1).await;

    pair.host.shutdown();
    pair.client.shutdown();
    let _ = pair.host_task.await.unwrap();
    let _ = pair.client_task.await.unwrap();
}

#[tokio::test]
async fn test_audio_and_video_streams_stay_separate() {
    let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
    let (video_tx, mut video_rx) = mpsc::unbounded_channel();

    let audio = establish_pair(
        StreamType::Audio,
        Arc::new(TestSink { tx: audio_tx }),
        Arc::new(LogSink),
    )
    .await;
    let video = establish_pair(
        StreamType::Video,
        Arc::new(TestSink { tx: video_tx }),
        Arc::new(LogSink),
    )
    .await;

    let audio_payload = vec![0xAAu8; 320];
    let video_payload = vec![0xBBu8; 2500];
    let releases = Arc::new(AtomicUsize::new(0));

    assert!(audio
        .client
        .submit_frame(counted_lease(&audio_payload, &releases)));
    assert!(video
        .client
        .submit_frame(counted_lease(&video_payload, &releases)));

    let (stream, _, delivered) = timeout(Duration::from_secs(5), audio_rx.recv())
        .await
        .expect("audio delivery deadline")
        .expect("audio sink open");
    assert_eq!(stream, StreamType::Audio);
    assert_eq!(&delivered[..], audio_payload.as_slice());

    let (stream, _, delivered) = timeout(Duration::from_secs(5), video_rx.recv())
        .await
        .expect("video delivery deadline")
        .expect("video sink open");
    assert_eq!(stream, StreamType::Video);
    assert_eq!(&delivered[..], video_payload.as_slice());

    // One frame each; nothing leaked across stream types.
    assert!(audio_rx.try_recv().is_err());
    assert!(video_rx.try_recv().is_err());

    wait_until("lease releases", || releases.load(Ordering::SeqCst) == 2).await;

    for pair in [audio, video] {
        pair.host.shutdown();
        pair.client.shutdown();
        let _ = pair.host_task.await.unwrap();
        let _ = pair.client_task.await.unwrap();
    }
}

#[tokio::test]
async fn test_peer_silence_closes_session() {
    let pair = establish_pair(StreamType::Video, Arc::new(LogSink), Arc::new(LogSink)).await;

    // The host vanishes without a teardown notice; only keepalive expiry
    // can end the client session.
    pair.host_task.abort();

    wait_until("client close", || {
        pair.client.state() == SessionState::Closed
    })
    .await;
    assert!(pair.client_task.await.unwrap().is_err());

    // A session that died must fail submissions fast, releasing the
    // buffer before reporting failure.
    let payload = vec![1u8; 100];
    let releases = Arc::new(AtomicUsize::new(0));
    assert!(!pair.client.submit_frame(counted_lease(&payload, &releases)));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_gives_up_when_nobody_answers() {
    // Reserve a port, then close it so the dial target is dark.
    let dark_addr = {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    };

    let (client_rt, client) = TransportRuntime::new(
        SessionRole::Client,
        StreamType::Audio,
        dark_addr,
        fast_config(),
        Arc::new(LogSink),
    );

    let result = timeout(Duration::from_secs(30), client_rt.run())
        .await
        .expect("handshake budget is bounded");
    assert!(result.is_err());
    assert_eq!(client.state(), SessionState::Closed);
}
