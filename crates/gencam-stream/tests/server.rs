//! End-to-end scenarios against a real WebSocket client and the mock
//! camera fleet. Each test gets its own fake device index and an ephemeral
//! port so the tests can run in parallel.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};

use gencam::mock::{self, MockDevice};
use gencam::{BackendKind, PixelFormat};
use gencam_stream::{StreamConfig, StreamServer, StreamingStatus};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config(camera_index: u32) -> StreamConfig {
    StreamConfig {
        camera_index,
        backend: BackendKind::Mock,
        debayer: false,
        ..StreamConfig::default()
    }
}

fn spawn_server(config: StreamConfig) -> StreamServer {
    let _ = tracing_subscriber::fmt::try_init();
    StreamServer::spawn(config, 0).expect("spawn failed")
}

async fn connect(server: &StreamServer) -> Client {
    let uri = format!("ws://127.0.0.1:{}", server.local_addr().port());
    let (client, _response) = ClientBuilder::from_uri(uri.parse().unwrap())
        .connect()
        .await
        .expect("connect failed");
    client
}

async fn send_text(client: &mut Client, text: &str) {
    client
        .send(Message::text(text.to_string()))
        .await
        .expect("send failed");
}

/// Next text reply, skipping interleaved binary frames.
async fn next_text(client: &mut Client) -> String {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for text")
            .expect("connection closed")
            .expect("connection error");
        if let Some(text) = message.as_text() {
            return text.to_string();
        }
    }
}

/// Next binary frame, skipping interleaved text replies.
async fn next_binary(client: &mut Client) -> Vec<u8> {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("connection error");
        if message.is_binary() {
            return message.into_payload().to_vec();
        }
    }
}

async fn collect_frames(client: &mut Client, n: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(n);
    for _ in 0..n {
        frames.push(next_binary(client).await);
    }
    frames
}

/// Read until a close frame arrives, returning its code and reason.
async fn next_close(client: &mut Client, wait: Duration) -> (u16, String) {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = timeout(remaining, client.next())
            .await
            .expect("timed out waiting for close")
            .expect("connection ended without a close frame")
            .expect("connection error");
        if message.is_close() {
            let (code, reason) = message.as_close().expect("malformed close frame");
            return (u16::from(code), reason.to_string());
        }
    }
}

#[tokio::test]
async fn idle_then_streaming_on_start() {
    mock::install(200, MockDevice::default());
    let server = spawn_server(test_config(200));

    let mut client = connect(&server).await;
    send_text(&mut client, "status").await;
    let reply = next_text(&mut client).await;
    assert!(
        ["idle", "starting", "not streaming"].contains(&reply.as_str()),
        "unexpected status before start: {reply:?}"
    );

    let started = Instant::now();
    send_text(&mut client, "start").await;
    let frame = next_binary(&mut client).await;
    assert!(!frame.is_empty());
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "first frame took {:?}",
        started.elapsed()
    );

    send_text(&mut client, "status").await;
    let reply = next_text(&mut client).await;
    assert!(reply.starts_with("streaming to"), "got {reply:?}");
}

#[tokio::test]
async fn fanout_sends_identical_bytes_to_every_subscriber() {
    mock::install(201, MockDevice::default());
    let server = spawn_server(test_config(201));

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    send_text(&mut a, "start").await;
    send_text(&mut b, "start").await;

    let (frames_a, frames_b) =
        tokio::join!(collect_frames(&mut a, 15), collect_frames(&mut b, 15));

    // B subscribed after A, so align on B's first frame and require a long
    // byte-identical overlap in the same order.
    let offset = frames_a
        .iter()
        .position(|frame| frame == &frames_b[0])
        .expect("subscribers observed disjoint frame sets");
    let overlap: usize = frames_a.len() - offset;
    assert!(overlap >= 10, "only {overlap} overlapping frames");
    for i in 0..overlap {
        assert_eq!(frames_a[offset + i], frames_b[i], "frame {i} diverged");
    }
}

#[tokio::test]
async fn slow_subscriber_is_closed_with_queue_full() {
    // Uncompressed colour frames large enough to fill the socket buffers
    // once the client stops reading.
    mock::install(
        202,
        MockDevice {
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::BayerBG8,
            ..MockDevice::default()
        },
    );
    let mut config = test_config(202);
    config.debayer = true;
    config.max_queue = 2;
    config.compression_ext = ".bmp".into();
    let server = spawn_server(config);

    let mut client = connect(&server).await;
    send_text(&mut client, "start").await;

    // Do not read anything; let the producer hit the queue limit.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let (code, reason) = next_close(&mut client, Duration::from_secs(10)).await;
    assert_eq!(code, 1011);
    assert_eq!(reason, "queue full");
}

#[tokio::test]
async fn camera_in_use_recovers_once_the_device_frees_up() {
    mock::install(
        203,
        MockDevice {
            fail_open_in_use: 3,
            ..MockDevice::default()
        },
    );
    let server = spawn_server(test_config(203));

    let mut client = connect(&server).await;
    send_text(&mut client, "start").await;

    let mut saw_in_use = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if server.status() == StreamingStatus::ErrorCaptureInUse {
            saw_in_use = true;
        }
        if server.status() == StreamingStatus::Streaming {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_in_use, "never observed the capture-in-use status");

    send_text(&mut client, "status").await;
    let reply = next_text(&mut client).await;
    assert!(reply.starts_with("streaming to"), "got {reply:?}");
    let frame = next_binary(&mut client).await;
    assert!(!frame.is_empty());
}

#[tokio::test]
async fn idle_teardown_releases_the_camera() {
    let counters = mock::install(204, MockDevice::default());
    let server = spawn_server(test_config(204));

    let mut client = connect(&server).await;
    send_text(&mut client, "start").await;
    let _ = next_binary(&mut client).await;

    send_text(&mut client, "stop").await;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if server.status() == StreamingStatus::Idle && counters.releases() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.status(), StreamingStatus::Idle);
    assert!(counters.releases() > 0, "camera was never released");
    assert_eq!(server.subscriber_count(), 0);
}

#[tokio::test]
async fn double_start_keeps_set_semantics() {
    mock::install(205, MockDevice::default());
    let server = spawn_server(test_config(205));

    let mut client = connect(&server).await;
    send_text(&mut client, "start").await;
    send_text(&mut client, "start").await;
    let _ = next_binary(&mut client).await;
    assert_eq!(server.subscriber_count(), 1);
}

#[tokio::test]
async fn graceful_shutdown_closes_every_connection() {
    mock::install(206, MockDevice::default());
    let mut server = spawn_server(test_config(206));

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    send_text(&mut a, "start").await;
    send_text(&mut b, "start").await;
    let _ = next_binary(&mut a).await;
    let _ = next_binary(&mut b).await;

    let stopping = Instant::now();
    server.stop();
    assert!(
        stopping.elapsed() < Duration::from_secs(3),
        "stop took {:?}",
        stopping.elapsed()
    );

    let (code, reason) = next_close(&mut a, Duration::from_secs(2)).await;
    assert_eq!((code, reason.as_str()), (1001, "shutdown"));
    let (code, reason) = next_close(&mut b, Duration::from_secs(2)).await;
    assert_eq!((code, reason.as_str()), (1001, "shutdown"));
}

#[tokio::test]
async fn bayer_stream_survives_the_encode_path() {
    mock::install(
        207,
        MockDevice {
            pixel_format: PixelFormat::BayerBG8,
            ..MockDevice::default()
        },
    );
    let mut config = test_config(207);
    config.debayer = true;
    let server = spawn_server(config);

    let mut client = connect(&server).await;
    send_text(&mut client, "start").await;
    let frame = next_binary(&mut client).await;
    // JPEG magic, colour path included.
    assert_eq!(&frame[..2], &[0xFF, 0xD8]);
}
