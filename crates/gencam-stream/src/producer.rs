//! Producer thread: the single owner of the camera.
//!
//! Opens the camera only while subscribers exist, reads and encodes one
//! frame per tick, and fans the shared payload out to every subscriber with
//! per-connection backpressure. Open failures never kill the thread, they
//! park it until the next wake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

use gencam::{Capture, Frame, Property};

use crate::config::StreamConfig;
use crate::encode::encode_frame;
use crate::registry::{CloseCommand, SubscriberRegistry};
use crate::status::{StatusCell, StreamingStatus};

/// Delay between camera-open retries while in an error state. Subscriber
/// changes and shutdown cut it short through the registry condvar.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Close sent to a connection whose outbound queue hit the limit.
pub(crate) const CLOSE_QUEUE_FULL: CloseCommand = CloseCommand {
    code: 1011,
    reason: "queue full",
};

/// State shared between the producer, connection tasks and `stop()`.
pub(crate) struct ProducerShared {
    pub(crate) registry: SubscriberRegistry,
    pub(crate) status: StatusCell,
    pub(crate) stop: AtomicBool,
}

impl ProducerShared {
    pub(crate) fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            status: StatusCell::new(),
            stop: AtomicBool::new(false),
        }
    }
}

pub(crate) fn spawn_producer(
    config: StreamConfig,
    shared: Arc<ProducerShared>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("stream-producer".into())
        .spawn(move || run(config, shared))
        .expect("failed to spawn producer thread")
}

fn run(config: StreamConfig, shared: Arc<ProducerShared>) {
    let mut capture = Capture::new(config.debayer, config.buffer_timeout_ms);
    let mut frame = Frame::default();

    shared.status.store(StreamingStatus::Starting);

    while !shared.stop.load(Ordering::SeqCst) {
        if shared.registry.is_empty() {
            if shared.status.load() != StreamingStatus::Idle {
                info!("producer idle, releasing camera");
            }
            shared.status.store(StreamingStatus::Idle);
            capture.release();
            shared
                .registry
                .park_while_empty(&shared.stop, Duration::from_millis(200));
            continue;
        }

        if !capture.is_opened() {
            match capture.open(config.camera_index as i32, config.backend) {
                Ok(_) => {
                    info!(index = config.camera_index, backend = %config.backend, "opened camera");
                    configure_camera(&mut capture, &config);
                }
                Err(err) if err.is_device_in_use() => {
                    warn!(error = %err, "camera is in use, will retry");
                    shared.status.store(StreamingStatus::ErrorCaptureInUse);
                    shared.registry.retry_delay(&shared.stop, OPEN_RETRY_DELAY);
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "opening camera failed, will retry");
                    shared.status.store(StreamingStatus::ErrorUnknown);
                    shared.registry.retry_delay(&shared.stop, OPEN_RETRY_DELAY);
                    continue;
                }
            }
        }

        shared.status.store(StreamingStatus::Streaming);

        match capture.read(&mut frame) {
            Ok(true) if !frame.is_empty() => {}
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "frame read failed, skipping tick");
                continue;
            }
        }

        let payload = match encode_frame(&frame, &config.compression_ext) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                warn!(error = %err, "frame encoding failed, skipping tick");
                continue;
            }
        };
        metrics::counter!("stream_frames_encoded_total").increment(1);

        fan_out(&shared.registry, &payload);
        metrics::gauge!("stream_subscribers").set(shared.registry.len() as f64);
    }

    capture.release();
    info!("producer stopped");
}

/// Apply the post-open camera setup. Refusals are logged, never fatal.
fn configure_camera(capture: &mut Capture, config: &StreamConfig) {
    if let Err(err) = capture.set(Property::Fps, config.target_fps) {
        warn!(error = %err, "setting frame-rate target failed");
    }
    if let Err(err) = capture.set(Property::AutoExposure, 1.0) {
        warn!(error = %err, "enabling auto-exposure failed");
    }
    if let Some(pin) = config.trigger_pin {
        if let Err(err) = capture.set(Property::Trigger, f64::from(pin)) {
            warn!(error = %err, pin, "enabling trigger failed");
        }
    }
    if config.line_enable {
        if let Err(err) = capture.set(Property::Line, 1.0) {
            warn!(error = %err, "enabling line supply failed");
        }
    }
}

/// Send one encoded frame to every subscriber of this tick.
fn fan_out(registry: &SubscriberRegistry, payload: &Bytes) {
    for (id, subscriber) in registry.snapshot() {
        if subscriber.frames.is_closed() {
            registry.remove(id);
            metrics::counter!("stream_subscribers_dropped_total", "reason" => "closed")
                .increment(1);
            continue;
        }
        match subscriber.frames.try_send(payload.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = id, "outbound queue full, dropping subscriber");
                let _ = subscriber.control.send(CLOSE_QUEUE_FULL);
                registry.remove(id);
                metrics::counter!("stream_subscribers_dropped_total", "reason" => "queue_full")
                    .increment(1);
            }
            Err(TrySendError::Closed(_)) => {
                registry.remove(id);
                metrics::counter!("stream_subscribers_dropped_total", "reason" => "closed")
                    .increment(1);
            }
        }
    }
}
