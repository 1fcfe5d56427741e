//! Streaming status shared between the producer thread and the control
//! plane.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Producer state as reported to `status` requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamingStatus {
    /// Producer is running but nobody subscribed; the camera is released.
    Idle,
    /// Producer thread is coming up.
    Starting,
    /// Camera is open and frames are flowing.
    Streaming,
    /// Initial state before the producer ran its first iteration.
    NotStreaming,
    /// The camera is claimed by another process; retrying.
    ErrorCaptureInUse,
    /// Opening the camera failed for another reason; retrying.
    ErrorUnknown,
}

impl fmt::Display for StreamingStatus {
    /// Lowercase wire text returned to `status` requests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StreamingStatus::Idle => "idle",
            StreamingStatus::Starting => "starting",
            StreamingStatus::Streaming => "streaming",
            StreamingStatus::NotStreaming => "not streaming",
            StreamingStatus::ErrorCaptureInUse => "capture in use",
            StreamingStatus::ErrorUnknown => "unknown error",
        };
        f.write_str(text)
    }
}

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const STREAMING: u8 = 2;
const NOT_STREAMING: u8 = 3;
const ERROR_CAPTURE_IN_USE: u8 = 4;
const ERROR_UNKNOWN: u8 = 5;

/// Lock-free cell holding a [`StreamingStatus`].
///
/// Written only by the producer thread, read from the connection tasks.
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(NOT_STREAMING))
    }

    pub(crate) fn store(&self, status: StreamingStatus) {
        let raw = match status {
            StreamingStatus::Idle => IDLE,
            StreamingStatus::Starting => STARTING,
            StreamingStatus::Streaming => STREAMING,
            StreamingStatus::NotStreaming => NOT_STREAMING,
            StreamingStatus::ErrorCaptureInUse => ERROR_CAPTURE_IN_USE,
            StreamingStatus::ErrorUnknown => ERROR_UNKNOWN,
        };
        self.0.store(raw, Ordering::SeqCst);
    }

    pub(crate) fn load(&self) -> StreamingStatus {
        match self.0.load(Ordering::SeqCst) {
            IDLE => StreamingStatus::Idle,
            STARTING => StreamingStatus::Starting,
            STREAMING => StreamingStatus::Streaming,
            ERROR_CAPTURE_IN_USE => StreamingStatus::ErrorCaptureInUse,
            ERROR_UNKNOWN => StreamingStatus::ErrorUnknown,
            _ => StreamingStatus::NotStreaming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text_is_lowercase() {
        assert_eq!(StreamingStatus::Idle.to_string(), "idle");
        assert_eq!(StreamingStatus::NotStreaming.to_string(), "not streaming");
        assert_eq!(
            StreamingStatus::ErrorCaptureInUse.to_string(),
            "capture in use"
        );
        assert_eq!(StreamingStatus::ErrorUnknown.to_string(), "unknown error");
    }

    #[test]
    fn cell_round_trips_every_state() {
        let cell = StatusCell::new();
        assert_eq!(cell.load(), StreamingStatus::NotStreaming);
        for status in [
            StreamingStatus::Idle,
            StreamingStatus::Starting,
            StreamingStatus::Streaming,
            StreamingStatus::NotStreaming,
            StreamingStatus::ErrorCaptureInUse,
            StreamingStatus::ErrorUnknown,
        ] {
            cell.store(status);
            assert_eq!(cell.load(), status);
        }
    }
}
