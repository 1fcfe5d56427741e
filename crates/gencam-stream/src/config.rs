//! Streaming server configuration.

use gencam::BackendKind;

/// Settings for one [`StreamServer`](crate::StreamServer) instance.
///
/// The defaults mirror the deployed streamer: IDS-Peak backend, device 0,
/// JPEG compression at 3 fps, ten queued frames per connection.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Device index handed to the capture backend.
    pub camera_index: u32,
    /// Backend driving the camera.
    pub backend: BackendKind,
    /// Maximum frames queued per connection before it is dropped for
    /// backpressure.
    pub max_queue: usize,
    /// Encoder selector, a file extension with leading dot.
    pub compression_ext: String,
    /// Frame-rate target written to the camera after open.
    pub target_fps: f64,
    /// Grab timeout forwarded to the capture facade.
    pub buffer_timeout_ms: Option<u64>,
    /// Convert Bayer sensors to BGR before encoding.
    pub debayer: bool,
    /// When set, enable the external trigger on this line after open.
    pub trigger_pin: Option<u32>,
    /// Enable the 3.3 V line supply after open (Spinnaker GPIO).
    pub line_enable: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            backend: BackendKind::IdsPeak,
            max_queue: 10,
            compression_ext: ".jpg".into(),
            target_fps: 3.0,
            buffer_timeout_ms: None,
            debayer: true,
            trigger_pin: None,
            line_enable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_streamer() {
        let config = StreamConfig::default();
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.backend, BackendKind::IdsPeak);
        assert_eq!(config.max_queue, 10);
        assert_eq!(config.compression_ext, ".jpg");
        assert_eq!(config.target_fps, 3.0);
        assert!(config.debayer);
        assert!(!config.line_enable);
    }
}
