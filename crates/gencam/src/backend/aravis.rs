//! Aravis backend (GigE Vision / USB3 Vision cameras via libaravis).

use aravis::prelude::{BufferExt, BufferExtManual, CameraExt, CameraExtManual, StreamExt};
use aravis::{Auto, Buffer, Camera, Stream};
use tracing::warn;

use crate::backend::{snap_to_range, CameraBackend};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pixel_format::{debayer_into, PixelFormat, RawImage};
use crate::property::Property;

/// Buffers pushed into the stream's input queue at open time.
const INPUT_QUEUE_DEPTH: usize = 3;

fn gerr(err: glib::Error) -> Error {
    Error::Backend(err.message().to_string())
}

pub(crate) struct AravisBackend {
    debayer: bool,
    buffer_timeout_ms: Option<u64>,
    pixel_format: PixelFormat,
    is_acquiring: bool,
    camera: Option<Camera>,
    stream: Option<Stream>,
    latched: Option<Buffer>,
}

impl AravisBackend {
    pub(crate) fn new(debayer: bool, buffer_timeout_ms: Option<u64>) -> Self {
        Self {
            debayer,
            buffer_timeout_ms,
            pixel_format: PixelFormat::Unknown,
            is_acquiring: false,
            camera: None,
            stream: None,
            latched: None,
        }
    }

    fn camera(&self) -> Result<&Camera> {
        self.camera
            .as_ref()
            .ok_or_else(|| Error::Backend("camera is not open".into()))
    }

    fn stream(&self) -> Result<&Stream> {
        self.stream
            .as_ref()
            .ok_or_else(|| Error::Backend("stream is not open".into()))
    }

    /// Return the latched buffer to the stream's input queue.
    fn requeue_latched(&mut self) {
        if let (Some(buffer), Some(stream)) = (self.latched.take(), self.stream.as_ref()) {
            stream.push_buffer(&buffer);
        }
    }

    fn map_pixel_format(name: &str) -> PixelFormat {
        match name {
            "Mono8" => PixelFormat::Mono8,
            "BayerRG8" => PixelFormat::BayerRG8,
            "BayerBG8" => PixelFormat::BayerBG8,
            other => {
                warn!(format = other, "unknown pixel format");
                PixelFormat::Unknown
            }
        }
    }
}

impl CameraBackend for AravisBackend {
    fn open(&mut self, index: usize) -> Result<bool> {
        aravis::update_device_list();
        let n_devices = aravis::n_devices() as usize;
        if index >= n_devices {
            return Err(Error::invalid_index());
        }

        let id = aravis::device_id(index as u32)
            .ok_or_else(|| Error::Backend("device id vanished during enumeration".into()))?;
        let camera = Camera::new(Some(id.as_str())).map_err(gerr)?;

        camera
            .set_acquisition_mode(aravis::AcquisitionMode::Continuous)
            .map_err(gerr)?;

        let stream = camera.create_stream().map_err(gerr)?;
        let payload = camera.payload().map_err(gerr)? as usize;
        for _ in 0..INPUT_QUEUE_DEPTH {
            stream.push_buffer(&Buffer::new_allocate(payload));
        }

        match camera.pixel_format_as_string() {
            Ok(Some(name)) => self.pixel_format = Self::map_pixel_format(name.as_str()),
            Ok(None) => warn!("camera reported no pixel format"),
            Err(err) => warn!(error = %err, "querying pixel format failed"),
        }

        self.camera = Some(camera);
        self.stream = Some(stream);
        Ok(true)
    }

    fn release(&mut self) {
        if self.is_acquiring {
            if let Some(camera) = self.camera.as_ref() {
                if let Err(err) = camera.stop_acquisition() {
                    warn!(error = %err, "stopping acquisition during release failed");
                }
            }
            self.is_acquiring = false;
        }
        // Dropping the stream releases its queued buffers.
        self.latched = None;
        self.stream = None;
        self.camera = None;
    }

    fn is_opened(&self) -> bool {
        self.camera.is_some() && self.stream.is_some()
    }

    fn grab(&mut self) -> Result<bool> {
        if !self.is_acquiring {
            self.start_acquisition()?;
        }

        let buffer = match self.buffer_timeout_ms {
            Some(ms) => self
                .stream()?
                .timeout_pop_buffer(ms * 1_000)
                .ok_or(Error::Timeout { ms })?,
            None => self
                .stream()?
                .pop_buffer()
                .ok_or_else(|| Error::Backend("stream produced no buffer".into()))?,
        };

        if buffer.status() != aravis::BufferStatus::Success {
            let status = buffer.status();
            self.stream()?.push_buffer(&buffer);
            return Err(Error::Backend(format!("buffer status {status:?}")));
        }

        self.requeue_latched();
        self.latched = Some(buffer);
        Ok(true)
    }

    fn retrieve(&mut self, out: &mut Frame) -> Result<bool> {
        let Some(buffer) = self.latched.take() else {
            return Ok(false);
        };

        let width = buffer.image_width() as u32;
        let height = buffer.image_height() as u32;
        let result = debayer_into(
            self.pixel_format,
            self.debayer,
            RawImage {
                width,
                height,
                data: buffer.data(),
            },
            out,
        );
        self.stream()?.push_buffer(&buffer);
        result.map(|()| true)
    }

    fn get(&self, prop: Property) -> Result<f64> {
        let camera = self.camera()?;
        match prop {
            Property::AutoExposure => {
                let mode = camera.exposure_time_auto().map_err(gerr)?;
                Ok(if mode == Auto::Continuous { 1.0 } else { 0.0 })
            }
            Property::Exposure => camera.exposure_time().map_err(gerr),
            Property::Fps => camera.frame_rate().map_err(gerr),
            Property::Trigger => {
                let device = camera.device().ok_or_else(|| {
                    Error::Backend("camera lost its device handle".into())
                })?;
                let mode = device
                    .string_feature_value("TriggerMode")
                    .map_err(gerr)?;
                Ok(if mode.as_str() == "On" { 1.0 } else { 0.0 })
            }
            Property::Line => Err(Error::Unsupported(
                "line GPIO control is Spinnaker-specific".into(),
            )),
        }
    }

    fn set(&mut self, prop: Property, value: f64) -> Result<bool> {
        if self.is_acquiring {
            self.stop_acquisition()?;
        }
        let camera = self.camera()?;
        match prop {
            Property::AutoExposure => {
                let mode = if value == 0.0 { Auto::Off } else { Auto::Continuous };
                camera.set_exposure_time_auto(mode).map_err(gerr)?;
            }
            Property::Exposure => {
                let (min, max) = camera.exposure_time_bounds().map_err(gerr)?;
                if value < min || value > max {
                    return Err(Error::InvalidArgument(format!(
                        "exposure {value} outside [{min}, {max}]"
                    )));
                }
                camera
                    .set_exposure_time(snap_to_range(value, min, max, None))
                    .map_err(gerr)?;
            }
            Property::Fps => {
                let (min, max) = camera.frame_rate_bounds().map_err(gerr)?;
                // set_frame_rate also flips the vendor's rate-enable switch
                // where the device has one.
                camera
                    .set_frame_rate(snap_to_range(value, min, max, None))
                    .map_err(gerr)?;
            }
            Property::Trigger => {
                if value == 0.0 {
                    camera.clear_triggers().map_err(gerr)?;
                } else {
                    camera.set_trigger("Line0").map_err(gerr)?;
                    let device = camera.device().ok_or_else(|| {
                        Error::Backend("camera lost its device handle".into())
                    })?;
                    if let Err(err) =
                        device.set_string_feature_value("TriggerActivation", "RisingEdge")
                    {
                        // Do not leave the trigger half-armed.
                        camera.clear_triggers().map_err(gerr)?;
                        return Err(gerr(err));
                    }
                }
            }
            Property::Line => {
                return Err(Error::Unsupported(
                    "line GPIO control is Spinnaker-specific".into(),
                ));
            }
        }
        Ok(true)
    }

    fn start_acquisition(&mut self) -> Result<()> {
        self.camera()?.start_acquisition().map_err(gerr)?;
        self.is_acquiring = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.requeue_latched();
        self.camera()?.stop_acquisition().map_err(gerr)?;
        self.is_acquiring = false;
        Ok(())
    }
}

impl Drop for AravisBackend {
    fn drop(&mut self) {
        self.release();
    }
}
