//! One-per-tick frame encoding.

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use image::{ExtendedColorType, ImageFormat};

use gencam::Frame;

/// Encode a captured frame into the container selected by `ext` (a file
/// extension with leading dot, e.g. `.jpg`).
///
/// Three-channel frames arrive as BGR and are swapped to RGB for the
/// encoder; mono frames encode as 8-bit grayscale.
pub fn encode_frame(frame: &Frame, ext: &str) -> Result<Vec<u8>> {
    let format = ImageFormat::from_extension(ext.trim_start_matches('.'))
        .ok_or_else(|| anyhow!("unsupported compression extension {ext:?}"))?;

    let mut out = Vec::new();
    match frame.channels() {
        1 => {
            image::write_buffer_with_format(
                &mut Cursor::new(&mut out),
                frame.data(),
                frame.width(),
                frame.height(),
                ExtendedColorType::L8,
                format,
            )
            .with_context(|| format!("encoding {} frame failed", ext))?;
        }
        3 => {
            let mut rgb = frame.data().to_vec();
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            image::write_buffer_with_format(
                &mut Cursor::new(&mut out),
                &rgb,
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
                format,
            )
            .with_context(|| format!("encoding {} frame failed", ext))?;
        }
        other => return Err(anyhow!("cannot encode {other}-channel frame")),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gencam::mock::{self, MockDevice};
    use gencam::{BackendKind, Capture};

    fn capture_one(index: usize, device: MockDevice) -> Frame {
        mock::install(index, device);
        let mut capture = Capture::new(false, None);
        capture.open(index as i32, BackendKind::Mock).unwrap();
        let mut frame = Frame::default();
        assert!(capture.read(&mut frame).unwrap());
        frame
    }

    #[test]
    fn jpeg_and_png_both_encode() {
        let frame = capture_one(300, MockDevice::default());
        let jpeg = encode_frame(&frame, ".jpg").unwrap();
        assert!(!jpeg.is_empty());
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let png = encode_frame(&frame, ".png").unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let frame = capture_one(301, MockDevice::default());
        assert!(encode_frame(&frame, ".tiff2").is_err());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = Frame::default();
        assert!(encode_frame(&frame, ".jpg").is_err());
    }
}
