//! Pixel-format tags and the shared debayer step.
//!
//! Every backend latches raw driver buffers in whatever mosaic the sensor
//! produces; `debayer_into` is the single place that turns such a buffer into
//! the matrix handed to callers. The demosaic algorithm itself is delegated
//! to the `bayer` crate, this module only routes.

use std::io::Cursor;

use bayer::{BayerDepth, Demosaic, RasterDepth, RasterMut, CFA};

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Sensor pixel formats understood by the capture core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// Anything the backend could not map. Treated as mono on retrieve.
    #[default]
    Unknown,
    /// 8-bit grayscale.
    Mono8,
    /// 8-bit Bayer mosaic, RGGB layout.
    BayerRG8,
    /// 8-bit Bayer mosaic, BGGR layout.
    BayerBG8,
}

/// Borrowed view of a driver-owned raw buffer between `grab` and `retrieve`.
#[derive(Clone, Copy)]
pub struct RawImage<'a> {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Packed single-channel pixel data, one byte per pixel.
    pub data: &'a [u8],
}

/// Convert a raw sensor buffer into the caller-facing frame.
///
/// With debayering enabled and a Bayer format, the mosaic is demosaiced and
/// written as packed BGR. Mono and unknown formats copy through as a single
/// 8-bit channel regardless of the debayer flag.
pub fn debayer_into(
    format: PixelFormat,
    debayer_enabled: bool,
    raw: RawImage<'_>,
    out: &mut Frame,
) -> Result<()> {
    let pixels = raw.width as usize * raw.height as usize;
    if raw.data.len() < pixels {
        return Err(Error::Backend(format!(
            "driver buffer too short: {} bytes for {}x{}",
            raw.data.len(),
            raw.width,
            raw.height
        )));
    }

    let cfa = match (debayer_enabled, format) {
        (true, PixelFormat::BayerRG8) => CFA::RGGB,
        (true, PixelFormat::BayerBG8) => CFA::BGGR,
        _ => {
            out.copy_mono(raw.width, raw.height, raw.data);
            return Ok(());
        }
    };

    let dst = out.reset(raw.width, raw.height, 3);
    {
        let mut raster = RasterMut::new(
            raw.width as usize,
            raw.height as usize,
            RasterDepth::Depth8,
            dst,
        );
        bayer::run_demosaic(
            &mut Cursor::new(&raw.data[..pixels]),
            BayerDepth::Depth8,
            cfa,
            Demosaic::Linear,
            &mut raster,
        )
        .map_err(|e| Error::Backend(format!("demosaic failed: {e}")))?;
    }

    // The demosaicer writes RGB, callers expect BGR.
    for px in dst.chunks_exact_mut(3) {
        px.swap(0, 2);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(width: u32, height: u32, fill: u8) -> Vec<u8> {
        vec![fill; (width * height) as usize]
    }

    #[test]
    fn mono_copies_through() {
        let data = raw(4, 2, 7);
        let mut out = Frame::default();
        debayer_into(
            PixelFormat::Mono8,
            true,
            RawImage {
                width: 4,
                height: 2,
                data: &data,
            },
            &mut out,
        )
        .unwrap();
        assert_eq!(out.channels(), 1);
        assert_eq!(out.data(), &data[..]);
    }

    #[test]
    fn unknown_format_copies_even_with_debayer_on() {
        let data = raw(4, 4, 31);
        let mut out = Frame::default();
        debayer_into(
            PixelFormat::Unknown,
            true,
            RawImage {
                width: 4,
                height: 4,
                data: &data,
            },
            &mut out,
        )
        .unwrap();
        assert_eq!(out.channels(), 1);
    }

    #[test]
    fn bayer_disabled_copies_mosaic() {
        let data = raw(4, 4, 9);
        let mut out = Frame::default();
        debayer_into(
            PixelFormat::BayerRG8,
            false,
            RawImage {
                width: 4,
                height: 4,
                data: &data,
            },
            &mut out,
        )
        .unwrap();
        assert_eq!(out.channels(), 1);
        assert_eq!(out.data(), &data[..]);
    }

    #[test]
    fn bayer_enabled_expands_to_bgr() {
        let data = raw(8, 6, 128);
        let mut out = Frame::default();
        debayer_into(
            PixelFormat::BayerBG8,
            true,
            RawImage {
                width: 8,
                height: 6,
                data: &data,
            },
            &mut out,
        )
        .unwrap();
        assert_eq!(out.channels(), 3);
        assert_eq!(out.data().len(), 8 * 6 * 3);
        // A uniform mosaic demosaics to a uniform image.
        assert!(out.data().iter().all(|&b| b == 128));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let data = raw(4, 4, 0);
        let mut out = Frame::default();
        let err = debayer_into(
            PixelFormat::Mono8,
            false,
            RawImage {
                width: 8,
                height: 8,
                data: &data,
            },
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
