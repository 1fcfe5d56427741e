//! Backend contract and dispatch.
//!
//! A backend owns the vendor SDK handles for one camera: device, data
//! stream, buffer pool and the single buffer latched between `grab` and
//! `retrieve`. The facade never talks to an SDK directly, it routes through
//! [`BackendImpl`].

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::property::Property;

#[cfg(feature = "backend-aravis")]
mod aravis;
#[cfg(feature = "backend-ids-peak")]
mod ids_peak;
#[cfg(feature = "mock-backend")]
pub mod mock;
#[cfg(feature = "backend-spinnaker")]
mod spinnaker;

#[cfg(not(any(
    feature = "backend-aravis",
    feature = "backend-ids-peak",
    feature = "backend-spinnaker",
    feature = "mock-backend",
)))]
compile_error!("gencam needs at least one backend feature enabled");

/// Selects which vendor backend a capture should use.
///
/// The integer tags are part of the library surface and match the original
/// bridge ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum BackendKind {
    /// Placeholder tag. `Capture::open` rejects it; discovery goes through
    /// `Capture::open_any` instead.
    Any = 0,
    /// Aravis (GigE Vision / USB3 Vision via libaravis).
    Aravis = 1,
    /// IDS peak.
    IdsPeak = 2,
    /// FLIR/Teledyne Spinnaker.
    Spinnaker = 3,
    /// In-process fake fleet, see [`mock`].
    #[cfg(feature = "mock-backend")]
    Mock = 4,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Any => "Any",
            BackendKind::Aravis => "Aravis",
            BackendKind::IdsPeak => "IDS-Peak",
            BackendKind::Spinnaker => "Spinnaker",
            #[cfg(feature = "mock-backend")]
            BackendKind::Mock => "Mock",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    /// Parse the lowercase selector strings used by the streamer CLI.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(BackendKind::Any),
            "aravis" => Ok(BackendKind::Aravis),
            "ids" | "ids-peak" | "idspeak" => Ok(BackendKind::IdsPeak),
            "spinnaker" => Ok(BackendKind::Spinnaker),
            #[cfg(feature = "mock-backend")]
            "mock" => Ok(BackendKind::Mock),
            other => Err(Error::InvalidArgument(format!(
                "unknown backend selector {other:?}"
            ))),
        }
    }
}

/// Contract every vendor backend satisfies.
///
/// Shared semantics, enforced by every implementation:
/// - `grab` starts acquisition if it is not already running;
/// - `set` stops acquisition first, callers resume with the next `grab`;
/// - `retrieve` without a latched buffer returns `Ok(false)` and writes
///   nothing;
/// - the latched buffer is handed back to the driver queue before
///   `retrieve` returns;
/// - `release` stops acquisition, returns buffers and clears handles, is
///   idempotent and never fails.
pub(crate) trait CameraBackend {
    fn open(&mut self, index: usize) -> Result<bool>;
    fn release(&mut self);
    fn is_opened(&self) -> bool;
    fn grab(&mut self) -> Result<bool>;
    fn retrieve(&mut self, out: &mut Frame) -> Result<bool>;
    fn get(&self, prop: Property) -> Result<f64>;
    fn set(&mut self, prop: Property, value: f64) -> Result<bool>;
    fn start_acquisition(&mut self) -> Result<()>;
    fn stop_acquisition(&mut self) -> Result<()>;
}

/// Tagged-enum dispatch over the compiled-in backends.
///
/// The backend kind is fixed at construction, so an enum avoids a heap
/// allocation per capture and keeps dispatch static.
#[derive(Debug)]
pub(crate) enum BackendImpl {
    #[cfg(feature = "backend-aravis")]
    Aravis(aravis::AravisBackend),
    #[cfg(feature = "backend-ids-peak")]
    IdsPeak(ids_peak::IdsPeakBackend),
    #[cfg(feature = "backend-spinnaker")]
    Spinnaker(spinnaker::SpinnakerBackend),
    #[cfg(feature = "mock-backend")]
    Mock(mock::MockBackend),
}

impl BackendImpl {
    /// Instantiate the backend for `kind`, or fail with `Unsupported` when
    /// it was not compiled into this build.
    pub(crate) fn new(
        kind: BackendKind,
        debayer: bool,
        buffer_timeout_ms: Option<u64>,
    ) -> Result<Self> {
        match kind {
            BackendKind::Any => Err(Error::Unsupported(
                "backend Any is not a concrete backend, use open_any".into(),
            )),
            #[cfg(feature = "backend-aravis")]
            BackendKind::Aravis => Ok(BackendImpl::Aravis(aravis::AravisBackend::new(
                debayer,
                buffer_timeout_ms,
            ))),
            #[cfg(feature = "backend-ids-peak")]
            BackendKind::IdsPeak => Ok(BackendImpl::IdsPeak(ids_peak::IdsPeakBackend::new(
                debayer,
                buffer_timeout_ms,
            )?)),
            #[cfg(feature = "backend-spinnaker")]
            BackendKind::Spinnaker => Ok(BackendImpl::Spinnaker(
                spinnaker::SpinnakerBackend::new(debayer, buffer_timeout_ms)?,
            )),
            #[cfg(feature = "mock-backend")]
            BackendKind::Mock => Ok(BackendImpl::Mock(mock::MockBackend::new(
                debayer,
                buffer_timeout_ms,
            ))),
            #[allow(unreachable_patterns)]
            other => Err(Error::Unsupported(format!(
                "backend {other} is not compiled into this build"
            ))),
        }
    }

    fn inner(&self) -> &dyn CameraBackend {
        match self {
            #[cfg(feature = "backend-aravis")]
            BackendImpl::Aravis(b) => b,
            #[cfg(feature = "backend-ids-peak")]
            BackendImpl::IdsPeak(b) => b,
            #[cfg(feature = "backend-spinnaker")]
            BackendImpl::Spinnaker(b) => b,
            #[cfg(feature = "mock-backend")]
            BackendImpl::Mock(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CameraBackend {
        match self {
            #[cfg(feature = "backend-aravis")]
            BackendImpl::Aravis(b) => b,
            #[cfg(feature = "backend-ids-peak")]
            BackendImpl::IdsPeak(b) => b,
            #[cfg(feature = "backend-spinnaker")]
            BackendImpl::Spinnaker(b) => b,
            #[cfg(feature = "mock-backend")]
            BackendImpl::Mock(b) => b,
        }
    }
}

impl CameraBackend for BackendImpl {
    fn open(&mut self, index: usize) -> Result<bool> {
        self.inner_mut().open(index)
    }

    fn release(&mut self) {
        self.inner_mut().release();
    }

    fn is_opened(&self) -> bool {
        self.inner().is_opened()
    }

    fn grab(&mut self) -> Result<bool> {
        self.inner_mut().grab()
    }

    fn retrieve(&mut self, out: &mut Frame) -> Result<bool> {
        self.inner_mut().retrieve(out)
    }

    fn get(&self, prop: Property) -> Result<f64> {
        self.inner().get(prop)
    }

    fn set(&mut self, prop: Property, value: f64) -> Result<bool> {
        self.inner_mut().set(prop, value)
    }

    fn start_acquisition(&mut self) -> Result<()> {
        self.inner_mut().start_acquisition()
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.inner_mut().stop_acquisition()
    }
}

/// Snap `value` to a node's increment, then clamp into its range.
///
/// Matches GenICam node write rules: the increment is applied first so the
/// clamped result still sits on the device's grid.
pub(crate) fn snap_to_range(value: f64, min: f64, max: f64, increment: Option<f64>) -> f64 {
    let mut value = value;
    if let Some(inc) = increment {
        if inc > 0.0 {
            value -= value % inc;
        }
    }
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_wire_names() {
        assert_eq!(BackendKind::Any.to_string(), "Any");
        assert_eq!(BackendKind::Aravis.to_string(), "Aravis");
        assert_eq!(BackendKind::IdsPeak.to_string(), "IDS-Peak");
        assert_eq!(BackendKind::Spinnaker.to_string(), "Spinnaker");
    }

    #[test]
    fn backend_selector_parsing() {
        assert_eq!("ids".parse::<BackendKind>().unwrap(), BackendKind::IdsPeak);
        assert_eq!(
            "SPINNAKER".parse::<BackendKind>().unwrap(),
            BackendKind::Spinnaker
        );
        assert_eq!("aravis".parse::<BackendKind>().unwrap(), BackendKind::Aravis);
        assert_eq!("any".parse::<BackendKind>().unwrap(), BackendKind::Any);
        assert!("pylon".parse::<BackendKind>().is_err());
    }

    #[test]
    fn snap_applies_increment_before_clamp() {
        assert_eq!(snap_to_range(11.0, 0.0, 100.0, Some(2.0)), 10.0);
        assert_eq!(snap_to_range(250.0, 0.0, 100.0, Some(3.0)), 100.0);
        assert_eq!(snap_to_range(-5.0, 0.0, 100.0, None), 0.0);
        assert_eq!(snap_to_range(42.0, 0.0, 100.0, Some(0.0)), 42.0);
    }
}
