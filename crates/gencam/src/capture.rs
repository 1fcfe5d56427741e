//! Video-capture style facade over the vendor backends.
//!
//! `Capture` mirrors the OpenCV `VideoCapture` surface the original bridge
//! subclassed: boolean results, a `read` that serves a still-latched buffer
//! first, and an exception mode deciding whether failures surface as errors
//! or as `false`/`0.0` fallbacks.

use tracing::debug;

use crate::backend::{BackendImpl, BackendKind, CameraBackend};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::property::Property;

/// Fixed preference order walked by [`Capture::open_any`].
const DISCOVERY_ORDER: [BackendKind; 3] = [
    BackendKind::IdsPeak,
    BackendKind::Spinnaker,
    BackendKind::Aravis,
];

/// A single-camera capture handle.
#[derive(Debug)]
pub struct Capture {
    backend: Option<BackendImpl>,
    debayer: bool,
    buffer_timeout_ms: Option<u64>,
    exception_mode: bool,
}

impl Capture {
    /// Create a closed capture. `debayer` controls whether Bayer sensors are
    /// converted to BGR on retrieve; `buffer_timeout_ms` bounds every grab
    /// (`None` waits indefinitely).
    pub fn new(debayer: bool, buffer_timeout_ms: Option<u64>) -> Self {
        Self {
            backend: None,
            debayer,
            buffer_timeout_ms,
            exception_mode: true,
        }
    }

    /// Open device `index` on each backend of the preference order in turn
    /// (IDS-Peak, Spinnaker, Aravis), returning the first capture that
    /// opens. Fails with [`Error::NotAvailable`] when no backend works.
    pub fn open_any(debayer: bool, buffer_timeout_ms: Option<u64>) -> Result<Self> {
        for kind in DISCOVERY_ORDER {
            let mut capture = Capture::new(debayer, buffer_timeout_ms);
            match capture.open(0, kind) {
                Ok(true) => {
                    debug!(backend = %kind, "discovery opened device 0");
                    return Ok(capture);
                }
                Ok(false) => {}
                Err(err) => debug!(backend = %kind, error = %err, "discovery attempt failed"),
            }
        }
        Err(Error::NotAvailable)
    }

    /// When exception mode is off (it is on by default), fallible calls
    /// return `Ok(false)` / `Ok(0.0)` instead of an error.
    pub fn set_exception_mode(&mut self, enabled: bool) {
        self.exception_mode = enabled;
    }

    /// Current exception-mode flag.
    pub fn exception_mode(&self) -> bool {
        self.exception_mode
    }

    /// Open device `index` on `kind`.
    ///
    /// Negative indices fail with `InvalidArgument`; `BackendKind::Any` and
    /// backends missing from this build fail with `Unsupported` regardless
    /// of exception mode. SDK-level open failures honour it.
    pub fn open(&mut self, index: i32, kind: BackendKind) -> Result<bool> {
        if index < 0 {
            return self.wrap_bool(Err(Error::InvalidArgument(
                "negative camera index".into(),
            )));
        }
        let mut backend = BackendImpl::new(kind, self.debayer, self.buffer_timeout_ms)?;
        let result = backend.open(index as usize);
        if result.is_ok() {
            self.backend = Some(backend);
        }
        self.wrap_bool(result)
    }

    /// Stop acquisition, return driver buffers and drop all SDK handles.
    /// Never fails and may be called repeatedly.
    pub fn release(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.release();
        }
        self.backend = None;
    }

    /// Whether a device is currently open.
    pub fn is_opened(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_opened())
    }

    /// Latch the next driver buffer, starting acquisition if necessary.
    pub fn grab(&mut self) -> Result<bool> {
        let result = self.backend_mut().and_then(|b| b.grab());
        self.wrap_bool(result)
    }

    /// Convert the latched buffer into `out`. Returns `Ok(false)` without
    /// touching `out` when no buffer is latched.
    pub fn retrieve(&mut self, out: &mut Frame) -> Result<bool> {
        let result = self.backend_mut().and_then(|b| b.retrieve(out));
        self.wrap_bool(result)
    }

    /// Fetch one frame: serve a still-latched buffer if there is one,
    /// otherwise grab and retrieve.
    pub fn read(&mut self, out: &mut Frame) -> Result<bool> {
        let result = self.backend_mut().and_then(|b| {
            if b.retrieve(out)? {
                return Ok(true);
            }
            Ok(b.grab()? && b.retrieve(out)?)
        });
        self.wrap_bool(result)
    }

    /// Read a property value. Unknown or unreadable properties yield 0.0
    /// out of exception mode.
    pub fn get(&self, prop: Property) -> Result<f64> {
        let result = match self.backend.as_ref() {
            Some(backend) => backend.get(prop),
            None => Err(Error::NotAvailable),
        };
        match result {
            Err(err) if !self.exception_mode => {
                debug!(property = %prop, error = %err, "get suppressed");
                Ok(0.0)
            }
            other => other,
        }
    }

    /// Write a property value. Acquisition is stopped first; the next grab
    /// restarts it.
    pub fn set(&mut self, prop: Property, value: f64) -> Result<bool> {
        let result = self.backend_mut().and_then(|b| b.set(prop, value));
        self.wrap_bool(result)
    }

    /// Explicitly start acquisition (grab does this on demand).
    pub fn start_acquisition(&mut self) -> Result<()> {
        self.backend_mut().and_then(|b| b.start_acquisition())
    }

    /// Explicitly stop acquisition.
    pub fn stop_acquisition(&mut self) -> Result<()> {
        self.backend_mut().and_then(|b| b.stop_acquisition())
    }

    fn backend_mut(&mut self) -> Result<&mut BackendImpl> {
        self.backend.as_mut().ok_or(Error::NotAvailable)
    }

    /// Single conversion point between error propagation and the legacy
    /// boolean surface.
    fn wrap_bool(&self, result: Result<bool>) -> Result<bool> {
        match result {
            Err(err) if !self.exception_mode => {
                debug!(error = %err, "call suppressed by exception mode");
                Ok(false)
            }
            other => other,
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.release();
    }
}
