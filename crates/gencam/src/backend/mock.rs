//! In-process fake camera fleet.
//!
//! Tests (and hardware-less runs of the streaming server) install fake
//! devices into a process-global registry; the backend then behaves like a
//! vendor SDK against them, including exclusive device claims, buffer
//! latching, property ranges and injected open failures.
//!
//! ```no_run
//! use gencam::mock::{self, MockDevice};
//!
//! let counters = mock::install(0, MockDevice::default());
//! // ... open index 0 through the facade with BackendKind::Mock ...
//! assert_eq!(counters.opens(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::backend::{snap_to_range, CameraBackend};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pixel_format::{debayer_into, PixelFormat, RawImage};
use crate::property::Property;

/// Inclusive value range plus write increment for a fake device node.
#[derive(Clone, Copy, Debug)]
pub struct NodeRange {
    pub min: f64,
    pub max: f64,
    pub increment: f64,
}

impl NodeRange {
    fn snap(&self, value: f64) -> f64 {
        let inc = (self.increment > 0.0).then_some(self.increment);
        snap_to_range(value, self.min, self.max, inc)
    }

    fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Description of one fake camera.
#[derive(Clone, Debug)]
pub struct MockDevice {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Time a grab takes to produce a buffer. A configured buffer timeout
    /// shorter than this makes `grab` fail with `Timeout`.
    pub grab_delay_ms: u64,
    /// Number of `open` attempts that fail with `DeviceInUse` before the
    /// device becomes available.
    pub fail_open_in_use: u32,
    /// Make enabling the trigger fail at the activation step, which must
    /// revert trigger mode to off.
    pub fail_trigger_activation: bool,
    /// Whether the device exposes the Line2 3.3 V supply node.
    pub has_line_gpio: bool,
    pub exposure: NodeRange,
    pub fps: NodeRange,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Mono8,
            grab_delay_ms: 5,
            fail_open_in_use: 0,
            fail_trigger_activation: false,
            has_line_gpio: false,
            exposure: NodeRange {
                min: 20.0,
                max: 1_000_000.0,
                increment: 1.0,
            },
            fps: NodeRange {
                min: 0.5,
                max: 120.0,
                increment: 0.0,
            },
        }
    }
}

/// Observable side effects of a fake device, for assertions in tests.
#[derive(Debug, Default)]
pub struct MockCounters {
    opens: AtomicU64,
    releases: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    grabs: AtomicU64,
    requeues: AtomicU64,
}

impl MockCounters {
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> u64 {
        self.grabs.load(Ordering::SeqCst)
    }

    /// Buffers handed back to the fake driver queue by `retrieve`, abnormal
    /// paths included.
    pub fn requeues(&self) -> u64 {
        self.requeues.load(Ordering::SeqCst)
    }
}

struct Slot {
    device: MockDevice,
    counters: Arc<MockCounters>,
    claimed: bool,
    in_use_failures_left: u32,
}

static REGISTRY: LazyLock<Mutex<HashMap<usize, Slot>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Install (or replace) a fake device at `index` and return its counters.
pub fn install(index: usize, device: MockDevice) -> Arc<MockCounters> {
    let counters = Arc::new(MockCounters::default());
    let slot = Slot {
        in_use_failures_left: device.fail_open_in_use,
        device,
        counters: counters.clone(),
        claimed: false,
    };
    REGISTRY.lock().unwrap().insert(index, slot);
    counters
}

/// Remove a fake device, releasing its index for reuse.
pub fn uninstall(index: usize) {
    REGISTRY.lock().unwrap().remove(&index);
}

fn bool_prop(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// Simple per-property value store mirroring a device node map.
#[derive(Debug)]
struct NodeValues {
    auto_exposure: bool,
    exposure: f64,
    fps: f64,
    trigger: bool,
    line_enable: bool,
}

#[derive(Debug)]
struct OpenState {
    index: usize,
    device: MockDevice,
    counters: Arc<MockCounters>,
    nodes: NodeValues,
    frame_count: u64,
}

/// Fake-fleet implementation of the backend contract.
#[derive(Debug)]
pub(crate) struct MockBackend {
    debayer: bool,
    buffer_timeout_ms: Option<u64>,
    is_acquiring: bool,
    state: Option<OpenState>,
    latched: Option<Vec<u8>>,
}

impl MockBackend {
    pub(crate) fn new(debayer: bool, buffer_timeout_ms: Option<u64>) -> Self {
        Self {
            debayer,
            buffer_timeout_ms,
            is_acquiring: false,
            state: None,
            latched: None,
        }
    }

    fn state(&self) -> Result<&OpenState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::Backend("mock device is not open".into()))
    }

    fn state_mut(&mut self) -> Result<&mut OpenState> {
        self.state
            .as_mut()
            .ok_or_else(|| Error::Backend("mock device is not open".into()))
    }

    /// Hand a latched buffer back to the fake driver queue.
    fn requeue_latched(&mut self) {
        if self.latched.take().is_some() {
            if let Some(state) = self.state.as_ref() {
                state.counters.requeues.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn render_frame(state: &mut OpenState) -> Vec<u8> {
        let (w, h) = (state.device.width as usize, state.device.height as usize);
        let n = state.frame_count;
        state.frame_count += 1;
        let mut data = vec![0u8; w * h];
        for (y, row) in data.chunks_exact_mut(w).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                *px = (x as u64 + y as u64 + n) as u8;
            }
        }
        data
    }
}

impl CameraBackend for MockBackend {
    fn open(&mut self, index: usize) -> Result<bool> {
        let mut registry = REGISTRY.lock().unwrap();
        let device_count = registry.len();
        let slot = registry.get_mut(&index).ok_or_else(|| {
            debug!(index, device_count, "mock open: no such device");
            Error::invalid_index()
        })?;

        if slot.in_use_failures_left > 0 {
            slot.in_use_failures_left -= 1;
            return Err(Error::DeviceInUse("simulated foreign claim".into()));
        }
        if slot.claimed {
            return Err(Error::DeviceInUse("device already claimed".into()));
        }

        slot.claimed = true;
        slot.counters.opens.fetch_add(1, Ordering::SeqCst);

        let device = slot.device.clone();
        let nodes = NodeValues {
            auto_exposure: false,
            exposure: device.exposure.snap((device.exposure.min + device.exposure.max) / 2.0),
            fps: device.fps.snap(30.0),
            trigger: false,
            line_enable: false,
        };
        self.state = Some(OpenState {
            index,
            device,
            counters: slot.counters.clone(),
            nodes,
            frame_count: 0,
        });
        Ok(true)
    }

    fn release(&mut self) {
        if self.is_acquiring {
            let _ = self.stop_acquisition();
        }
        self.requeue_latched();
        if let Some(state) = self.state.take() {
            state.counters.releases.fetch_add(1, Ordering::SeqCst);
            if let Some(slot) = REGISTRY.lock().unwrap().get_mut(&state.index) {
                slot.claimed = false;
            }
        }
    }

    fn is_opened(&self) -> bool {
        self.state.is_some()
    }

    fn grab(&mut self) -> Result<bool> {
        if !self.is_acquiring {
            self.start_acquisition()?;
        }

        let timeout = self.buffer_timeout_ms;
        let state = self.state_mut()?;
        let delay = state.device.grab_delay_ms;
        if let Some(ms) = timeout {
            if ms < delay {
                thread::sleep(Duration::from_millis(ms));
                return Err(Error::Timeout { ms });
            }
        }
        thread::sleep(Duration::from_millis(delay));

        state.counters.grabs.fetch_add(1, Ordering::SeqCst);
        let frame = Self::render_frame(state);
        self.requeue_latched();
        self.latched = Some(frame);
        Ok(true)
    }

    fn retrieve(&mut self, out: &mut Frame) -> Result<bool> {
        let Some(raw) = self.latched.take() else {
            return Ok(false);
        };
        let state = self.state()?;
        let result = debayer_into(
            state.device.pixel_format,
            self.debayer,
            RawImage {
                width: state.device.width,
                height: state.device.height,
                data: &raw,
            },
            out,
        );
        // The driver gets its buffer back even when conversion failed.
        state.counters.requeues.fetch_add(1, Ordering::SeqCst);
        result.map(|()| true)
    }

    fn get(&self, prop: Property) -> Result<f64> {
        let state = self.state()?;
        match prop {
            Property::AutoExposure => Ok(bool_prop(state.nodes.auto_exposure)),
            Property::Exposure => Ok(state.nodes.exposure),
            Property::Fps => Ok(state.nodes.fps),
            Property::Trigger => Ok(bool_prop(state.nodes.trigger)),
            Property::Line => {
                if state.device.has_line_gpio {
                    Ok(bool_prop(state.nodes.line_enable))
                } else {
                    Err(Error::Unsupported("device has no line GPIO".into()))
                }
            }
        }
    }

    fn set(&mut self, prop: Property, value: f64) -> Result<bool> {
        if self.is_acquiring {
            self.stop_acquisition()?;
        }
        let state = self.state_mut()?;
        match prop {
            Property::AutoExposure => {
                state.nodes.auto_exposure = value != 0.0;
            }
            Property::Exposure => {
                if !state.device.exposure.contains(value) {
                    return Err(Error::InvalidArgument(format!(
                        "exposure {value} outside [{}, {}]",
                        state.device.exposure.min, state.device.exposure.max
                    )));
                }
                state.nodes.exposure = state.device.exposure.snap(value);
            }
            Property::Fps => {
                state.nodes.fps = state.device.fps.snap(value);
            }
            Property::Trigger => {
                if value == 0.0 {
                    state.nodes.trigger = false;
                } else {
                    state.nodes.trigger = true;
                    if state.device.fail_trigger_activation {
                        // Activation refused: mode must not stay half-armed.
                        state.nodes.trigger = false;
                        return Err(Error::Backend(
                            "trigger activation is not writeable".into(),
                        ));
                    }
                }
            }
            Property::Line => {
                if !state.device.has_line_gpio {
                    return Err(Error::Unsupported("device has no line GPIO".into()));
                }
                state.nodes.line_enable = value != 0.0;
            }
        }
        Ok(true)
    }

    fn start_acquisition(&mut self) -> Result<()> {
        let state = self.state_mut()?;
        state.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.is_acquiring = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        if let Some(state) = self.state.as_ref() {
            state.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
        self.requeue_latched();
        self.is_acquiring = false;
        Ok(())
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.release();
    }
}
