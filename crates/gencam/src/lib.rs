//! Capture facade for GenICam-class industrial cameras.
//!
//! Three vendor SDKs (Aravis, IDS peak, Spinnaker) are normalised behind one
//! video-capture style contract: `open`, `grab`, `retrieve`, `get`, `set`,
//! `start_acquisition`, `stop_acquisition`. Each backend owns its device,
//! data-stream and buffer-pool handles and enforces a single acquisition
//! state machine per camera.
//!
//! Vendor backends are opt-in cargo features because they link against the
//! native SDKs; the default build carries the [`mock`] fleet so the facade
//! and everything above it runs (and is tested) without hardware.

mod backend;
mod capture;
mod error;
mod frame;
mod pixel_format;
mod property;

pub use backend::BackendKind;
#[cfg(feature = "mock-backend")]
pub use backend::mock;
pub use capture::Capture;
pub use error::{Error, Result};
pub use frame::Frame;
pub use pixel_format::{debayer_into, PixelFormat, RawImage};
pub use property::Property;
