//! Spinnaker backend (FLIR/Teledyne cameras).
//!
//! The vendor enumerates cameras in an order that is not stable between
//! processes, so `open` sorts the device-id strings before picking the
//! index'th camera.

mod sys;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::backend::{snap_to_range, CameraBackend};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pixel_format::{debayer_into, PixelFormat, RawImage};
use crate::property::Property;

/// Process-wide system handle plus the number of live backends holding it.
/// The raw pointer is stashed as usize so the static is Sync.
static SYSTEM: Mutex<(usize, usize)> = Mutex::new((0, 0));

fn last_message() -> String {
    let mut buf = vec![0 as c_char; 512];
    let mut len = buf.len();
    let status = unsafe { sys::spinErrorGetLastMessage(buf.as_mut_ptr(), &mut len) };
    if status != sys::SPINNAKER_ERR_SUCCESS {
        return "unknown Spinnaker error".into();
    }
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn check(status: sys::spinError, operation: &'static str) -> Result<()> {
    match status {
        sys::SPINNAKER_ERR_SUCCESS => Ok(()),
        sys::SPINNAKER_ERR_RESOURCE_IN_USE => Err(Error::DeviceInUse(format!(
            "{operation}: {}",
            last_message()
        ))),
        _ => Err(Error::Backend(format!("{operation}: {}", last_message()))),
    }
}

fn cname(name: &str) -> CString {
    CString::new(name).expect("node name contains NUL")
}

/// Refcounted hold on the Spinnaker system singleton.
struct SystemGuard {
    handle: sys::spinSystem,
}

impl SystemGuard {
    fn acquire() -> Result<Self> {
        let mut state = SYSTEM.lock().unwrap();
        if state.1 == 0 {
            let mut handle: sys::spinSystem = std::ptr::null_mut();
            check(
                unsafe { sys::spinSystemGetInstance(&mut handle) },
                "spinSystemGetInstance",
            )?;
            let mut version = sys::spinLibraryVersion::default();
            if unsafe { sys::spinSystemGetLibraryVersion(handle, &mut version) }
                == sys::SPINNAKER_ERR_SUCCESS
            {
                info!(
                    "Spinnaker version: {}.{}.{}.{}",
                    version.major, version.minor, version.type_, version.build
                );
            }
            state.0 = handle as usize;
        }
        state.1 += 1;
        Ok(Self {
            handle: state.0 as sys::spinSystem,
        })
    }
}

impl Drop for SystemGuard {
    fn drop(&mut self) {
        let mut state = SYSTEM.lock().unwrap();
        state.1 -= 1;
        if state.1 == 0 {
            let status = unsafe { sys::spinSystemReleaseInstance(state.0 as sys::spinSystem) };
            if status != sys::SPINNAKER_ERR_SUCCESS {
                warn!(status, "spinSystemReleaseInstance failed");
            }
            state.0 = 0;
        }
    }
}

/// GenICam node-map accessor for one camera.
struct NodeMap {
    handle: sys::spinNodeMapHandle,
}

impl NodeMap {
    fn node(&self, name: &str) -> Result<sys::spinNodeHandle> {
        let cstr = cname(name);
        let mut node: sys::spinNodeHandle = std::ptr::null_mut();
        check(
            unsafe { sys::spinNodeMapGetNode(self.handle, cstr.as_ptr(), &mut node) },
            "spinNodeMapGetNode",
        )?;
        if node.is_null() {
            return Err(Error::Unsupported(format!("node {name} is not present")));
        }
        Ok(node)
    }

    fn float_value(&self, name: &str) -> Result<f64> {
        let node = self.node(name)?;
        let mut value = 0.0;
        check(unsafe { sys::spinFloatGetValue(node, &mut value) }, "spinFloatGetValue")?;
        Ok(value)
    }

    fn float_bounds(&self, name: &str) -> Result<(f64, f64)> {
        let node = self.node(name)?;
        let (mut min, mut max) = (0.0, 0.0);
        check(unsafe { sys::spinFloatGetMin(node, &mut min) }, "spinFloatGetMin")?;
        check(unsafe { sys::spinFloatGetMax(node, &mut max) }, "spinFloatGetMax")?;
        Ok((min, max))
    }

    /// Clamp into the node's range and write. The C surface does not expose
    /// float increments, so only the range is applied.
    fn float_set_checked(&self, name: &str, value: f64) -> Result<()> {
        let (min, max) = self.float_bounds(name)?;
        let node = self.node(name)?;
        check(
            unsafe { sys::spinFloatSetValue(node, snap_to_range(value, min, max, None)) },
            "spinFloatSetValue",
        )
    }

    fn bool_set(&self, name: &str, value: bool) -> Result<()> {
        let node = self.node(name)?;
        check(
            unsafe { sys::spinBooleanSetValue(node, u8::from(value)) },
            "spinBooleanSetValue",
        )
    }

    fn enum_symbolic(&self, name: &str) -> Result<String> {
        let node = self.node(name)?;
        let mut entry: sys::spinNodeHandle = std::ptr::null_mut();
        check(
            unsafe { sys::spinEnumerationGetCurrentEntry(node, &mut entry) },
            "spinEnumerationGetCurrentEntry",
        )?;
        let mut buf = vec![0 as c_char; 128];
        let mut len = buf.len();
        check(
            unsafe { sys::spinEnumerationEntryGetSymbolic(entry, buf.as_mut_ptr(), &mut len) },
            "spinEnumerationEntryGetSymbolic",
        )?;
        Ok(unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }

    fn enum_set(&self, name: &str, entry_name: &str) -> Result<()> {
        let node = self.node(name)?;
        let centry = cname(entry_name);
        let mut entry: sys::spinNodeHandle = std::ptr::null_mut();
        check(
            unsafe { sys::spinEnumerationGetEntryByName(node, centry.as_ptr(), &mut entry) },
            "spinEnumerationGetEntryByName",
        )?;
        let mut value = 0i64;
        check(
            unsafe { sys::spinEnumerationEntryGetIntValue(entry, &mut value) },
            "spinEnumerationEntryGetIntValue",
        )?;
        check(
            unsafe { sys::spinEnumerationSetIntValue(node, value) },
            "spinEnumerationSetIntValue",
        )
    }

    fn command(&self, name: &str) -> Result<()> {
        let node = self.node(name)?;
        check(unsafe { sys::spinCommandExecute(node) }, "spinCommandExecute")
    }

    fn string_value(&self, name: &str) -> Result<String> {
        let node = self.node(name)?;
        let mut buf = vec![0 as c_char; 256];
        let mut len = buf.len();
        check(
            unsafe { sys::spinStringGetValue(node, buf.as_mut_ptr(), &mut len) },
            "spinStringGetValue",
        )?;
        Ok(unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }
}

pub(crate) struct SpinnakerBackend {
    system: SystemGuard,
    debayer: bool,
    buffer_timeout_ms: Option<u64>,
    pixel_format: PixelFormat,
    is_acquiring: bool,
    camera: Option<sys::spinCamera>,
    latched: Option<sys::spinImage>,
}

impl SpinnakerBackend {
    pub(crate) fn new(debayer: bool, buffer_timeout_ms: Option<u64>) -> Result<Self> {
        Ok(Self {
            system: SystemGuard::acquire()?,
            debayer,
            buffer_timeout_ms,
            pixel_format: PixelFormat::Unknown,
            is_acquiring: false,
            camera: None,
            latched: None,
        })
    }

    fn camera(&self) -> Result<sys::spinCamera> {
        self.camera
            .ok_or_else(|| Error::Backend("camera is not open".into()))
    }

    fn node_map(&self) -> Result<NodeMap> {
        let camera = self.camera()?;
        let mut handle: sys::spinNodeMapHandle = std::ptr::null_mut();
        check(
            unsafe { sys::spinCameraGetNodeMap(camera, &mut handle) },
            "spinCameraGetNodeMap",
        )?;
        Ok(NodeMap { handle })
    }

    fn release_latched(&mut self) {
        if let Some(image) = self.latched.take() {
            let status = unsafe { sys::spinImageRelease(image) };
            if status != sys::SPINNAKER_ERR_SUCCESS {
                warn!(status, "spinImageRelease failed");
            }
        }
    }

    /// Read a camera's device-id string from its transport-layer node map.
    fn device_id(camera: sys::spinCamera) -> Result<String> {
        let mut handle: sys::spinNodeMapHandle = std::ptr::null_mut();
        check(
            unsafe { sys::spinCameraGetTLDeviceNodeMap(camera, &mut handle) },
            "spinCameraGetTLDeviceNodeMap",
        )?;
        NodeMap { handle }.string_value("DeviceID")
    }
}

impl CameraBackend for SpinnakerBackend {
    fn open(&mut self, index: usize) -> Result<bool> {
        let mut list: sys::spinCameraList = std::ptr::null_mut();
        check(
            unsafe { sys::spinCameraListCreateEmpty(&mut list) },
            "spinCameraListCreateEmpty",
        )?;

        let open_inner = |backend: &mut Self| -> Result<()> {
            check(
                unsafe { sys::spinSystemGetCameras(backend.system.handle, list) },
                "spinSystemGetCameras",
            )?;
            let mut size = 0usize;
            check(
                unsafe { sys::spinCameraListGetSize(list, &mut size) },
                "spinCameraListGetSize",
            )?;
            if index >= size {
                return Err(Error::invalid_index());
            }

            // Enumeration order is unstable between processes, device-id
            // order is not.
            let mut ids = Vec::with_capacity(size);
            for i in 0..size {
                let mut camera: sys::spinCamera = std::ptr::null_mut();
                check(
                    unsafe { sys::spinCameraListGet(list, i, &mut camera) },
                    "spinCameraListGet",
                )?;
                let id = Self::device_id(camera);
                unsafe { sys::spinCameraRelease(camera) };
                ids.push((id?, i));
            }
            ids.sort();

            let chosen = ids[index].1;
            let mut camera: sys::spinCamera = std::ptr::null_mut();
            check(
                unsafe { sys::spinCameraListGet(list, chosen, &mut camera) },
                "spinCameraListGet",
            )?;
            if let Err(err) = check(unsafe { sys::spinCameraInit(camera) }, "spinCameraInit") {
                unsafe { sys::spinCameraRelease(camera) };
                return Err(err);
            }
            backend.camera = Some(camera);

            let nodes = backend.node_map()?;
            if let Err(err) = nodes
                .enum_set("UserSetSelector", "Default")
                .and_then(|()| nodes.command("UserSetLoad"))
            {
                warn!(error = %err, "Set Default UserSet failed");
            }

            match nodes.enum_symbolic("PixelFormat") {
                Ok(name) => match name.as_str() {
                    "Mono8" => backend.pixel_format = PixelFormat::Mono8,
                    // The sensor reports RGGB but the colour pipeline only
                    // renders correctly with the BGGR mapping. Kept on
                    // purpose; a device-characterisation question.
                    "BayerRG8" => backend.pixel_format = PixelFormat::BayerBG8,
                    other => warn!(format = other, "unknown pixel format"),
                },
                Err(err) => warn!(error = %err, "querying PixelFormat failed"),
            }
            Ok(())
        };

        let result = open_inner(self);
        unsafe {
            sys::spinCameraListClear(list);
            sys::spinCameraListDestroy(list);
        }
        result.map(|()| true)
    }

    fn release(&mut self) {
        if self.is_acquiring {
            if let Err(err) = self.stop_acquisition() {
                warn!(error = %err, "stopping acquisition during release failed");
            }
            self.is_acquiring = false;
        }
        self.release_latched();
        if let Some(camera) = self.camera.take() {
            unsafe {
                sys::spinCameraDeInit(camera);
                sys::spinCameraRelease(camera);
            }
        }
    }

    fn is_opened(&self) -> bool {
        let Some(camera) = self.camera else {
            return false;
        };
        let mut valid: sys::bool8_t = 0;
        unsafe { sys::spinCameraIsValid(camera, &mut valid) } == sys::SPINNAKER_ERR_SUCCESS
            && valid != 0
    }

    fn grab(&mut self) -> Result<bool> {
        if !self.is_acquiring {
            self.start_acquisition()?;
        }
        let camera = self.camera()?;

        let timeout = self
            .buffer_timeout_ms
            .unwrap_or(sys::EVENT_TIMEOUT_INFINITE);
        let mut image: sys::spinImage = std::ptr::null_mut();
        let status = unsafe { sys::spinCameraGetNextImageEx(camera, timeout, &mut image) };
        if status == sys::SPINNAKER_ERR_TIMEOUT {
            return Err(Error::Timeout {
                ms: self.buffer_timeout_ms.unwrap_or(u64::MAX),
            });
        }
        check(status, "spinCameraGetNextImageEx")?;

        self.release_latched();
        self.latched = Some(image);
        Ok(true)
    }

    fn retrieve(&mut self, out: &mut Frame) -> Result<bool> {
        let Some(image) = self.latched.take() else {
            return Ok(false);
        };

        let convert = || -> Result<()> {
            let (mut width, mut height, mut size) = (0usize, 0usize, 0usize);
            check(unsafe { sys::spinImageGetWidth(image, &mut width) }, "spinImageGetWidth")?;
            check(
                unsafe { sys::spinImageGetHeight(image, &mut height) },
                "spinImageGetHeight",
            )?;
            check(
                unsafe { sys::spinImageGetBufferSize(image, &mut size) },
                "spinImageGetBufferSize",
            )?;
            let mut data: *mut std::os::raw::c_void = std::ptr::null_mut();
            check(unsafe { sys::spinImageGetData(image, &mut data) }, "spinImageGetData")?;
            let data = unsafe { std::slice::from_raw_parts(data as *const u8, size) };
            debayer_into(
                self.pixel_format,
                self.debayer,
                RawImage {
                    width: width as u32,
                    height: height as u32,
                    data,
                },
                out,
            )
        };
        let result = convert();

        let status = unsafe { sys::spinImageRelease(image) };
        if status != sys::SPINNAKER_ERR_SUCCESS {
            warn!(status, "spinImageRelease failed");
        }
        result.map(|()| true)
    }

    fn get(&self, prop: Property) -> Result<f64> {
        let nodes = self.node_map()?;
        match prop {
            Property::AutoExposure => Ok(if nodes.enum_symbolic("ExposureAuto")? == "Continuous" {
                1.0
            } else {
                0.0
            }),
            Property::Exposure => nodes.float_value("ExposureTime"),
            Property::Fps => nodes.float_value("AcquisitionFrameRate"),
            Property::Trigger => Ok(if nodes.enum_symbolic("TriggerMode")? == "On" {
                1.0
            } else {
                0.0
            }),
            Property::Line => Err(Error::Unsupported(
                "line state readback is not exposed".into(),
            )),
        }
    }

    fn set(&mut self, prop: Property, value: f64) -> Result<bool> {
        if self.is_acquiring {
            self.stop_acquisition()?;
        }
        let nodes = self.node_map()?;
        match prop {
            Property::AutoExposure => {
                nodes.enum_set(
                    "ExposureAuto",
                    if value == 0.0 { "Off" } else { "Continuous" },
                )?;
            }
            Property::Exposure => {
                let (min, max) = nodes.float_bounds("ExposureTime")?;
                if value < min || value > max {
                    return Err(Error::InvalidArgument(format!(
                        "exposure {value} outside [{min}, {max}]"
                    )));
                }
                nodes.float_set_checked("ExposureTime", value)?;
            }
            Property::Fps => {
                let (min, max) = nodes.float_bounds("AcquisitionFrameRate")?;
                if value < min || value > max {
                    return Err(Error::InvalidArgument(format!(
                        "frame rate {value} outside [{min}, {max}]"
                    )));
                }
                nodes.bool_set("AcquisitionFrameRateEnable", true)?;
                nodes.float_set_checked("AcquisitionFrameRate", value)?;
            }
            Property::Trigger => {
                let source = match value as i64 {
                    0 => "Line0",
                    1 => "Line1",
                    2 => "Line2",
                    3 => "Line3",
                    _ => {
                        nodes.enum_set("TriggerMode", "Off")?;
                        return Ok(true);
                    }
                };
                nodes.enum_set("TriggerSource", source)?;
                // Mode goes on last so a failed activation write leaves the
                // trigger disarmed.
                nodes.enum_set("TriggerActivation", "RisingEdge")?;
                nodes.enum_set("TriggerMode", "On")?;
            }
            Property::Line => {
                nodes.enum_set("LineSelector", "Line2")?;
                nodes.bool_set("V3_3Enable", value as i64 != 0)?;
            }
        }
        Ok(true)
    }

    fn start_acquisition(&mut self) -> Result<()> {
        check(
            unsafe { sys::spinCameraBeginAcquisition(self.camera()?) },
            "spinCameraBeginAcquisition",
        )?;
        self.is_acquiring = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.release_latched();
        check(
            unsafe { sys::spinCameraEndAcquisition(self.camera()?) },
            "spinCameraEndAcquisition",
        )?;
        self.is_acquiring = false;
        Ok(())
    }
}

impl Drop for SpinnakerBackend {
    fn drop(&mut self) {
        self.release();
    }
}
