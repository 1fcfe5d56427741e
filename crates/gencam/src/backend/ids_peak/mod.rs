//! IDS peak backend.
//!
//! Drives cameras through the peak comfort C library. Generic device nodes
//! go through the GFA (generic feature access) calls so the property
//! translation can validate access status and snap values the same way the
//! vendor's own node map does.

mod sys;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::backend::{snap_to_range, CameraBackend};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pixel_format::{debayer_into, PixelFormat, RawImage};
use crate::property::Property;

/// Live backend instances, guarding the process-wide library init.
static LIBRARY_REFS: Mutex<usize> = Mutex::new(0);

/// Refcounted hold on `peak_Library_Init`/`peak_Library_Exit`.
struct LibraryGuard;

impl LibraryGuard {
    fn acquire() -> Result<Self> {
        let mut refs = LIBRARY_REFS.lock().unwrap();
        if *refs == 0 {
            check(unsafe { sys::peak_Library_Init() }, "peak_Library_Init")?;
            info!("IDS peak library initialised");
        }
        *refs += 1;
        Ok(Self)
    }
}

impl Drop for LibraryGuard {
    fn drop(&mut self) {
        let mut refs = LIBRARY_REFS.lock().unwrap();
        *refs -= 1;
        if *refs == 0 {
            let status = unsafe { sys::peak_Library_Exit() };
            if status != sys::PEAK_STATUS_SUCCESS {
                warn!(status, "peak_Library_Exit failed");
            }
        }
    }
}

/// Fetch the SDK's description of its most recent failure.
fn last_error() -> String {
    let mut code: sys::peak_status = sys::PEAK_STATUS_SUCCESS;
    let mut buf = vec![0 as c_char; 512];
    let mut len = buf.len();
    let status = unsafe { sys::peak_Library_GetLastError(&mut code, buf.as_mut_ptr(), &mut len) };
    if status != sys::PEAK_STATUS_SUCCESS {
        return format!("status {code}");
    }
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Translate a `peak_status` into the crate error taxonomy.
fn check(status: sys::peak_status, operation: &'static str) -> Result<()> {
    match status {
        sys::PEAK_STATUS_SUCCESS => Ok(()),
        sys::PEAK_STATUS_ACCESS_DENIED => Err(Error::DeviceInUse(format!(
            "{operation}: {}",
            last_error()
        ))),
        _ => Err(Error::Backend(format!("{operation}: {}", last_error()))),
    }
}

fn cname(name: &'static str) -> CString {
    CString::new(name).expect("feature name contains NUL")
}

/// Remote-device node map accessor.
struct Nodes {
    camera: sys::peak_camera_handle,
}

impl Nodes {
    fn access(&self, name: &'static str) -> sys::peak_access_status {
        let name = cname(name);
        unsafe {
            sys::peak_GFA_Feature_GetAccessStatus(
                self.camera,
                sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                name.as_ptr(),
            )
        }
    }

    fn readable(&self, name: &'static str) -> bool {
        matches!(
            self.access(name),
            sys::PEAK_ACCESS_READONLY | sys::PEAK_ACCESS_READWRITE
        )
    }

    fn writeable(&self, name: &'static str) -> bool {
        matches!(
            self.access(name),
            sys::PEAK_ACCESS_WRITEONLY | sys::PEAK_ACCESS_READWRITE
        )
    }

    fn implemented(&self, name: &'static str) -> bool {
        let name = cname(name);
        unsafe {
            sys::peak_GFA_Feature_IsImplemented(
                self.camera,
                sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                name.as_ptr(),
            ) != 0
        }
    }

    fn float_get(&self, name: &'static str) -> Result<f64> {
        let cstr = cname(name);
        let mut value = 0.0;
        check(
            unsafe {
                sys::peak_GFA_Float_Get(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    &mut value,
                )
            },
            name,
        )?;
        Ok(value)
    }

    fn float_range(&self, name: &'static str) -> Result<(f64, f64)> {
        let cstr = cname(name);
        let (mut min, mut max) = (0.0, 0.0);
        check(
            unsafe {
                sys::peak_GFA_Float_GetRange(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    &mut min,
                    &mut max,
                )
            },
            name,
        )?;
        Ok((min, max))
    }

    fn float_increment(&self, name: &'static str) -> Option<f64> {
        let cstr = cname(name);
        let mut inc = 0.0;
        let status = unsafe {
            sys::peak_GFA_Float_GetIncrement(
                self.camera,
                sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                cstr.as_ptr(),
                &mut inc,
            )
        };
        (status == sys::PEAK_STATUS_SUCCESS && inc > 0.0).then_some(inc)
    }

    /// Snap to the node's increment and range, then write.
    fn float_set_checked(&self, name: &'static str, value: f64) -> Result<()> {
        let (min, max) = self.float_range(name)?;
        let value = snap_to_range(value, min, max, self.float_increment(name));
        let cstr = cname(name);
        check(
            unsafe {
                sys::peak_GFA_Float_Set(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    value,
                )
            },
            name,
        )
    }

    fn int_get(&self, name: &'static str) -> Result<i64> {
        let cstr = cname(name);
        let mut value = 0;
        check(
            unsafe {
                sys::peak_GFA_Integer_Get(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    &mut value,
                )
            },
            name,
        )?;
        Ok(value)
    }

    fn int_set(&self, name: &'static str, value: i64) -> Result<()> {
        let cstr = cname(name);
        check(
            unsafe {
                sys::peak_GFA_Integer_Set(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    value,
                )
            },
            name,
        )
    }

    fn bool_get(&self, name: &'static str) -> Result<bool> {
        let cstr = cname(name);
        let mut value = 0u8;
        check(
            unsafe {
                sys::peak_GFA_Boolean_Get(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    &mut value,
                )
            },
            name,
        )?;
        Ok(value != 0)
    }

    fn bool_set(&self, name: &'static str, value: bool) -> Result<()> {
        let cstr = cname(name);
        check(
            unsafe {
                sys::peak_GFA_Boolean_Set(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    u8::from(value),
                )
            },
            name,
        )
    }

    fn enum_get(&self, name: &'static str) -> Result<String> {
        let cstr = cname(name);
        let mut buf = vec![0 as c_char; 128];
        let mut len = buf.len();
        check(
            unsafe {
                sys::peak_GFA_Enumeration_GetSelectedEntry(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    buf.as_mut_ptr(),
                    &mut len,
                )
            },
            name,
        )?;
        Ok(unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }

    fn enum_set(&self, name: &'static str, entry: &'static str) -> Result<()> {
        let cstr = cname(name);
        let centry = cname(entry);
        check(
            unsafe {
                sys::peak_GFA_Enumeration_SetSelectedEntry(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                    centry.as_ptr(),
                )
            },
            name,
        )
    }

    fn command(&self, name: &'static str) -> Result<()> {
        let cstr = cname(name);
        check(
            unsafe {
                sys::peak_GFA_Command_Execute(
                    self.camera,
                    sys::PEAK_GFA_MODULE_REMOTE_DEVICE,
                    cstr.as_ptr(),
                )
            },
            name,
        )
    }
}

pub(crate) struct IdsPeakBackend {
    _library: LibraryGuard,
    debayer: bool,
    buffer_timeout_ms: Option<u64>,
    pixel_format: PixelFormat,
    is_acquiring: bool,
    camera: Option<sys::peak_camera_handle>,
    latched: Option<sys::peak_frame_handle>,
}

impl IdsPeakBackend {
    pub(crate) fn new(debayer: bool, buffer_timeout_ms: Option<u64>) -> Result<Self> {
        Ok(Self {
            _library: LibraryGuard::acquire()?,
            debayer,
            buffer_timeout_ms,
            pixel_format: PixelFormat::Unknown,
            is_acquiring: false,
            camera: None,
            latched: None,
        })
    }

    fn camera(&self) -> Result<sys::peak_camera_handle> {
        self.camera
            .ok_or_else(|| Error::Backend("camera is not open".into()))
    }

    fn nodes(&self) -> Result<Nodes> {
        Ok(Nodes {
            camera: self.camera()?,
        })
    }

    /// Hand a latched frame back to the driver queue.
    fn requeue_latched(&mut self) {
        if let (Some(frame), Some(camera)) = (self.latched.take(), self.camera) {
            let status = unsafe { sys::peak_Frame_Release(camera, frame) };
            if status != sys::PEAK_STATUS_SUCCESS {
                warn!(status, "releasing latched frame failed");
            }
        }
    }
}

impl CameraBackend for IdsPeakBackend {
    fn open(&mut self, index: usize) -> Result<bool> {
        let mut count = 0usize;
        check(
            unsafe { sys::peak_CameraList_Update(&mut count) },
            "peak_CameraList_Update",
        )?;
        if index >= count {
            return Err(Error::invalid_index());
        }

        let mut list = vec![sys::peak_camera_descriptor::default(); count];
        check(
            unsafe { sys::peak_CameraList_Get(list.as_mut_ptr(), &mut count) },
            "peak_CameraList_Get",
        )?;

        let mut camera: sys::peak_camera_handle = std::ptr::null_mut();
        check(
            unsafe { sys::peak_Camera_Open(list[index].cameraID, &mut camera) },
            "peak_Camera_Open",
        )?;
        self.camera = Some(camera);

        let nodes = Nodes { camera };

        match nodes.int_get("PayloadSize") {
            // The comfort layer sizes its announced buffer pool from this
            // when acquisition starts.
            Ok(payload) => debug!(payload, "device payload size"),
            Err(err) => warn!(error = %err, "querying PayloadSize failed"),
        }

        if let Err(err) = nodes
            .enum_set("UserSetSelector", "Default")
            .and_then(|()| nodes.command("UserSetLoad"))
        {
            warn!(error = %err, "Set Default UserSet failed");
        }

        match nodes.enum_get("PixelFormat") {
            Ok(name) => match name.as_str() {
                "Mono8" => self.pixel_format = PixelFormat::Mono8,
                "BayerRG8" => self.pixel_format = PixelFormat::BayerRG8,
                other => warn!(format = other, "unknown pixel format"),
            },
            Err(err) => warn!(error = %err, "querying PixelFormat failed"),
        }

        Ok(true)
    }

    fn release(&mut self) {
        if self.is_acquiring {
            if let Err(err) = self.stop_acquisition() {
                warn!(error = %err, "stopping acquisition during release failed");
            }
            self.is_acquiring = false;
        }
        self.requeue_latched();
        if let Some(camera) = self.camera.take() {
            let status = unsafe { sys::peak_Camera_Close(camera) };
            if status != sys::PEAK_STATUS_SUCCESS {
                warn!(status, "peak_Camera_Close failed");
            }
        }
    }

    fn is_opened(&self) -> bool {
        self.camera.is_some()
    }

    fn grab(&mut self) -> Result<bool> {
        if !self.is_acquiring {
            self.start_acquisition()?;
        }
        let camera = self.camera()?;

        let timeout = self
            .buffer_timeout_ms
            .map_or(sys::PEAK_INFINITE, |ms| ms as u32);
        let mut frame: sys::peak_frame_handle = std::ptr::null_mut();
        let status = unsafe { sys::peak_Acquisition_WaitForFrame(camera, timeout, &mut frame) };
        if status == sys::PEAK_STATUS_TIMEOUT {
            return Err(Error::Timeout {
                ms: self.buffer_timeout_ms.unwrap_or(u64::MAX),
            });
        }
        check(status, "peak_Acquisition_WaitForFrame")?;

        self.requeue_latched();
        self.latched = Some(frame);
        Ok(true)
    }

    fn retrieve(&mut self, out: &mut Frame) -> Result<bool> {
        let Some(frame) = self.latched.take() else {
            return Ok(false);
        };
        let camera = self.camera()?;

        let convert = || -> Result<()> {
            let mut roi = sys::peak_roi::default();
            check(
                unsafe { sys::peak_Frame_ROI_Get(frame, &mut roi) },
                "peak_Frame_ROI_Get",
            )?;
            let mut buffer = sys::peak_buffer {
                memoryAddress: std::ptr::null_mut(),
                memorySize: 0,
                userContext: std::ptr::null_mut(),
            };
            check(
                unsafe { sys::peak_Frame_Buffer_Get(frame, &mut buffer) },
                "peak_Frame_Buffer_Get",
            )?;
            let data =
                unsafe { std::slice::from_raw_parts(buffer.memoryAddress, buffer.memorySize) };
            debayer_into(
                self.pixel_format,
                self.debayer,
                RawImage {
                    width: roi.size.width,
                    height: roi.size.height,
                    data,
                },
                out,
            )
        };
        let result = convert();

        let status = unsafe { sys::peak_Frame_Release(camera, frame) };
        if status != sys::PEAK_STATUS_SUCCESS {
            warn!(status, "peak_Frame_Release failed");
        }
        result.map(|()| true)
    }

    fn get(&self, prop: Property) -> Result<f64> {
        let nodes = self.nodes()?;
        match prop {
            Property::AutoExposure => {
                if !nodes.readable("ExposureAuto") {
                    return Ok(0.0);
                }
                Ok(if nodes.enum_get("ExposureAuto")? == "Continuous" {
                    1.0
                } else {
                    0.0
                })
            }
            Property::Exposure => {
                if !nodes.readable("ExposureTime") {
                    return Ok(0.0);
                }
                nodes.float_get("ExposureTime")
            }
            Property::Fps => {
                if !nodes.readable("AcquisitionFrameRate") {
                    return Ok(0.0);
                }
                nodes.float_get("AcquisitionFrameRate")
            }
            Property::Trigger => {
                if !nodes.readable("TriggerMode") {
                    return Ok(0.0);
                }
                Ok(if nodes.enum_get("TriggerMode")? == "On" {
                    1.0
                } else {
                    0.0
                })
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
        let nodes = self.nodes()?;
        match prop {
            Property::AutoExposure => {
                if !nodes.writeable("ExposureAuto") {
                    return Err(Error::Backend("ExposureAuto is not writeable".into()));
                }
                nodes.enum_set("ExposureAuto", if value == 0.0 { "Off" } else { "Continuous" })?;
            }
            Property::Exposure => {
                let (min, max) = nodes.float_range("ExposureTime")?;
                if value < min || value > max {
                    return Err(Error::InvalidArgument(format!(
                        "exposure {value} outside [{min}, {max}]"
                    )));
                }
                if !nodes.writeable("ExposureTime") {
                    return Err(Error::Backend("ExposureTime is not writeable".into()));
                }
                nodes.float_set_checked("ExposureTime", value)?;
            }
            Property::Fps => {
                let has_target_enable = nodes.implemented("AcquisitionFrameRateTargetEnable");
                let has_target = nodes.implemented("AcquisitionFrameRateTarget");
                let has_rate = nodes.implemented("AcquisitionFrameRate");

                if has_target_enable && has_target {
                    if !nodes.readable("AcquisitionFrameRateTargetEnable")
                        || !nodes.writeable("AcquisitionFrameRateTargetEnable")
                    {
                        return Err(Error::Backend(
                            "AcquisitionFrameRateTargetEnable is not accessible".into(),
                        ));
                    }
                    if nodes.bool_get("AcquisitionFrameRateTargetEnable")? {
                        nodes.bool_set("AcquisitionFrameRateTargetEnable", false)?;
                    }
                    if !nodes.writeable("AcquisitionFrameRateTarget") {
                        return Err(Error::Backend(
                            "AcquisitionFrameRateTarget is not writeable".into(),
                        ));
                    }
                    nodes.float_set_checked("AcquisitionFrameRateTarget", value)?;
                    nodes.bool_set("AcquisitionFrameRateTargetEnable", true)?;
                } else if has_rate {
                    if !nodes.writeable("AcquisitionFrameRate") {
                        return Err(Error::Backend(
                            "AcquisitionFrameRate is not writeable".into(),
                        ));
                    }
                    nodes.float_set_checked("AcquisitionFrameRate", value)?;
                } else {
                    return Err(Error::Unsupported(
                        "device exposes no frame-rate node".into(),
                    ));
                }
            }
            Property::Trigger => {
                if !nodes.writeable("TriggerMode") {
                    return Err(Error::Backend("TriggerMode is not writeable".into()));
                }
                if value == 0.0 {
                    nodes.enum_set("TriggerMode", "Off")?;
                } else {
                    if !nodes.writeable("TriggerSource") {
                        return Err(Error::Backend("TriggerSource is not writeable".into()));
                    }
                    nodes.enum_set("TriggerMode", "On")?;
                    nodes.enum_set("TriggerSource", "Line0")?;

                    if !nodes.writeable("TriggerActivation") {
                        // Roll the mode back so the camera is not left
                        // waiting on an edge nobody configured.
                        nodes.enum_set("TriggerMode", "Off")?;
                        return Err(Error::Backend(
                            "TriggerActivation is not writeable".into(),
                        ));
                    }
                    nodes.enum_set("TriggerActivation", "RisingEdge")?;
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
        let camera = self.camera()?;
        check(
            unsafe { sys::peak_Acquisition_Start(camera, sys::PEAK_INFINITE) },
            "peak_Acquisition_Start",
        )?;
        let nodes = self.nodes()?;
        nodes.int_set("TLParamsLocked", 1)?;
        nodes.command("AcquisitionStart")?;
        self.is_acquiring = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        self.requeue_latched();
        if let Some(camera) = self.camera {
            let nodes = Nodes { camera };
            nodes.command("AcquisitionStop")?;
            nodes.int_set("TLParamsLocked", 0)?;
            check(
                unsafe { sys::peak_Acquisition_Stop(camera) },
                "peak_Acquisition_Stop",
            )?;
        }
        self.is_acquiring = false;
        Ok(())
    }
}

impl Drop for IdsPeakBackend {
    fn drop(&mut self) {
        self.release();
    }
}
