//! Raw bindings to the IDS peak comfort C library.
//!
//! Only the subset the backend drives is declared. Handles are opaque
//! pointers; every call reports a `peak_status` and the last error message
//! is fetched separately.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_void};

pub type peak_status = i32;
pub type peak_camera_id = u64;
pub type peak_camera_handle = *mut c_void;
pub type peak_frame_handle = *mut c_void;
pub type peak_access_status = i32;
pub type peak_gfa_module = i32;

pub const PEAK_STATUS_SUCCESS: peak_status = 0;
pub const PEAK_STATUS_ACCESS_DENIED: peak_status = -9;
pub const PEAK_STATUS_TIMEOUT: peak_status = -10;

pub const PEAK_ACCESS_READONLY: peak_access_status = 3;
pub const PEAK_ACCESS_WRITEONLY: peak_access_status = 4;
pub const PEAK_ACCESS_READWRITE: peak_access_status = 5;

pub const PEAK_GFA_MODULE_REMOTE_DEVICE: peak_gfa_module = 3;
pub const PEAK_GFA_MODULE_DATA_STREAM: peak_gfa_module = 4;

pub const PEAK_INFINITE: u32 = 0xFFFF_FFFF;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct peak_camera_descriptor {
    pub cameraID: peak_camera_id,
    pub cameraType: i32,
    pub modelName: [c_char; 256],
    pub serialNumber: [c_char; 256],
}

impl Default for peak_camera_descriptor {
    fn default() -> Self {
        Self {
            cameraID: 0,
            cameraType: 0,
            modelName: [0; 256],
            serialNumber: [0; 256],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct peak_buffer {
    pub memoryAddress: *mut u8,
    pub memorySize: usize,
    pub userContext: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct peak_position {
    pub x: u32,
    pub y: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct peak_size {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct peak_roi {
    pub offset: peak_position,
    pub size: peak_size,
}

#[link(name = "ids_peak_comfort_c")]
extern "C" {
    pub fn peak_Library_Init() -> peak_status;
    pub fn peak_Library_Exit() -> peak_status;
    pub fn peak_Library_GetLastError(
        last_error_code: *mut peak_status,
        error_description: *mut c_char,
        error_description_size: *mut usize,
    ) -> peak_status;

    pub fn peak_CameraList_Update(camera_count: *mut usize) -> peak_status;
    pub fn peak_CameraList_Get(
        camera_list: *mut peak_camera_descriptor,
        camera_count: *mut usize,
    ) -> peak_status;

    pub fn peak_Camera_Open(
        camera_id: peak_camera_id,
        camera_handle: *mut peak_camera_handle,
    ) -> peak_status;
    pub fn peak_Camera_Close(camera_handle: peak_camera_handle) -> peak_status;

    pub fn peak_Acquisition_Start(
        camera_handle: peak_camera_handle,
        number_of_frames: u32,
    ) -> peak_status;
    pub fn peak_Acquisition_Stop(camera_handle: peak_camera_handle) -> peak_status;
    pub fn peak_Acquisition_WaitForFrame(
        camera_handle: peak_camera_handle,
        timeout_ms: u32,
        frame_handle: *mut peak_frame_handle,
    ) -> peak_status;

    pub fn peak_Frame_Buffer_Get(
        frame_handle: peak_frame_handle,
        buffer: *mut peak_buffer,
    ) -> peak_status;
    pub fn peak_Frame_ROI_Get(frame_handle: peak_frame_handle, roi: *mut peak_roi) -> peak_status;
    pub fn peak_Frame_Release(
        camera_handle: peak_camera_handle,
        frame_handle: peak_frame_handle,
    ) -> peak_status;

    pub fn peak_GFA_Feature_GetAccessStatus(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
    ) -> peak_access_status;

    pub fn peak_GFA_Float_Get(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        value: *mut f64,
    ) -> peak_status;
    pub fn peak_GFA_Float_Set(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        value: f64,
    ) -> peak_status;
    pub fn peak_GFA_Float_GetRange(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        min: *mut f64,
        max: *mut f64,
    ) -> peak_status;
    pub fn peak_GFA_Float_GetIncrement(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        increment: *mut f64,
    ) -> peak_status;

    pub fn peak_GFA_Integer_Get(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        value: *mut i64,
    ) -> peak_status;
    pub fn peak_GFA_Integer_Set(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        value: i64,
    ) -> peak_status;

    pub fn peak_GFA_Boolean_Get(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        value: *mut u8,
    ) -> peak_status;
    pub fn peak_GFA_Boolean_Set(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        value: u8,
    ) -> peak_status;

    pub fn peak_GFA_Enumeration_GetSelectedEntry(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        symbolic_value: *mut c_char,
        symbolic_value_size: *mut usize,
    ) -> peak_status;
    pub fn peak_GFA_Enumeration_SetSelectedEntry(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
        symbolic_value: *const c_char,
    ) -> peak_status;

    pub fn peak_GFA_Command_Execute(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
    ) -> peak_status;

    pub fn peak_GFA_Feature_IsImplemented(
        camera_handle: peak_camera_handle,
        module: peak_gfa_module,
        feature_name: *const c_char,
    ) -> u8;
}
