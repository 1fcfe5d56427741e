//! Raw bindings to the Spinnaker C library.
//!
//! Handles are opaque pointers, every call returns a `spinError`, string
//! outputs use caller-provided buffers with in/out lengths.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_uint, c_void};

pub type spinError = i32;
pub type bool8_t = u8;

pub type spinSystem = *mut c_void;
pub type spinCameraList = *mut c_void;
pub type spinCamera = *mut c_void;
pub type spinImage = *mut c_void;
pub type spinNodeMapHandle = *mut c_void;
pub type spinNodeHandle = *mut c_void;

pub const SPINNAKER_ERR_SUCCESS: spinError = 0;
pub const SPINNAKER_ERR_RESOURCE_IN_USE: spinError = -1020;
pub const SPINNAKER_ERR_TIMEOUT: spinError = -1011;

pub const EVENT_TIMEOUT_INFINITE: u64 = u64::MAX;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct spinLibraryVersion {
    pub major: c_uint,
    pub minor: c_uint,
    pub type_: c_uint,
    pub build: c_uint,
}

#[link(name = "SpinnakerC")]
extern "C" {
    pub fn spinSystemGetInstance(system: *mut spinSystem) -> spinError;
    pub fn spinSystemReleaseInstance(system: spinSystem) -> spinError;
    pub fn spinSystemGetLibraryVersion(
        system: spinSystem,
        version: *mut spinLibraryVersion,
    ) -> spinError;
    pub fn spinSystemGetCameras(system: spinSystem, camera_list: spinCameraList) -> spinError;

    pub fn spinCameraListCreateEmpty(camera_list: *mut spinCameraList) -> spinError;
    pub fn spinCameraListGetSize(camera_list: spinCameraList, size: *mut usize) -> spinError;
    pub fn spinCameraListGet(
        camera_list: spinCameraList,
        index: usize,
        camera: *mut spinCamera,
    ) -> spinError;
    pub fn spinCameraListClear(camera_list: spinCameraList) -> spinError;
    pub fn spinCameraListDestroy(camera_list: spinCameraList) -> spinError;

    pub fn spinCameraInit(camera: spinCamera) -> spinError;
    pub fn spinCameraDeInit(camera: spinCamera) -> spinError;
    pub fn spinCameraRelease(camera: spinCamera) -> spinError;
    pub fn spinCameraIsValid(camera: spinCamera, valid: *mut bool8_t) -> spinError;
    pub fn spinCameraGetNodeMap(camera: spinCamera, node_map: *mut spinNodeMapHandle)
        -> spinError;
    pub fn spinCameraGetTLDeviceNodeMap(
        camera: spinCamera,
        node_map: *mut spinNodeMapHandle,
    ) -> spinError;
    pub fn spinCameraBeginAcquisition(camera: spinCamera) -> spinError;
    pub fn spinCameraEndAcquisition(camera: spinCamera) -> spinError;
    pub fn spinCameraGetNextImageEx(
        camera: spinCamera,
        timeout_ms: u64,
        image: *mut spinImage,
    ) -> spinError;

    pub fn spinImageGetWidth(image: spinImage, width: *mut usize) -> spinError;
    pub fn spinImageGetHeight(image: spinImage, height: *mut usize) -> spinError;
    pub fn spinImageGetBufferSize(image: spinImage, size: *mut usize) -> spinError;
    pub fn spinImageGetData(image: spinImage, data: *mut *mut c_void) -> spinError;
    pub fn spinImageRelease(image: spinImage) -> spinError;

    pub fn spinNodeMapGetNode(
        node_map: spinNodeMapHandle,
        name: *const c_char,
        node: *mut spinNodeHandle,
    ) -> spinError;
    pub fn spinNodeIsAvailable(node: spinNodeHandle, available: *mut bool8_t) -> spinError;
    pub fn spinNodeIsReadable(node: spinNodeHandle, readable: *mut bool8_t) -> spinError;
    pub fn spinNodeIsWritable(node: spinNodeHandle, writable: *mut bool8_t) -> spinError;

    pub fn spinFloatGetValue(node: spinNodeHandle, value: *mut f64) -> spinError;
    pub fn spinFloatSetValue(node: spinNodeHandle, value: f64) -> spinError;
    pub fn spinFloatGetMin(node: spinNodeHandle, min: *mut f64) -> spinError;
    pub fn spinFloatGetMax(node: spinNodeHandle, max: *mut f64) -> spinError;

    pub fn spinBooleanGetValue(node: spinNodeHandle, value: *mut bool8_t) -> spinError;
    pub fn spinBooleanSetValue(node: spinNodeHandle, value: bool8_t) -> spinError;

    pub fn spinStringGetValue(
        node: spinNodeHandle,
        value: *mut c_char,
        length: *mut usize,
    ) -> spinError;

    pub fn spinEnumerationGetCurrentEntry(
        node: spinNodeHandle,
        entry: *mut spinNodeHandle,
    ) -> spinError;
    pub fn spinEnumerationGetEntryByName(
        node: spinNodeHandle,
        name: *const c_char,
        entry: *mut spinNodeHandle,
    ) -> spinError;
    pub fn spinEnumerationSetIntValue(node: spinNodeHandle, value: i64) -> spinError;
    pub fn spinEnumerationEntryGetIntValue(entry: spinNodeHandle, value: *mut i64) -> spinError;
    pub fn spinEnumerationEntryGetSymbolic(
        entry: spinNodeHandle,
        symbolic: *mut c_char,
        length: *mut usize,
    ) -> spinError;

    pub fn spinCommandExecute(node: spinNodeHandle) -> spinError;

    pub fn spinErrorGetLastMessage(message: *mut c_char, length: *mut usize) -> spinError;
}
