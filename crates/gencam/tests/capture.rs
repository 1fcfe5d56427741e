//! Facade and state-machine tests against the mock fleet.
//!
//! Each test installs its fake devices at a unique index so the tests can
//! run in parallel within one process.

use gencam::mock::{self, MockDevice, NodeRange};
use gencam::{BackendKind, Capture, Error, Frame, PixelFormat, Property};

fn open_capture(index: usize, device: MockDevice) -> (Capture, std::sync::Arc<mock::MockCounters>) {
    let counters = mock::install(index, device);
    let mut capture = Capture::new(false, None);
    assert!(capture.open(index as i32, BackendKind::Mock).unwrap());
    (capture, counters)
}

#[test]
fn open_negative_index_is_invalid() {
    let mut capture = Capture::new(false, None);
    let err = capture.open(-1, BackendKind::Mock).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn open_past_device_count_is_invalid() {
    let mut capture = Capture::new(false, None);
    let err = capture.open(9_999, BackendKind::Mock).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn open_any_tag_is_rejected() {
    let mut capture = Capture::new(false, None);
    let err = capture.open(0, BackendKind::Any).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn open_any_discovery_reports_not_available() {
    // No vendor backend is compiled in and the mock fleet is not part of
    // the discovery order.
    let err = Capture::open_any(false, None).unwrap_err();
    assert!(matches!(err, Error::NotAvailable));
}

#[test]
fn grab_then_retrieve_produces_a_frame() {
    let (mut capture, counters) = open_capture(100, MockDevice::default());

    assert!(capture.grab().unwrap());
    let mut frame = Frame::default();
    assert!(capture.retrieve(&mut frame).unwrap());
    assert_eq!(frame.width(), 64);
    assert_eq!(frame.height(), 48);
    assert_eq!(frame.channels(), 1);
    assert_eq!(counters.grabs(), 1);
    assert_eq!(counters.requeues(), 1);
}

#[test]
fn retrieve_without_grab_returns_false_and_writes_nothing() {
    let (mut capture, _counters) = open_capture(101, MockDevice::default());

    let mut frame = Frame::default();
    assert!(!capture.retrieve(&mut frame).unwrap());
    assert!(frame.is_empty());
}

#[test]
fn set_stops_acquisition_and_grab_restarts_it() {
    let (mut capture, counters) = open_capture(102, MockDevice::default());

    assert!(capture.grab().unwrap());
    assert_eq!(counters.starts(), 1);
    assert_eq!(counters.stops(), 0);

    assert!(capture.set(Property::AutoExposure, 1.0).unwrap());
    assert_eq!(counters.stops(), 1);

    assert!(capture.grab().unwrap());
    assert_eq!(counters.starts(), 2);
}

#[test]
fn exposure_set_snaps_to_increment_within_bounds() {
    let (mut capture, _counters) = open_capture(
        103,
        MockDevice {
            exposure: NodeRange {
                min: 100.0,
                max: 10_000.0,
                increment: 8.0,
            },
            ..MockDevice::default()
        },
    );

    assert!(capture.set(Property::AutoExposure, 0.0).unwrap());
    let requested = 1_003.0;
    assert!(capture.set(Property::Exposure, requested).unwrap());
    let actual = capture.get(Property::Exposure).unwrap();
    assert!(actual <= requested && actual >= requested - 8.0);
    assert_eq!(actual % 8.0, 0.0);
}

#[test]
fn exposure_out_of_range_is_invalid_argument() {
    let (mut capture, _counters) = open_capture(104, MockDevice::default());

    let err = capture.set(Property::Exposure, 10_000_000.0).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = capture.set(Property::Exposure, 1.0).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn fps_set_clamps_to_device_range() {
    let (mut capture, _counters) = open_capture(105, MockDevice::default());

    assert!(capture.set(Property::Fps, 500.0).unwrap());
    assert_eq!(capture.get(Property::Fps).unwrap(), 120.0);
    assert!(capture.set(Property::Fps, 25.0).unwrap());
    assert_eq!(capture.get(Property::Fps).unwrap(), 25.0);
}

#[test]
fn trigger_round_trips() {
    let (mut capture, _counters) = open_capture(106, MockDevice::default());

    assert!(capture.set(Property::Trigger, 1.0).unwrap());
    assert_eq!(capture.get(Property::Trigger).unwrap(), 1.0);
    assert!(capture.set(Property::Trigger, 0.0).unwrap());
    assert_eq!(capture.get(Property::Trigger).unwrap(), 0.0);
}

#[test]
fn auto_exposure_round_trips() {
    let (mut capture, _counters) = open_capture(107, MockDevice::default());

    assert!(capture.set(Property::AutoExposure, 0.0).unwrap());
    assert_eq!(capture.get(Property::AutoExposure).unwrap(), 0.0);
    assert!(capture.set(Property::AutoExposure, 2.0).unwrap());
    assert_eq!(capture.get(Property::AutoExposure).unwrap(), 1.0);
}

#[test]
fn failed_trigger_activation_reverts_mode() {
    let (mut capture, _counters) = open_capture(
        108,
        MockDevice {
            fail_trigger_activation: true,
            ..MockDevice::default()
        },
    );

    let err = capture.set(Property::Trigger, 1.0).unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(capture.get(Property::Trigger).unwrap(), 0.0);
}

#[test]
fn line_is_unsupported_without_gpio() {
    let (mut capture, _counters) = open_capture(109, MockDevice::default());
    let err = capture.set(Property::Line, 1.0).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    let (mut capture, _counters) = open_capture(
        110,
        MockDevice {
            has_line_gpio: true,
            ..MockDevice::default()
        },
    );
    assert!(capture.set(Property::Line, 1.0).unwrap());
    assert_eq!(capture.get(Property::Line).unwrap(), 1.0);
}

#[test]
fn release_is_idempotent_and_stops_acquisition() {
    let (mut capture, counters) = open_capture(111, MockDevice::default());

    assert!(capture.grab().unwrap());
    capture.release();
    capture.release();
    assert!(!capture.is_opened());
    assert_eq!(counters.releases(), 1);
    assert_eq!(counters.stops(), 1);
    // The latched buffer went back to the driver on release.
    assert_eq!(counters.grabs(), counters.requeues());
}

#[test]
fn every_grab_requeues_the_previous_buffer() {
    let (mut capture, counters) = open_capture(112, MockDevice::default());

    assert!(capture.grab().unwrap());
    assert!(capture.grab().unwrap());
    // The first buffer was returned before the second grab completed.
    assert_eq!(counters.requeues(), 1);

    let mut frame = Frame::default();
    assert!(capture.retrieve(&mut frame).unwrap());
    assert_eq!(counters.requeues(), 2);
}

#[test]
fn short_timeout_fails_as_timeout() {
    mock::install(
        113,
        MockDevice {
            grab_delay_ms: 50,
            ..MockDevice::default()
        },
    );
    let mut capture = Capture::new(false, Some(1));
    assert!(capture.open(113, BackendKind::Mock).unwrap());
    let err = capture.grab().unwrap_err();
    assert!(matches!(err, Error::Timeout { ms: 1 }));
}

#[test]
fn exception_mode_off_converts_errors_to_fallbacks() {
    mock::install(114, MockDevice::default());
    let mut capture = Capture::new(false, None);
    capture.set_exception_mode(false);

    assert!(!capture.open(9_998, BackendKind::Mock).unwrap());
    assert_eq!(capture.get(Property::Exposure).unwrap(), 0.0);
    assert!(!capture.grab().unwrap());

    assert!(capture.open(114, BackendKind::Mock).unwrap());
    assert!(!capture.set(Property::Exposure, -5.0).unwrap());
}

#[test]
fn second_open_of_a_claimed_device_reports_in_use() {
    mock::install(115, MockDevice::default());
    let mut first = Capture::new(false, None);
    assert!(first.open(115, BackendKind::Mock).unwrap());

    let mut second = Capture::new(false, None);
    let err = second.open(115, BackendKind::Mock).unwrap_err();
    assert!(err.is_device_in_use());

    first.release();
    assert!(second.open(115, BackendKind::Mock).unwrap());
}

#[test]
fn injected_open_failures_clear_after_the_configured_count() {
    mock::install(
        116,
        MockDevice {
            fail_open_in_use: 2,
            ..MockDevice::default()
        },
    );
    let mut capture = Capture::new(false, None);
    assert!(capture.open(116, BackendKind::Mock).unwrap_err().is_device_in_use());
    assert!(capture.open(116, BackendKind::Mock).unwrap_err().is_device_in_use());
    assert!(capture.open(116, BackendKind::Mock).unwrap());
}

#[test]
fn read_serves_latched_buffer_before_grabbing() {
    let (mut capture, counters) = open_capture(117, MockDevice::default());

    assert!(capture.grab().unwrap());
    let mut frame = Frame::default();
    assert!(capture.read(&mut frame).unwrap());
    assert_eq!(counters.grabs(), 1);

    assert!(capture.read(&mut frame).unwrap());
    assert_eq!(counters.grabs(), 2);
}

#[test]
fn bayer_device_debayers_to_bgr_when_enabled() {
    mock::install(
        118,
        MockDevice {
            pixel_format: PixelFormat::BayerRG8,
            ..MockDevice::default()
        },
    );
    let mut capture = Capture::new(true, None);
    assert!(capture.open(118, BackendKind::Mock).unwrap());

    let mut frame = Frame::default();
    assert!(capture.read(&mut frame).unwrap());
    assert_eq!(frame.channels(), 3);
    assert_eq!(frame.data().len(), 64 * 48 * 3);
}
