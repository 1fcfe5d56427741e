//! Camera properties exposed through `get`/`set`.

use std::fmt;

/// Properties recognised by the capture facade.
///
/// All values travel as `f64`; each backend clamps to the device's range and
/// snaps to its increment before writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    /// 1.0 while the driver's auto-exposure mode is "Continuous", 0.0 when
    /// "Off". Setting any non-zero value enables continuous auto-exposure.
    AutoExposure,
    /// Exposure time in microseconds.
    Exposure,
    /// Frame-rate target in frames per second.
    Fps,
    /// External trigger. 0.0 disables trigger mode; non-zero enables it on a
    /// rising edge. Spinnaker additionally interprets the value 0..3 as the
    /// line number.
    Trigger,
    /// Spinnaker only: 3.3 V supply enable on Line2.
    Line,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Property::AutoExposure => "auto-exposure",
            Property::Exposure => "exposure",
            Property::Fps => "fps",
            Property::Trigger => "trigger",
            Property::Line => "line",
        };
        f.write_str(name)
    }
}
