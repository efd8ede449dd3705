//! Sensor channel model, interlock summary and the unit conversions for
//! each PSCU sensor type.
//!
//! All monitor ADC inputs arrive as a fraction of full scale; each sensor
//! type has its own reference voltage and transfer function.

use core::fmt;

use serde::{Deserialize, Serialize};

pub const TEMP_VREF: f64 = 3.0;
pub const HUMIDITY_VREF: f64 = 5.0;
pub const FAN_VREF: f64 = 5.0;
pub const PUMP_VREF: f64 = 5.0;
pub const POSITION_VREF: f64 = 5.0;

const KELVIN_OFFSET: f64 = 273.15;
/// Temperature sensor output, volts per kelvin.
const TEMP_SENSITIVITY: f64 = 0.005;
const HUMIDITY_ZERO_VOLTS: f64 = 0.8;
const HUMIDITY_SENSITIVITY: f64 = 0.031;
const FAN_FULL_SCALE_VOLTS: f64 = 4.5;
const FAN_MAX_RPM: f64 = 3000.0;
const PUMP_FULL_SCALE_VOLTS: f64 = 4.32;
const PUMP_MAX_FLOW: f64 = 35.0;
const POSITION_VOLTS_PER_MM: f64 = 0.1;

pub fn temperature_celsius(fraction: f64) -> f64 {
    fraction * TEMP_VREF / TEMP_SENSITIVITY - KELVIN_OFFSET
}

pub fn humidity_percent(fraction: f64) -> f64 {
    (fraction * HUMIDITY_VREF - HUMIDITY_ZERO_VOLTS) / HUMIDITY_SENSITIVITY
}

pub fn fan_rpm(fraction: f64) -> f64 {
    (fraction * FAN_VREF / FAN_FULL_SCALE_VOLTS) * FAN_MAX_RPM
}

/// Coolant flow in litres per minute.
pub fn pump_flow(fraction: f64) -> f64 {
    (fraction * PUMP_VREF / PUMP_FULL_SCALE_VOLTS) * PUMP_MAX_FLOW
}

/// Detector position in mm; the sensor reads along the diagonal.
pub fn position_mm(fraction: f64, offset: f64) -> f64 {
    2.0 * (fraction * POSITION_VREF / POSITION_VOLTS_PER_MM) / core::f64::consts::SQRT_2 - offset
}

/// Which side of the set point trips the interlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripMode {
    Over,
    Under,
}

impl fmt::Display for TripMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Over => write!(f, "Over"),
            Self::Under => write!(f, "Under"),
        }
    }
}

/// One monitored quantity with its hardware set point and status flags.
#[derive(Debug, Clone, Serialize)]
pub struct SensorChannel {
    pub name: &'static str,
    pub mode: TripMode,
    pub vref: f64,
    /// Last reading as a fraction of ADC full scale.
    pub raw: f64,
    pub value: f64,
    pub set_point_raw: f64,
    pub set_point: f64,
    pub tripped: bool,
    pub trace: bool,
    pub disabled: bool,
}

impl SensorChannel {
    pub fn new(name: &'static str, mode: TripMode, vref: f64) -> Self {
        Self {
            name,
            mode,
            vref,
            raw: 0.0,
            value: 0.0,
            set_point_raw: 0.0,
            set_point: 0.0,
            tripped: false,
            trace: false,
            disabled: false,
        }
    }

    pub fn volts(&self) -> f64 {
        self.raw * self.vref
    }

    pub fn set_point_volts(&self) -> f64 {
        self.set_point_raw * self.vref
    }

    /// Store a fresh reading. A trapped read (`None`) keeps the last value,
    /// and a disabled channel keeps its last converted value.
    pub(crate) fn update_reading(&mut self, raw: Option<f64>, convert: impl Fn(f64) -> f64) {
        if let Some(raw) = raw {
            self.raw = raw;
            if !self.disabled {
                self.value = convert(raw);
            }
        }
    }

    pub(crate) fn update_set_point(&mut self, raw: Option<f64>, convert: impl Fn(f64) -> f64) {
        if let Some(raw) = raw {
            self.set_point_raw = raw;
            self.set_point = convert(raw);
        }
    }
}

/// Interlock groups, in the order the latch inputs are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterlockCategory {
    Temperature,
    Fan,
    Pump,
    Trace,
    Humidity,
}

impl InterlockCategory {
    pub const ALL: [Self; 5] = [
        Self::Temperature,
        Self::Fan,
        Self::Pump,
        Self::Trace,
        Self::Humidity,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Hardware interlock summary read from the misc GPIO expanders.
///
/// Both `ok` and `latched` are active high: `true` means the group is
/// currently good and has not latched a trip.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InterlockState {
    pub armed: bool,
    pub healthy: bool,
    pub ok: [bool; 5],
    pub latched: [bool; 5],
}

impl InterlockState {
    pub fn state(&self, category: InterlockCategory) -> bool {
        self.ok[category.index()]
    }

    pub fn latched(&self, category: InterlockCategory) -> bool {
        self.latched[category.index()]
    }

    /// True when no group has latched.
    pub fn all_latched(&self) -> bool {
        self.latched.iter().all(|l| *l)
    }
}
