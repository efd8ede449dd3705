//! Parameter tree: slash-separated path access to a unit's readings and
//! setters, as used by the control service.
//!
//! Reads build the whole tree from the last polled snapshot and walk it;
//! writes are dispatched to the unit's setters by path. Writing an object to
//! a branch applies each of its members to the matching child path.

use embedded_hal::i2c::I2c;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::backplane::{self, Backplane, BackplaneError};
use crate::pscu::quad::{Quad, NUM_CHANNELS};
use crate::pscu::sensors::{InterlockCategory, SensorChannel};
use crate::pscu::{Pscu, PscuError};

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Failed to decode value for {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error(transparent)]
    Pscu(#[from] PscuError),

    #[error(transparent)]
    Backplane(#[from] BackplaneError),
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn decode<T: DeserializeOwned>(path: &[&str], value: &Value) -> Result<T, ParamError> {
    serde_json::from_value(value.clone()).map_err(|e| ParamError::Decode {
        path: path.join("/"),
        reason: e.to_string(),
    })
}

fn index(path: &[&str], part: &str) -> Result<usize, ParamError> {
    part.parse()
        .map_err(|_| ParamError::InvalidPath(path.join("/")))
}

pub trait ParamTree {
    /// Snapshot of every parameter.
    fn snapshot(&self) -> Value;

    /// Write one leaf. `path` is already split into its parts.
    fn set_leaf(&mut self, path: &[&str], value: &Value) -> Result<(), ParamError>;

    /// Read the subtree at `path`, keyed by its last element. The empty path
    /// returns the whole tree.
    fn get(&self, path: &str) -> Result<Value, ParamError> {
        let parts = split(path);
        let mut node = self.snapshot();
        for part in &parts {
            node = match node {
                Value::Object(mut map) => map.remove(*part),
                Value::Array(mut items) => part
                    .parse::<usize>()
                    .ok()
                    .filter(|i| *i < items.len())
                    .map(|i| items.swap_remove(i)),
                _ => None,
            }
            .ok_or_else(|| ParamError::InvalidPath(path.to_string()))?;
        }
        match parts.last() {
            Some(last) => {
                let mut wrapped = Map::new();
                wrapped.insert((*last).to_string(), node);
                Ok(Value::Object(wrapped))
            }
            None => Ok(node),
        }
    }

    fn set(&mut self, path: &str, value: &Value) -> Result<(), ParamError> {
        let parts = split(path);
        self.set_parts(&parts, value)
    }

    #[doc(hidden)]
    fn set_parts(&mut self, parts: &[&str], value: &Value) -> Result<(), ParamError> {
        match value {
            Value::Object(members) => {
                for (key, member) in members {
                    let mut child = parts.to_vec();
                    child.push(key.as_str());
                    self.set_parts(&child, member)?;
                }
                Ok(())
            }
            _ => self.set_leaf(parts, value),
        }
    }
}

fn temperature_json(sensor: &SensorChannel) -> Value {
    json!({
        "temperature": sensor.value,
        "temperature_volts": sensor.volts(),
        "setpoint": sensor.set_point,
        "setpoint_volts": sensor.set_point_volts(),
        "tripped": sensor.tripped,
        "trace": sensor.trace,
        "disabled": sensor.disabled,
        "name": sensor.name,
        "mode": sensor.mode.to_string(),
    })
}

fn humidity_json(sensor: &SensorChannel) -> Value {
    json!({
        "humidity": sensor.value,
        "humidity_volts": sensor.volts(),
        "setpoint": sensor.set_point,
        "setpoint_volts": sensor.set_point_volts(),
        "tripped": sensor.tripped,
        "trace": sensor.trace,
        "disabled": sensor.disabled,
        "name": sensor.name,
        "mode": sensor.mode.to_string(),
    })
}

fn quad_json(quad: &Quad) -> Value {
    let channels: Vec<Value> = quad
        .channels()
        .iter()
        .map(|c| {
            json!({
                "voltage": c.voltage,
                "current": c.current,
                "fusevoltage": c.fuse_voltage,
                "fuseblown": c.fuse_blown,
                "fetfailed": c.fet_failed,
                "enabled": c.enabled,
            })
        })
        .collect();
    json!({ "channels": channels, "supply": quad.get_supply_voltage() })
}

impl<B: I2c> ParamTree for Pscu<B> {
    fn snapshot(&self) -> Value {
        let traces: Map<String, Value> = self
            .quad_traces()
            .iter()
            .enumerate()
            .map(|(q, trace)| (q.to_string(), Value::Bool(*trace)))
            .collect();
        let fan = self.fan();
        let pump = self.pump();

        json!({
            "quad": {
                "quads": self.quads().iter().map(quad_json).collect::<Vec<_>>(),
                "trace": traces,
            },
            "temperature": {
                "sensors": self.temperatures().iter().map(temperature_json).collect::<Vec<_>>(),
                "overall": self.get_state(InterlockCategory::Temperature),
                "latched": self.get_latched(InterlockCategory::Temperature),
            },
            "humidity": {
                "sensors": self.humidities().iter().map(humidity_json).collect::<Vec<_>>(),
                "overall": self.get_state(InterlockCategory::Humidity),
                "latched": self.get_latched(InterlockCategory::Humidity),
            },
            "fan": {
                "target": self.get_fan_target(),
                "currentspeed": fan.value,
                "currentspeed_volts": fan.volts(),
                "setpoint": fan.set_point,
                "setpoint_volts": fan.set_point_volts(),
                "tripped": fan.tripped,
                "overall": self.get_state(InterlockCategory::Fan),
                "latched": self.get_latched(InterlockCategory::Fan),
                "mode": fan.mode.to_string(),
            },
            "pump": {
                "flow": pump.value,
                "flow_volts": pump.volts(),
                "setpoint": pump.set_point,
                "setpoint_volts": pump.set_point_volts(),
                "tripped": pump.tripped,
                "overall": self.get_state(InterlockCategory::Pump),
                "latched": self.get_latched(InterlockCategory::Pump),
                "mode": pump.mode.to_string(),
            },
            "trace": {
                "overall": self.get_state(InterlockCategory::Trace),
                "latched": self.get_latched(InterlockCategory::Trace),
            },
            "position": self.get_position(),
            "position_volts": self.get_position_volts(),
            "overall": self.get_health(),
            "latched": self.interlock().all_latched(),
            "armed": self.get_armed(),
            "allEnabled": self.get_all_enabled(),
            "enableInterval": self.get_enable_interval().as_secs_f64(),
            "displayError": self.get_display_error(),
        })
    }

    fn set_leaf(&mut self, path: &[&str], value: &Value) -> Result<(), ParamError> {
        match path {
            ["armed"] => self.set_armed(decode(path, value)?)?,
            ["allEnabled"] => self.enable_all(decode(path, value)?)?,
            ["fan", "target"] => self.set_fan_target(decode(path, value)?)?,
            ["quad", "quads", quad, "channels", channel, "enabled"] => {
                let quad = index(path, quad)?;
                let channel = index(path, channel)?;
                if quad >= self.quads().len() || channel >= NUM_CHANNELS {
                    return Err(ParamError::InvalidPath(path.join("/")));
                }
                self.set_quad_enable(quad, channel, decode(path, value)?)?;
            }
            _ => return Err(ParamError::InvalidPath(path.join("/"))),
        }
        Ok(())
    }
}

impl<B: I2c> ParamTree for Backplane<B> {
    fn snapshot(&self) -> Value {
        let current_voltage: Vec<Value> = (0..backplane::NUM_MONITORS)
            .map(|i| {
                json!({
                    "name": backplane::ADC_NAMES[i],
                    "current": self.get_current(i).unwrap_or_default(),
                    "voltage": self.get_voltage(i).unwrap_or_default(),
                })
            })
            .collect();
        let resistors: Vec<Value> = (0..backplane::NUM_RESISTORS)
            .map(|i| {
                json!({
                    "name": backplane::RESISTOR_NAMES[i],
                    "units": backplane::RESISTOR_UNITS[i],
                    "value": self.get_resistor_value(i).unwrap_or_default(),
                })
            })
            .collect();

        json!({
            "clock": self.get_clock_frequency(),
            "psu_enabled": self.get_psu_enable(),
            "power_good": self.power_good(),
            "current_voltage": current_voltage,
            "resistors": resistors,
        })
    }

    fn set_leaf(&mut self, path: &[&str], value: &Value) -> Result<(), ParamError> {
        match path {
            ["clock"] => self.set_clock_frequency(decode(path, value)?)?,
            ["psu_enabled"] => self.set_psu_enable(decode(path, value)?)?,
            ["resistors", resistor, "value"] => {
                let resistor = index(path, resistor)?;
                if resistor >= backplane::NUM_RESISTORS {
                    return Err(ParamError::InvalidPath(path.join("/")));
                }
                self.set_resistor_value(resistor, decode(path, value)?)?;
            }
            _ => return Err(ParamError::InvalidPath(path.join("/"))),
        }
        Ok(())
    }
}
