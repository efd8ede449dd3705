//! LPD quad box: four 48 V output channels behind one GPIO expander and two ADCs.
//!
//! Channel enables are toggle inputs on the box, so [`Quad::set_enables`] only
//! pulses the channels whose polled state differs from the request.

use embedded_hal::i2c::I2c;
use heapless::Vec;
use serde::Serialize;
use tracing::debug;

use super::topology::{QUAD_ADC_FUSE, QUAD_ADC_POWER, QUAD_GPIO};
use super::PscuError;
use crate::drivers::{Ad7998, Direction, Mcp23008, Tca9548};
use crate::i2c::{I2cError, I2cTree, NodeId};

pub const NUM_CHANNELS: usize = 4;
pub const SUPPLY_VOLTAGE_NOMINAL: f64 = 48.0;
pub const FUSE_BLOWN_DELTA: f64 = 2.0;
pub const FET_FAILED_DELTA: f64 = 5.0;

/// Divider and ADC reference: 5 V full scale, 1:16 on voltage sense lines.
const VOLTAGE_SCALE: f64 = 5.0 * 16.0;
/// 5 V full scale, 4 A per volt on current sense lines.
const CURRENT_SCALE: f64 = 5.0 * 4.0;
const SUPPLY_INPUT: u8 = 4;
const ENABLE_STATUS_PINS: [u8; NUM_CHANNELS] = [4, 5, 6, 7];

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QuadChannel {
    pub voltage: f64,
    pub current: f64,
    pub fuse_voltage: f64,
    pub enabled: bool,
    pub fuse_blown: bool,
    pub fet_failed: bool,
}

impl QuadChannel {
    /// Derive the fault flags against the measured supply.
    ///
    /// A FET is only judged failed on a disabled channel whose output still
    /// sits near the supply.
    pub fn evaluate_faults(&mut self, supply: f64) {
        self.fuse_blown = (self.fuse_voltage - supply).abs() > FUSE_BLOWN_DELTA;
        self.fet_failed = !self.enabled && (self.voltage - supply).abs() < FET_FAILED_DELTA;
    }
}

#[derive(Debug, Clone)]
pub struct Quad {
    group: NodeId,
    mcp: Mcp23008,
    adc_power: Ad7998,
    adc_fuse: Ad7998,
    channels: [QuadChannel; NUM_CHANNELS],
    supply_voltage: f64,
}

impl Quad {
    /// Build a quad as a container on one mux channel and configure its
    /// enable outputs (pins 0-3) and status inputs (pins 4-7).
    pub fn new<B: I2c>(tree: &mut I2cTree<B>, mux: &Tca9548, mux_channel: u8) -> Result<Self, I2cError> {
        let group = tree.add_group();
        mux.attach(tree, mux_channel, group)?;

        let device = tree.attach_device(group, None, QUAD_GPIO)?;
        let mut mcp = Mcp23008::new(tree, device)?;
        for pin in 0..NUM_CHANNELS as u8 {
            mcp.setup(tree, pin, Direction::Out)?;
        }
        for pin in ENABLE_STATUS_PINS {
            mcp.setup(tree, pin, Direction::In)?;
        }
        let device = tree.attach_device(group, None, QUAD_ADC_POWER)?;
        let adc_power = Ad7998::new(tree, device)?;
        let device = tree.attach_device(group, None, QUAD_ADC_FUSE)?;
        let adc_fuse = Ad7998::new(tree, device)?;

        Ok(Self {
            group,
            mcp,
            adc_power,
            adc_fuse,
            channels: [QuadChannel::default(); NUM_CHANNELS],
            supply_voltage: 0.0,
        })
    }

    pub fn id(&self) -> NodeId {
        self.group
    }

    pub fn channel(&self, channel: usize) -> Result<&QuadChannel, PscuError> {
        self.channels.get(channel).ok_or(PscuError::Range {
            what: "quad channel",
            index: channel,
            count: NUM_CHANNELS,
        })
    }

    pub fn channels(&self) -> &[QuadChannel; NUM_CHANNELS] {
        &self.channels
    }

    pub fn get_channel_voltage(&self, channel: usize) -> Result<f64, PscuError> {
        Ok(self.channel(channel)?.voltage)
    }

    pub fn get_channel_current(&self, channel: usize) -> Result<f64, PscuError> {
        Ok(self.channel(channel)?.current)
    }

    pub fn get_fuse_voltage(&self, channel: usize) -> Result<f64, PscuError> {
        Ok(self.channel(channel)?.fuse_voltage)
    }

    pub fn get_fuse_blown(&self, channel: usize) -> Result<bool, PscuError> {
        Ok(self.channel(channel)?.fuse_blown)
    }

    pub fn get_fet_failed(&self, channel: usize) -> Result<bool, PscuError> {
        Ok(self.channel(channel)?.fet_failed)
    }

    pub fn get_enable(&self, channel: usize) -> Result<bool, PscuError> {
        Ok(self.channel(channel)?.enabled)
    }

    pub fn get_supply_voltage(&self) -> f64 {
        self.supply_voltage
    }

    pub fn set_enable<B: I2c>(&mut self, tree: &mut I2cTree<B>, channel: usize, enabled: bool) -> Result<(), PscuError> {
        self.set_enables(tree, &[(channel, enabled)])
    }

    /// Request several channel states at once. Channels already in the
    /// requested state are left alone; the rest get one 0-1-0 pulse.
    pub fn set_enables<B: I2c>(&mut self, tree: &mut I2cTree<B>, requests: &[(usize, bool)]) -> Result<(), PscuError> {
        let mut toggles: Vec<(u8, bool), NUM_CHANNELS> = Vec::new();
        for &(channel, enabled) in requests {
            if self.channel(channel)?.enabled == enabled {
                continue;
            }
            let pin = channel as u8;
            if !toggles.iter().any(|(p, _)| *p == pin) {
                // At most one entry per channel.
                let _ = toggles.push((pin, true));
            }
        }
        if toggles.is_empty() {
            return Ok(());
        }

        debug!("Quad {} toggling outputs {:?}", self.group, toggles);
        self.mcp.disable_outputs(tree)?;
        self.mcp.output_pins(tree, &toggles)?;
        self.mcp.disable_outputs(tree)?;
        Ok(())
    }

    /// Refresh every reading and the derived fault flags.
    pub fn poll_all_sensors<B: I2c>(&mut self, tree: &mut I2cTree<B>) -> Result<(), I2cError> {
        if let Some(levels) = self.mcp.read_pins(tree)? {
            for (channel, pin) in self.channels.iter_mut().zip(ENABLE_STATUS_PINS) {
                channel.enabled = levels.pin(pin);
            }
        }

        for (index, channel) in (0u8..).zip(self.channels.iter_mut()) {
            if let Some(v) = self.adc_power.read_input_scaled(tree, index)? {
                channel.voltage = v * VOLTAGE_SCALE;
            }
            if let Some(i) = self.adc_power.read_input_scaled(tree, index + 4)? {
                channel.current = i * CURRENT_SCALE;
            }
            if let Some(v) = self.adc_fuse.read_input_scaled(tree, index)? {
                channel.fuse_voltage = v * VOLTAGE_SCALE;
            }
        }
        if let Some(v) = self.adc_fuse.read_input_scaled(tree, SUPPLY_INPUT)? {
            self.supply_voltage = v * VOLTAGE_SCALE;
        }

        let supply = self.supply_voltage;
        for channel in &mut self.channels {
            if supply > SUPPLY_VOLTAGE_NOMINAL / 2.0 {
                channel.evaluate_faults(supply);
            } else {
                channel.fuse_blown = false;
                channel.fet_failed = false;
            }
        }
        Ok(())
    }
}
