//! LPD power supply control unit.
//!
//! [`Pscu`] owns the I2C tree for one unit: four quad boxes, the temperature
//! monitor board and the misc board carrying humidity, fan, pump, position
//! and the interlock summary. Readings are refreshed only by
//! [`Pscu::poll_all_sensors`]; every getter returns the last polled snapshot.

pub mod quad;
pub mod sensors;

use std::time::{Duration, Instant};

use chrono::Local;

use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::deferred::DeferredExecutor;
use crate::display::{DisplayError, LcdDisplay, Rgb, NOT_RUNNING_MESSAGE};
use crate::drivers::{Ad5321, Ad7998, Direction, Mcp23008, PinLevels, Tca9548};
use crate::i2c::{BusTransport, I2cError, I2cTree};

use self::quad::Quad;
use self::sensors::{
    fan_rpm, humidity_percent, position_mm, pump_flow, temperature_celsius, InterlockCategory,
    InterlockState, SensorChannel, TripMode, FAN_VREF, HUMIDITY_VREF, POSITION_VREF, PUMP_VREF,
    TEMP_VREF,
};
use self::topology::*;

/// Fixed PSCU wiring.
pub mod topology {
    use static_assertions::const_assert;

    pub const MUX_ADDRESS: u8 = 0x70;
    /// Quads sit on mux channels `0..NUM_QUADS`.
    pub const NUM_QUADS: usize = 4;
    pub const QUAD_GPIO: u8 = 0x20;
    pub const QUAD_ADC_FUSE: u8 = 0x21;
    pub const QUAD_ADC_POWER: u8 = 0x22;

    pub const MONITOR_CHANNEL: u8 = 4;
    /// Set points, readings 0-7, readings and set points 8-10.
    pub const TEMP_ADC: [u8; 3] = [0x21, 0x22, 0x23];
    /// Disable jumpers, trips 0-7, traces 0-7, trips and traces 8-10.
    pub const TEMP_GPIO: [u8; 4] = [0x24, 0x25, 0x26, 0x27];

    pub const MISC_CHANNEL: u8 = 5;
    /// Set points, readings.
    pub const MISC_ADC: [u8; 2] = [0x21, 0x22];
    /// Arm control and summary, trips, traces, latches.
    pub const MISC_GPIO: [u8; 4] = [0x24, 0x25, 0x26, 0x27];
    pub const FAN_DAC: u8 = 0x0C;

    const_assert!(NUM_QUADS <= MONITOR_CHANNEL as usize);
    const_assert!(MONITOR_CHANNEL != MISC_CHANNEL);
    const_assert!(MISC_CHANNEL < 8);
}

// One full enable sequence always fits the deferred queue.
static_assertions::const_assert!(crate::deferred::MAX_DEFERRED_COMMANDS >= NUM_QUADS * quad::NUM_CHANNELS);

pub const NUM_TEMPERATURES: usize = 11;
pub const NUM_HUMIDITIES: usize = 2;
pub const DEFAULT_QUAD_ENABLE_INTERVAL: Duration = Duration::from_secs(1);

pub const TEMP_SENSOR_NAMES: [&str; NUM_TEMPERATURES] = [
    "Vent 1",
    "Vent 2",
    "Intake 1",
    "Intake 2",
    "Rear Lower",
    "Rear Upper",
    "N/C",
    "N/C",
    "Coolant Out",
    "Coolant In",
    "N/C",
];
pub const HUMIDITY_SENSOR_NAMES: [&str; NUM_HUMIDITIES] = ["Front", "Rear"];

/// Temperatures 8 and up guard against coolant running too cold.
const FIRST_UNDER_TEMPERATURE: usize = 8;
const ARM_PIN: u8 = 0;
const DISARM_PIN: u8 = 1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PscuError {
    #[error("illegal {what} index {index} specified (have {count})")]
    Range {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("deferred command rejected: {0}")]
    Queue(&'static str),

    #[error(transparent)]
    I2c(#[from] I2cError),
}

fn check_index(what: &'static str, index: usize, count: usize) -> Result<(), PscuError> {
    if index >= count {
        return Err(PscuError::Range { what, index, count });
    }
    Ok(())
}

/// A staggered quad channel enable waiting in the deferred executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadCommand {
    pub quad: usize,
    pub channel: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PscuOptions {
    /// Spacing between channel enables during an enable-all sequence.
    pub quad_enable_interval: Duration,
    pub detector_position_offset: f64,
    pub mux_address: u8,
}

impl Default for PscuOptions {
    fn default() -> Self {
        Self {
            quad_enable_interval: DEFAULT_QUAD_ENABLE_INTERVAL,
            detector_position_offset: 0.0,
            mux_address: MUX_ADDRESS,
        }
    }
}

pub struct Pscu<B> {
    tree: I2cTree<B>,
    tca: Tca9548,
    quads: Vec<Quad>,
    adc_temp_mon: Vec<Ad7998>,
    mcp_temp_mon: Vec<Mcp23008>,
    adc_misc: Vec<Ad7998>,
    mcp_misc: Vec<Mcp23008>,
    fan_dac: Ad5321,

    temperatures: [SensorChannel; NUM_TEMPERATURES],
    humidities: [SensorChannel; NUM_HUMIDITIES],
    fan: SensorChannel,
    pump: SensorChannel,
    fan_target: f64,
    position_raw: f64,
    position: f64,
    quad_traces: [bool; NUM_QUADS],
    interlock: InterlockState,
    all_enabled: bool,

    executor: DeferredExecutor<QuadCommand>,
    options: PscuOptions,
    display: Option<LcdDisplay>,
    display_error: bool,
}

fn attach_adc<B: I2c>(tree: &mut I2cTree<B>, tca: &Tca9548, channel: u8, address: u8) -> Result<Ad7998, I2cError> {
    let device = tca.attach_device(tree, channel, address)?;
    Ad7998::new(tree, device)
}

fn attach_gpio<B: I2c>(
    tree: &mut I2cTree<B>,
    tca: &Tca9548,
    channel: u8,
    address: u8,
    outputs: &[u8],
) -> Result<Mcp23008, I2cError> {
    let device = tca.attach_device(tree, channel, address)?;
    let mut mcp = Mcp23008::new(tree, device)?;
    for pin in 0..crate::drivers::mcp23008::NUM_PINS {
        let direction = if outputs.contains(&pin) { Direction::Out } else { Direction::In };
        mcp.setup(tree, pin, direction)?;
    }
    Ok(mcp)
}

impl<B: I2c> Pscu<B> {
    /// Build the device tree and configure every chip on the unit.
    pub fn new(transport: BusTransport<B>, options: PscuOptions) -> Result<Self, PscuError> {
        let mut tree = I2cTree::new(transport);
        let tca = Tca9548::new(&mut tree, options.mux_address);

        let mut quads = Vec::with_capacity(NUM_QUADS);
        for channel in 0..NUM_QUADS as u8 {
            quads.push(Quad::new(&mut tree, &tca, channel)?);
        }

        let mut adc_temp_mon = Vec::with_capacity(TEMP_ADC.len());
        for address in TEMP_ADC {
            adc_temp_mon.push(attach_adc(&mut tree, &tca, MONITOR_CHANNEL, address)?);
        }
        let mut mcp_temp_mon = Vec::with_capacity(TEMP_GPIO.len());
        for address in TEMP_GPIO {
            mcp_temp_mon.push(attach_gpio(&mut tree, &tca, MONITOR_CHANNEL, address, &[])?);
        }

        let mut adc_misc = Vec::with_capacity(MISC_ADC.len());
        for address in MISC_ADC {
            adc_misc.push(attach_adc(&mut tree, &tca, MISC_CHANNEL, address)?);
        }
        let mut mcp_misc = Vec::with_capacity(MISC_GPIO.len());
        for (index, address) in MISC_GPIO.into_iter().enumerate() {
            let outputs: &[u8] = if index == 0 { &[ARM_PIN, DISARM_PIN] } else { &[] };
            mcp_misc.push(attach_gpio(&mut tree, &tca, MISC_CHANNEL, address, outputs)?);
        }
        let fan_dac = Ad5321::new(tca.attach_device(&mut tree, MISC_CHANNEL, FAN_DAC)?);

        let temperatures = core::array::from_fn(|i| {
            let mode = if i < FIRST_UNDER_TEMPERATURE { TripMode::Over } else { TripMode::Under };
            SensorChannel::new(TEMP_SENSOR_NAMES[i], mode, TEMP_VREF)
        });
        let humidities =
            core::array::from_fn(|i| SensorChannel::new(HUMIDITY_SENSOR_NAMES[i], TripMode::Over, HUMIDITY_VREF));

        info!(
            "PSCU initialised: {} quads, enable interval {:?}",
            quads.len(),
            options.quad_enable_interval
        );

        Ok(Self {
            tree,
            tca,
            quads,
            adc_temp_mon,
            mcp_temp_mon,
            adc_misc,
            mcp_misc,
            fan_dac,
            temperatures,
            humidities,
            fan: SensorChannel::new("Fan", TripMode::Under, FAN_VREF),
            pump: SensorChannel::new("Pump", TripMode::Under, PUMP_VREF),
            fan_target: 100.0,
            position_raw: 0.0,
            position: 0.0,
            quad_traces: [false; NUM_QUADS],
            interlock: InterlockState::default(),
            all_enabled: false,
            executor: DeferredExecutor::new(),
            options,
            display: None,
            display_error: false,
        })
    }

    /// Attach the front-panel display. A display that failed to open is
    /// recorded in the display error flag and the panel is skipped.
    pub fn with_display(mut self, display: Result<LcdDisplay, DisplayError>) -> Self {
        match display {
            Ok(display) => {
                self.display = Some(display);
                self.display_error = false;
            }
            Err(e) => {
                warn!("{}", e);
                self.display = None;
                self.display_error = true;
            }
        }
        self
    }

    pub fn tree(&self) -> &I2cTree<B> {
        &self.tree
    }

    pub fn bus(&self) -> &B {
        self.tree.transport().bus()
    }

    pub fn bus_mut(&mut self) -> &mut B {
        self.tree.transport_mut().bus_mut()
    }

    pub fn mux(&self) -> &Tca9548 {
        &self.tca
    }

    /// Release at most one due deferred enable and carry it out.
    pub fn handle_deferred(&mut self, now: Instant) -> Result<Option<QuadCommand>, PscuError> {
        match self.executor.release(now) {
            Some(command) => {
                self.quad_enable_channel(command.quad, command.channel)?;
                Ok(Some(command))
            }
            None => Ok(None),
        }
    }

    pub fn pending_enables(&self) -> usize {
        self.executor.pending()
    }

    pub fn executor(&self) -> &DeferredExecutor<QuadCommand> {
        &self.executor
    }

    /// Refresh every sensor, flag and quad reading.
    ///
    /// A read trapped under the fault policy leaves the affected value at
    /// its previous state. Disabled sensors keep their last converted value.
    pub fn poll_all_sensors(&mut self) -> Result<(), PscuError> {
        let tree = &mut self.tree;

        let mut mon: [Option<PinLevels>; 4] = [None; 4];
        for (slot, mcp) in mon.iter_mut().zip(&self.mcp_temp_mon) {
            *slot = mcp.read_pins(tree)?;
        }
        let mut misc: [Option<PinLevels>; 4] = [None; 4];
        for (slot, mcp) in misc.iter_mut().zip(&self.mcp_misc) {
            *slot = mcp.read_pins(tree)?;
        }

        if let Some(jumpers) = mon[0] {
            for pin in 0..4u8 {
                self.temperatures[4 + usize::from(pin)].disabled = jumpers.pin(pin);
            }
            self.temperatures[10].disabled = jumpers.pin(4);
            self.humidities[1].disabled = jumpers.pin(5);
            self.interlock.ok[InterlockCategory::Temperature.index()] = jumpers.pin(7);
        }

        let [set_points, readings, coolant] = [0, 1, 2].map(|i| &self.adc_temp_mon[i]);
        for (input, sensor) in (0u8..).zip(self.temperatures.iter_mut().take(FIRST_UNDER_TEMPERATURE)) {
            sensor.update_set_point(set_points.read_input_scaled(tree, input)?, temperature_celsius);
            sensor.update_reading(readings.read_input_scaled(tree, input)?, temperature_celsius);
            if let Some(trips) = mon[1] {
                sensor.tripped = !trips.pin(input);
            }
            if let Some(traces) = mon[2] {
                sensor.trace = traces.pin(input);
            }
        }
        for (input, sensor) in (0u8..).zip(self.temperatures.iter_mut().skip(FIRST_UNDER_TEMPERATURE)) {
            sensor.update_reading(coolant.read_input_scaled(tree, input)?, temperature_celsius);
            sensor.update_set_point(coolant.read_input_scaled(tree, input + 4)?, temperature_celsius);
            if let Some(flags) = mon[3] {
                sensor.tripped = !flags.pin(input);
                sensor.trace = flags.pin(input + 3);
            }
        }

        let [misc_set_points, misc_readings] = [0, 1].map(|i| &self.adc_misc[i]);
        for (input, sensor) in (1u8..).zip(self.humidities.iter_mut()) {
            sensor.update_set_point(misc_set_points.read_input_scaled(tree, input)?, humidity_percent);
            sensor.update_reading(misc_readings.read_input_scaled(tree, input)?, humidity_percent);
            if let Some(trips) = misc[1] {
                sensor.tripped = !trips.pin(input);
            }
            if let Some(traces) = misc[2] {
                sensor.trace = traces.pin(input);
            }
        }

        self.fan.update_reading(misc_readings.read_input_scaled(tree, 0)?, fan_rpm);
        self.fan.update_set_point(misc_set_points.read_input_scaled(tree, 0)?, fan_rpm);
        self.pump.update_reading(misc_readings.read_input_scaled(tree, 3)?, pump_flow);
        self.pump.update_set_point(misc_set_points.read_input_scaled(tree, 3)?, pump_flow);
        if let Some(trips) = misc[1] {
            self.fan.tripped = !trips.pin(0);
            self.pump.tripped = !trips.pin(3);
        }

        if let Some(raw) = misc_readings.read_input_scaled(tree, 4)? {
            self.position_raw = raw;
            self.position = position_mm(raw, self.options.detector_position_offset);
        }

        if let Some(summary) = misc[0] {
            self.interlock.armed = summary.pin(2);
            self.interlock.ok[InterlockCategory::Fan.index()] = summary.pin(3);
            self.interlock.ok[InterlockCategory::Pump.index()] = summary.pin(4);
            self.interlock.ok[InterlockCategory::Humidity.index()] = summary.pin(5);
            self.interlock.ok[InterlockCategory::Trace.index()] = summary.pin(6);
            self.interlock.healthy = summary.pin(7);
        }
        if let Some(traces) = misc[2] {
            for (pin, trace) in (4u8..).zip(self.quad_traces.iter_mut()) {
                *trace = traces.pin(pin);
            }
        }
        if let Some(latches) = misc[3] {
            for category in InterlockCategory::ALL {
                self.interlock.latched[category.index()] = latches.pin(category.index() as u8);
            }
        }

        if !self.interlock.armed {
            self.all_enabled = false;
        }

        for quad in &mut self.quads {
            quad.poll_all_sensors(tree)?;
        }
        Ok(())
    }

    /// Enable one quad output now.
    pub fn quad_enable_channel(&mut self, quad: usize, channel: usize) -> Result<(), PscuError> {
        self.set_quad_enable(quad, channel, true)
    }

    pub fn set_quad_enable(&mut self, quad: usize, channel: usize, enabled: bool) -> Result<(), PscuError> {
        check_index("quad", quad, self.quads.len())?;
        check_index("quad channel", channel, quad::NUM_CHANNELS)?;
        debug!(
            "{} quad {} channel {} output",
            if enabled { "Enabling" } else { "Disabling" },
            quad,
            channel
        );
        self.quads[quad].set_enable(&mut self.tree, channel, enabled)
    }

    /// Enable every quad output, staggered by the enable interval, or cancel
    /// any pending enables and switch everything off at once. A repeated
    /// enable replaces the sequence still pending with a fresh one.
    pub fn enable_all(&mut self, enable: bool) -> Result<(), PscuError> {
        info!("Enable all quad outputs: {}", enable);
        if enable {
            let replaced = self.executor.clear();
            if replaced > 0 {
                debug!("Restarting enable sequence, {} enables were pending", replaced);
            }
            for quad in 0..self.quads.len() {
                for channel in 0..quad::NUM_CHANNELS {
                    self.executor
                        .enqueue(QuadCommand { quad, channel }, self.options.quad_enable_interval)
                        .map_err(PscuError::Queue)?;
                }
            }
            self.all_enabled = true;
        } else {
            let pending = self.executor.pending();
            if pending > 0 {
                debug!("Clearing {} pending quad enable commands", pending);
                self.executor.clear();
            }
            for quad in &mut self.quads {
                for channel in 0..quad::NUM_CHANNELS {
                    quad.set_enable(&mut self.tree, channel, false)?;
                }
            }
            self.all_enabled = false;
        }
        Ok(())
    }

    /// Pulse the arm or disarm line low-high-low.
    pub fn set_armed(&mut self, arm: bool) -> Result<(), PscuError> {
        info!("{} PSCU interlock", if arm { "Arming" } else { "Disarming" });
        let pin = if arm { ARM_PIN } else { DISARM_PIN };
        let mcp = &mut self.mcp_misc[0];
        for level in [false, true, false] {
            mcp.output(&mut self.tree, pin, level)?;
        }
        Ok(())
    }

    /// Set the fan speed as a percentage of maximum. The fan driver's
    /// control input is inverted: full DAC output is minimum speed.
    pub fn set_fan_target(&mut self, percent: f64) -> Result<(), PscuError> {
        if self.fan_dac.set_output_scaled(&mut self.tree, 1.0 - percent / 100.0)?.is_none() {
            warn!("Fan target write trapped, keeping {:.1}%", self.fan_target);
            return Ok(());
        }
        self.fan_target = percent;
        info!("Fan target set to {:.1}%", percent);
        Ok(())
    }

    /// Redraw the front panel from the current snapshot. A write failure
    /// disables the panel for the rest of the run.
    pub fn update_lcd(&mut self) {
        if self.display_error {
            return;
        }
        let Some(display) = self.display.as_ref() else {
            return;
        };
        let content = display.render(self, Local::now().time());
        let colour = if self.interlock.healthy { Rgb::GREEN } else { Rgb::RED };

        if let Some(display) = self.display.as_mut() {
            let result = display
                .set_colour(colour)
                .and_then(|()| display.set_content(&content));
            if let Err(e) = result {
                warn!("Front panel update failed: {}", e);
                self.display_error = true;
            }
        }
    }

    pub fn lcd_next_page(&mut self) {
        if let Some(display) = self.display.as_mut() {
            display.next_page();
        }
    }

    pub fn lcd_previous_page(&mut self) {
        if let Some(display) = self.display.as_mut() {
            display.previous_page();
        }
    }

    pub fn display(&self) -> Option<&LcdDisplay> {
        self.display.as_ref()
    }

    /// Leave the panel showing that the server has stopped. Outputs and the
    /// interlock keep their last commanded state.
    pub fn cleanup(&mut self) {
        debug!("PSCU cleanup: setting display message");
        if self.display_error {
            return;
        }
        if let Some(display) = self.display.as_mut() {
            let result = display
                .set_colour(Rgb::YELLOW)
                .and_then(|()| display.set_content(NOT_RUNNING_MESSAGE));
            if let Err(e) = result {
                warn!("Failed to set shutdown message: {}", e);
            }
        }
    }
}

impl<B> Pscu<B> {
    pub fn temperatures(&self) -> &[SensorChannel; NUM_TEMPERATURES] {
        &self.temperatures
    }

    pub fn humidities(&self) -> &[SensorChannel; NUM_HUMIDITIES] {
        &self.humidities
    }

    pub fn temperature(&self, sensor: usize) -> Result<&SensorChannel, PscuError> {
        self.temperatures.get(sensor).ok_or(PscuError::Range {
            what: "temperature sensor",
            index: sensor,
            count: NUM_TEMPERATURES,
        })
    }

    pub fn humidity(&self, sensor: usize) -> Result<&SensorChannel, PscuError> {
        self.humidities.get(sensor).ok_or(PscuError::Range {
            what: "humidity sensor",
            index: sensor,
            count: NUM_HUMIDITIES,
        })
    }

    pub fn get_temperature(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.temperature(sensor)?.value)
    }

    pub fn get_temperature_volts(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.temperature(sensor)?.volts())
    }

    pub fn get_temperature_set_point(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.temperature(sensor)?.set_point)
    }

    pub fn get_temperature_set_point_volts(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.temperature(sensor)?.set_point_volts())
    }

    pub fn get_temperature_tripped(&self, sensor: usize) -> Result<bool, PscuError> {
        Ok(self.temperature(sensor)?.tripped)
    }

    pub fn get_temperature_trace(&self, sensor: usize) -> Result<bool, PscuError> {
        Ok(self.temperature(sensor)?.trace)
    }

    pub fn get_temperature_disabled(&self, sensor: usize) -> Result<bool, PscuError> {
        Ok(self.temperature(sensor)?.disabled)
    }

    pub fn get_temperature_name(&self, sensor: usize) -> Result<&'static str, PscuError> {
        Ok(self.temperature(sensor)?.name)
    }

    pub fn get_temperature_mode(&self, sensor: usize) -> Result<TripMode, PscuError> {
        Ok(self.temperature(sensor)?.mode)
    }

    pub fn get_humidity(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.humidity(sensor)?.value)
    }

    pub fn get_humidity_volts(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.humidity(sensor)?.volts())
    }

    pub fn get_humidity_set_point(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.humidity(sensor)?.set_point)
    }

    pub fn get_humidity_set_point_volts(&self, sensor: usize) -> Result<f64, PscuError> {
        Ok(self.humidity(sensor)?.set_point_volts())
    }

    pub fn get_humidity_tripped(&self, sensor: usize) -> Result<bool, PscuError> {
        Ok(self.humidity(sensor)?.tripped)
    }

    pub fn get_humidity_trace(&self, sensor: usize) -> Result<bool, PscuError> {
        Ok(self.humidity(sensor)?.trace)
    }

    pub fn get_humidity_disabled(&self, sensor: usize) -> Result<bool, PscuError> {
        Ok(self.humidity(sensor)?.disabled)
    }

    pub fn get_humidity_name(&self, sensor: usize) -> Result<&'static str, PscuError> {
        Ok(self.humidity(sensor)?.name)
    }

    pub fn get_humidity_mode(&self, sensor: usize) -> Result<TripMode, PscuError> {
        Ok(self.humidity(sensor)?.mode)
    }

    pub fn fan(&self) -> &SensorChannel {
        &self.fan
    }

    pub fn pump(&self) -> &SensorChannel {
        &self.pump
    }

    /// Fan speed in rpm.
    pub fn get_fan_speed(&self) -> f64 {
        self.fan.value
    }

    pub fn get_fan_target(&self) -> f64 {
        self.fan_target
    }

    /// Coolant flow in l/min.
    pub fn get_pump_flow(&self) -> f64 {
        self.pump.value
    }

    /// Transverse opening of the quadrant assembly in mm, signed by direction.
    pub fn get_position(&self) -> f64 {
        self.position
    }

    pub fn get_position_volts(&self) -> f64 {
        self.position_raw * POSITION_VREF
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    pub fn quad(&self, quad: usize) -> Result<&Quad, PscuError> {
        self.quads.get(quad).ok_or(PscuError::Range {
            what: "quad",
            index: quad,
            count: self.quads.len(),
        })
    }

    pub fn quad_traces(&self) -> &[bool; NUM_QUADS] {
        &self.quad_traces
    }

    pub fn get_quad_trace(&self, quad: usize) -> Result<bool, PscuError> {
        self.quad_traces.get(quad).copied().ok_or(PscuError::Range {
            what: "quad",
            index: quad,
            count: NUM_QUADS,
        })
    }

    pub fn interlock(&self) -> &InterlockState {
        &self.interlock
    }

    pub fn get_armed(&self) -> bool {
        self.interlock.armed
    }

    pub fn get_health(&self) -> bool {
        self.interlock.healthy
    }

    /// Tracks the last enable-all request; forced false whenever the unit is
    /// seen disarmed.
    pub fn get_all_enabled(&self) -> bool {
        self.all_enabled
    }

    pub fn get_state(&self, category: InterlockCategory) -> bool {
        self.interlock.state(category)
    }

    pub fn get_latched(&self, category: InterlockCategory) -> bool {
        self.interlock.latched(category)
    }

    pub fn get_all_latched(&self) -> [bool; 5] {
        self.interlock.latched
    }

    pub fn get_enable_interval(&self) -> Duration {
        self.options.quad_enable_interval
    }

    pub fn get_display_error(&self) -> bool {
        self.display_error
    }
}
