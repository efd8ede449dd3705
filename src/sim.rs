//! Simulated I2C hardware.
//!
//! `SimBus` implements `embedded_hal::i2c::I2c` and models a TCA9548 switch
//! plus the register behaviour of every chip this crate drives. It records
//! each transaction so tests can assert ordering, and devices (or the mux
//! itself) can be made to stop acknowledging to exercise the fault policy.
//! The server's `--simulate` mode runs on the same model.

use std::collections::{HashMap, HashSet};

use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::backplane::topology as bp;
use crate::drivers::mcp23008::{GPIO, IODIR};
use crate::drivers::si570;
use crate::pscu::topology as pscu;

const REGISTER_SPACE: usize = 256;
const SI570_DIVIDERS: std::ops::Range<usize> = 7..13;
const SI570_CONTROL: u8 = 135;
const SI570_RECALL: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError(ErrorKind);

impl i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimTransaction {
    Write {
        channel: Option<u8>,
        address: u8,
        bytes: Vec<u8>,
    },
    Read {
        channel: Option<u8>,
        address: u8,
        len: usize,
    },
}

impl SimTransaction {
    pub fn address(&self) -> u8 {
        match self {
            Self::Write { address, .. } | Self::Read { address, .. } => *address,
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::Write { channel, .. } | Self::Read { channel, .. } => *channel,
        }
    }
}

/// How GPIO output edges feed back into the expander's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeModel {
    None,
    /// Quad box: a rising edge on output pin n toggles the enable status on pin n + 4.
    QuadEnable,
    /// Interlock: a rising edge on pin 0 arms (sets pin 2), on pin 1 disarms.
    Arm,
}

#[derive(Debug, Clone)]
enum Model {
    Registers,
    Adc { channels: [u16; 8] },
    Dac { code: u16 },
    Gpio { inputs: u8, edges: EdgeModel },
    /// Registers 7-12 as programmed in non-volatile memory.
    Si570 { startup: [u8; 6] },
}

/// One simulated chip: a behaviour model over a 256-byte register file.
#[derive(Debug, Clone)]
pub struct SimChip {
    model: Model,
    regs: Vec<u8>,
    pointer: u8,
}

impl SimChip {
    fn with_model(model: Model) -> Self {
        Self {
            model,
            regs: vec![0; REGISTER_SPACE],
            pointer: 0,
        }
    }

    /// Plain auto-incrementing register file (pots, oscillator, generic parts).
    pub fn registers() -> Self {
        Self::with_model(Model::Registers)
    }

    /// AD7998 with all inputs at zero.
    pub fn adc() -> Self {
        Self::with_model(Model::Adc { channels: [0; 8] })
    }

    /// AD5321 powered up at code zero.
    pub fn dac() -> Self {
        Self::with_model(Model::Dac { code: 0 })
    }

    /// MCP23008 in its power-on state: all pins inputs.
    pub fn gpio(inputs: u8, edges: EdgeModel) -> Self {
        let mut chip = Self::with_model(Model::Gpio { inputs, edges });
        chip.regs[usize::from(IODIR)] = 0xFF;
        chip
    }

    /// Si570 holding startup registers for the given frequency. Setting
    /// RECALL reloads them, as after a power cycle.
    pub fn si570(startup_mhz: f64) -> Self {
        let startup = si570::startup_registers(startup_mhz).unwrap_or_default();
        let mut chip = Self::with_model(Model::Si570 { startup });
        chip.regs[SI570_DIVIDERS].copy_from_slice(&startup);
        chip
    }

    fn write(&mut self, bytes: &[u8]) {
        let Some((&first, rest)) = bytes.split_first() else {
            return;
        };
        match &mut self.model {
            Model::Dac { code } => {
                if let Some(&lsb) = rest.first() {
                    *code = (u16::from(first & 0x0F) << 8) | u16::from(lsb);
                }
                return;
            }
            Model::Adc { .. } if first & 0x80 != 0 => {
                self.pointer = first;
                return;
            }
            _ => {}
        }

        self.pointer = first;
        for (offset, &value) in rest.iter().enumerate() {
            let reg = first.wrapping_add(offset as u8);
            let previous = self.regs[usize::from(reg)];
            self.regs[usize::from(reg)] = value;
            if reg == GPIO {
                self.output_edges(previous, value);
            }
            if let Model::Si570 { startup } = &self.model {
                if reg == SI570_CONTROL && value & SI570_RECALL != 0 {
                    self.regs[SI570_DIVIDERS].copy_from_slice(startup);
                    self.regs[usize::from(reg)] &= !SI570_RECALL;
                }
            }
        }
    }

    fn output_edges(&mut self, previous: u8, latch: u8) {
        let outputs = !self.regs[usize::from(IODIR)];
        if let Model::Gpio { inputs, edges } = &mut self.model {
            let rising = latch & !previous & outputs;
            match edges {
                EdgeModel::QuadEnable => *inputs ^= (rising & 0x0F) << 4,
                EdgeModel::Arm => {
                    if rising & 0x01 != 0 {
                        *inputs |= 1 << 2;
                    }
                    if rising & 0x02 != 0 {
                        *inputs &= !(1 << 2);
                    }
                }
                EdgeModel::None => {}
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        match &self.model {
            Model::Dac { code } => {
                for (slot, byte) in buf.iter_mut().zip(code.to_be_bytes()) {
                    *slot = byte;
                }
            }
            Model::Adc { channels } if self.pointer & 0x80 != 0 => {
                let channel = (self.pointer >> 4) & 0x07;
                let code = channels[usize::from(channel)] & 0x0FFF;
                let word = (u16::from(channel) << 12) | code;
                for (slot, byte) in buf.iter_mut().zip(word.to_be_bytes()) {
                    *slot = byte;
                }
            }
            _ => {
                for (offset, slot) in buf.iter_mut().enumerate() {
                    let reg = self.pointer.wrapping_add(offset as u8);
                    *slot = self.register_value(reg);
                }
            }
        }
    }

    fn register_value(&self, reg: u8) -> u8 {
        match &self.model {
            Model::Gpio { inputs, .. } if reg == GPIO => {
                let iodir = self.regs[usize::from(IODIR)];
                (self.regs[usize::from(GPIO)] & !iodir) | (inputs & iodir)
            }
            _ => self.regs[usize::from(reg)],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimMux {
    address: u8,
    mask: u8,
    failing: bool,
}

/// Simulated bus with an optional TCA9548 in front of every device.
#[derive(Debug, Default)]
pub struct SimBus {
    mux: Option<SimMux>,
    chips: HashMap<(Option<u8>, u8), SimChip>,
    failing: HashSet<(Option<u8>, u8)>,
    log: Vec<SimTransaction>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mux(&mut self, address: u8) {
        self.mux = Some(SimMux {
            address,
            mask: 0,
            failing: false,
        });
    }

    /// Place a chip on a mux channel (`None` for a device in front of the mux).
    pub fn add_chip(&mut self, channel: Option<u8>, address: u8, chip: SimChip) {
        self.chips.insert((channel, address), chip);
    }

    pub fn set_failing(&mut self, channel: Option<u8>, address: u8, failing: bool) {
        if failing {
            self.failing.insert((channel, address));
        } else {
            self.failing.remove(&(channel, address));
        }
    }

    pub fn set_mux_failing(&mut self, failing: bool) {
        if let Some(mux) = &mut self.mux {
            mux.failing = failing;
        }
    }

    /// Channel currently routed through the mux.
    pub fn selected_channel(&self) -> Option<u8> {
        let mask = self.mux?.mask;
        (mask != 0).then(|| mask.trailing_zeros() as u8)
    }

    pub fn log(&self) -> &[SimTransaction] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn register(&self, channel: Option<u8>, address: u8, reg: u8) -> Option<u8> {
        self.chips
            .get(&(channel, address))
            .map(|chip| chip.register_value(reg))
    }

    pub fn set_register(&mut self, channel: Option<u8>, address: u8, reg: u8, value: u8) {
        if let Some(chip) = self.chips.get_mut(&(channel, address)) {
            chip.regs[usize::from(reg)] = value;
        }
    }

    /// Set a raw 12-bit conversion result on an ADC input.
    pub fn set_adc(&mut self, channel: Option<u8>, address: u8, input: usize, code: u16) {
        if let Some(SimChip {
            model: Model::Adc { channels },
            ..
        }) = self.chips.get_mut(&(channel, address))
        {
            if let Some(slot) = channels.get_mut(input) {
                *slot = code & 0x0FFF;
            }
        }
    }

    /// Set an ADC input as a fraction of full scale.
    pub fn set_adc_scaled(&mut self, channel: Option<u8>, address: u8, input: usize, fraction: f64) {
        let code = (fraction.clamp(0.0, 1.0) * 4095.0).round() as u16;
        self.set_adc(channel, address, input, code);
    }

    pub fn set_inputs(&mut self, channel: Option<u8>, address: u8, levels: u8) {
        if let Some(SimChip {
            model: Model::Gpio { inputs, .. },
            ..
        }) = self.chips.get_mut(&(channel, address))
        {
            *inputs = levels;
        }
    }

    pub fn inputs(&self, channel: Option<u8>, address: u8) -> Option<u8> {
        match self.chips.get(&(channel, address)) {
            Some(SimChip {
                model: Model::Gpio { inputs, .. },
                ..
            }) => Some(*inputs),
            _ => None,
        }
    }

    pub fn dac_code(&self, channel: Option<u8>, address: u8) -> Option<u16> {
        match self.chips.get(&(channel, address)) {
            Some(SimChip {
                model: Model::Dac { code },
                ..
            }) => Some(*code),
            _ => None,
        }
    }

    /// A PSCU at rest: supplies up, all sensors inside their limits, not armed,
    /// every quad channel disabled.
    pub fn pscu() -> Self {
        let mut bus = Self::new();
        bus.add_mux(pscu::MUX_ADDRESS);

        // 48 V across the (5 x 16) divider, fuses intact.
        let supply = 48.0 / 80.0;
        for quad in 0..pscu::NUM_QUADS as u8 {
            let ch = Some(quad);
            bus.add_chip(ch, pscu::QUAD_GPIO, SimChip::gpio(0x00, EdgeModel::QuadEnable));
            bus.add_chip(ch, pscu::QUAD_ADC_POWER, SimChip::adc());
            bus.add_chip(ch, pscu::QUAD_ADC_FUSE, SimChip::adc());
            for input in 0..4 {
                bus.set_adc_scaled(ch, pscu::QUAD_ADC_FUSE, input, supply);
            }
            bus.set_adc_scaled(ch, pscu::QUAD_ADC_FUSE, 4, supply);
        }

        let mon = Some(pscu::MONITOR_CHANNEL);
        for address in pscu::TEMP_ADC {
            bus.add_chip(mon, address, SimChip::adc());
        }
        // 20 C reading, 35 C over-temperature set point, 10 C under-temperature set point.
        let celsius = |t: f64| (t + 273.15) * 0.005 / 3.0;
        for input in 0..8 {
            bus.set_adc_scaled(mon, pscu::TEMP_ADC[0], input, celsius(35.0));
            bus.set_adc_scaled(mon, pscu::TEMP_ADC[1], input, celsius(20.0));
        }
        for input in 0..3 {
            bus.set_adc_scaled(mon, pscu::TEMP_ADC[2], input, celsius(20.0));
            bus.set_adc_scaled(mon, pscu::TEMP_ADC[2], input + 4, celsius(10.0));
        }
        // N/C sensors report disabled; sensor summary OK.
        let monitor_inputs = [0b1001_1100, 0xFF, 0xFF, 0x3F];
        for (address, inputs) in pscu::TEMP_GPIO.into_iter().zip(monitor_inputs) {
            bus.add_chip(mon, address, SimChip::gpio(inputs, EdgeModel::None));
        }

        let misc = Some(pscu::MISC_CHANNEL);
        for address in pscu::MISC_ADC {
            bus.add_chip(misc, address, SimChip::adc());
        }
        let [setpoints, readings] = pscu::MISC_ADC;
        bus.set_adc_scaled(misc, setpoints, 0, 1000.0 / 3000.0 * 4.5 / 5.0);
        bus.set_adc_scaled(misc, readings, 0, 3000.0 / 3000.0 * 4.5 / 5.0);
        for input in 1..3 {
            bus.set_adc_scaled(misc, setpoints, input, (70.0 * 0.031 + 0.8) / 5.0);
            bus.set_adc_scaled(misc, readings, input, (40.0 * 0.031 + 0.8) / 5.0);
        }
        bus.set_adc_scaled(misc, setpoints, 3, 5.0 / 35.0 * 4.32 / 5.0);
        bus.set_adc_scaled(misc, readings, 3, 8.0 / 35.0 * 4.32 / 5.0);

        let misc_inputs = [0b1111_1000, 0xFF, 0xFF, 0xFF];
        for (index, (address, inputs)) in pscu::MISC_GPIO.into_iter().zip(misc_inputs).enumerate() {
            let edges = if index == 0 { EdgeModel::Arm } else { EdgeModel::None };
            bus.add_chip(misc, address, SimChip::gpio(inputs, edges));
        }
        bus.add_chip(misc, pscu::FAN_DAC, SimChip::dac());
        bus
    }

    /// A QEM backplane with its oscillator at the factory frequency and all
    /// supplies reporting power good.
    pub fn backplane() -> Self {
        let mut bus = Self::new();
        bus.add_mux(bp::MUX_ADDRESS);
        for offset in 0..bp::NUM_POTS as u8 {
            let mut pot = SimChip::registers();
            pot.regs[0] = 0x80;
            pot.regs[1] = 0x80;
            bus.add_chip(Some(bp::POT_CHANNEL), bp::POT_BASE + offset, pot);
        }
        bus.add_chip(
            Some(bp::CLOCK_CHANNEL),
            bp::CLOCK_ADDRESS,
            SimChip::si570(si570::FACTORY_STARTUP_MHZ),
        );
        for offset in 0..bp::NUM_ADCS as u8 {
            let mut adc = SimChip::adc();
            if let Model::Adc { channels } = &mut adc.model {
                *channels = [0x400; 8];
            }
            bus.add_chip(Some(bp::MONITOR_CHANNEL), bp::ADC_BASE + offset, adc);
        }
        bus.add_chip(
            Some(bp::GPIO_CHANNEL),
            bp::POWER_GOOD_GPIO,
            SimChip::gpio(0xFF, EdgeModel::None),
        );
        bus.add_chip(
            Some(bp::GPIO_CHANNEL),
            bp::PSU_ENABLE_GPIO,
            SimChip::gpio(0x00, EdgeModel::None),
        );
        bus
    }

    fn route(&self) -> Option<u8> {
        self.mux.and_then(|_| self.selected_channel())
    }

    fn nack() -> SimError {
        SimError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
    }

    fn handle_write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SimError> {
        let channel = self.route();
        self.log.push(SimTransaction::Write {
            channel,
            address,
            bytes: bytes.to_vec(),
        });

        if let Some(mux) = self.mux.as_mut().filter(|m| m.address == address) {
            if mux.failing {
                return Err(Self::nack());
            }
            if let Some(&mask) = bytes.first() {
                mux.mask = mask;
            }
            return Ok(());
        }

        let key = (channel, address);
        if self.failing.contains(&key) {
            return Err(Self::nack());
        }
        let chip = self.chips.get_mut(&key).ok_or_else(Self::nack)?;
        chip.write(bytes);
        Ok(())
    }

    fn handle_read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), SimError> {
        let channel = self.route();
        self.log.push(SimTransaction::Read {
            channel,
            address,
            len: buf.len(),
        });

        if let Some(mux) = self.mux.filter(|m| m.address == address) {
            if mux.failing {
                return Err(Self::nack());
            }
            buf.fill(mux.mask);
            return Ok(());
        }

        let key = (channel, address);
        if self.failing.contains(&key) {
            return Err(Self::nack());
        }
        let chip = self.chips.get_mut(&key).ok_or_else(Self::nack)?;
        chip.read(buf);
        Ok(())
    }
}

impl ErrorType for SimBus {
    type Error = SimError;
}

impl I2c for SimBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                Operation::Write(bytes) => self.handle_write(address, bytes)?,
                Operation::Read(buf) => self.handle_read(address, buf)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unselected_device_does_not_ack() {
        let mut bus = SimBus::new();
        bus.add_mux(0x70);
        bus.add_chip(Some(3), 0x20, SimChip::registers());
        assert!(bus.write(0x20, &[0x00, 0x01]).is_err());
        bus.write(0x70, &[1 << 3]).unwrap();
        assert!(bus.write(0x20, &[0x00, 0x01]).is_ok());
        assert_eq!(bus.selected_channel(), Some(3));
    }

    #[test]
    fn test_adc_conversion_word() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x22, SimChip::adc());
        bus.set_adc(None, 0x22, 5, 0x0ABC);
        let mut buf = [0u8; 2];
        bus.write_read(0x22, &[0x80 | (5 << 4)], &mut buf).unwrap();
        assert_eq!(buf, [0x5A, 0xBC]);
    }

    #[test]
    fn test_quad_enable_toggles_on_rising_edge() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x20, SimChip::gpio(0x00, EdgeModel::QuadEnable));
        bus.write(0x20, &[IODIR, 0xF0]).unwrap();
        bus.write(0x20, &[GPIO, 0x00]).unwrap();
        bus.write(0x20, &[GPIO, 0x05]).unwrap();
        bus.write(0x20, &[GPIO, 0x00]).unwrap();
        assert_eq!(bus.inputs(None, 0x20), Some(0x50));
        assert_eq!(bus.register(None, 0x20, GPIO), Some(0x50));
    }
}
