//! QEM detector backplane: bias resistors on digital pots, the sample clock,
//! supply current/voltage monitors, power-good inputs and the PSU enable.

use embedded_hal::i2c::I2c;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::drivers::{Ad7998, Direction, Mcp23008, Si570, Tca9548, Tpl0102};
use crate::drivers::si570::FACTORY_STARTUP_MHZ;
use crate::i2c::{BusTransport, I2cError, I2cTree};

use self::topology::*;

/// Fixed backplane wiring.
pub mod topology {
    use static_assertions::const_assert_eq;

    pub const MUX_ADDRESS: u8 = 0x70;

    pub const POT_CHANNEL: u8 = 0;
    pub const POT_BASE: u8 = 0x50;
    pub const NUM_POTS: usize = 5;

    pub const CLOCK_CHANNEL: u8 = 1;
    pub const CLOCK_ADDRESS: u8 = 0x55;

    pub const MONITOR_CHANNEL: u8 = 2;
    pub const ADC_BASE: u8 = 0x24;
    pub const NUM_ADCS: usize = 4;

    pub const GPIO_CHANNEL: u8 = 3;
    pub const POWER_GOOD_GPIO: u8 = 0x20;
    pub const PSU_ENABLE_GPIO: u8 = 0x42;

    const_assert_eq!(POT_BASE as usize + NUM_POTS, CLOCK_ADDRESS as usize);
}

pub const NUM_RESISTORS: usize = 7;
pub const NUM_MONITORS: usize = 13;
pub const NUM_POWER_GOOD: usize = 8;
pub const DEFAULT_CLOCK_MHZ: f64 = 21.0;

pub const RESISTOR_NAMES: [&str; NUM_RESISTORS] =
    ["AUXRESET", "VCM", "DACEXTREF", "VDD_RST", "VRESET", "VCTRL", "AUXSAMPLE"];
pub const RESISTOR_UNITS: [&str; NUM_RESISTORS] = ["V", "V", "uA", "V", "V", "V", "V"];

pub const ADC_NAMES: [&str; NUM_MONITORS] = [
    "VDD0_D18",
    "VDD_D25",
    "VDD_D18_PLL",
    "VDDO",
    "VDD_D18ADC",
    "VDD_P18",
    "VDD_A18_PLL",
    "VDD_D33",
    "VDD_RST",
    "VRESET",
    "VDD_A33",
    "VCTRL_POS",
    "VCTRL_NEG",
];

/// Full-scale current of each monitor, mA.
pub const CURRENT_MULTIPLIERS: [f64; NUM_MONITORS] =
    [19.5, 19.5, 1.95, 7.8, 19.5, 19.5, 1.95, 1.2, 1.2, 1.2, 1.2, 0.122, 0.122];

/// Monitors 0-6 are on the first ADC of each pair, 7-12 on the second.
const FIRST_BANK: usize = 7;
const LOW_RAIL_VOLTS: f64 = 0.000_732;
const HIGH_RAIL_VOLTS: f64 = 1.2;
const PSU_ENABLE_PIN: u8 = 0;

/// Sense network around the VDD_RST / VRESET pot: series resistance
/// and the 0.1 mA reference current into it.
const SENSE_CURRENT: f64 = 0.0001;
const SENSE_SERIES: f64 = 390.0;
const VDD_RST_SHUNT: f64 = 49_900.0;
const VRESET_SHUNT: f64 = 18_200.0;
const VRESET_OFFSET: f64 = 17_800.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackplaneError {
    #[error("illegal {what} index {index} specified (have {count})")]
    Range {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("{what} value {value} cannot be set")]
    IllegalValue { what: &'static str, value: f64 },

    #[error(transparent)]
    I2c(#[from] I2cError),
}

fn check_index(what: &'static str, index: usize, count: usize) -> Result<(), BackplaneError> {
    if index >= count {
        return Err(BackplaneError::Range { what, index, count });
    }
    Ok(())
}

/// Wiper step for a resistor whose value is not linear in position.
fn wiper_step(position: f64, value: f64) -> Result<u8, BackplaneError> {
    if !position.is_finite() || !(0.0..=255.0).contains(&position) {
        return Err(BackplaneError::IllegalValue {
            what: "resistor",
            value,
        });
    }
    Ok(position as u8)
}

fn shunted_value(wiper: u8, shunt: f64) -> f64 {
    SENSE_CURRENT / (1.0 / shunt + 1.0 / f64::from(wiper) / SENSE_SERIES)
}

pub struct Backplane<B> {
    tree: I2cTree<B>,
    tca: Tca9548,
    pots: Vec<Tpl0102>,
    clock: Si570,
    adcs: Vec<Ad7998>,
    power_good_gpio: Mcp23008,
    psu_gpio: Mcp23008,

    currents: [f64; NUM_MONITORS],
    voltages: [f64; NUM_MONITORS],
    power_good: [bool; NUM_POWER_GOOD],
    psu_enabled: bool,
    clock_mhz: f64,
    resistors: [f64; NUM_RESISTORS],
}

impl<B: I2c> Backplane<B> {
    pub fn new(transport: BusTransport<B>, mux_address: u8) -> Result<Self, BackplaneError> {
        let mut tree = I2cTree::new(transport);
        let tca = Tca9548::new(&mut tree, mux_address);

        let mut pots = Vec::with_capacity(NUM_POTS);
        for offset in 0..NUM_POTS as u8 {
            let device = tca.attach_device(&mut tree, POT_CHANNEL, POT_BASE + offset)?;
            pots.push(Tpl0102::new(&mut tree, device)?);
        }
        for pot in &mut pots {
            pot.set_non_volatile(&mut tree, true)?;
        }
        let terminals = [
            (0, 0, 0.0, 2.5),
            (0, 1, 0.0, 2.5),
            (1, 0, 0.0, 100.0),
            (3, 0, -2.0, 3.3),
            (4, 0, 0.0, 2.5),
        ];
        for (pot, wiper, low, high) in terminals {
            pots[pot].set_terminal_potentials(wiper, low, high)?;
        }

        let device = tca.attach_device(&mut tree, CLOCK_CHANNEL, CLOCK_ADDRESS)?;
        let mut clock = Si570::new(&mut tree, device, FACTORY_STARTUP_MHZ)?;
        clock.set_frequency(&mut tree, DEFAULT_CLOCK_MHZ)?;

        let mut adcs = Vec::with_capacity(NUM_ADCS);
        for offset in 0..NUM_ADCS as u8 {
            let device = tca.attach_device(&mut tree, MONITOR_CHANNEL, ADC_BASE + offset)?;
            adcs.push(Ad7998::new(&mut tree, device)?);
        }

        let device = tca.attach_device(&mut tree, GPIO_CHANNEL, POWER_GOOD_GPIO)?;
        let mut power_good_gpio = Mcp23008::new(&mut tree, device)?;
        for pin in 0..NUM_POWER_GOOD as u8 {
            power_good_gpio.setup(&mut tree, pin, Direction::In)?;
        }
        let device = tca.attach_device(&mut tree, GPIO_CHANNEL, PSU_ENABLE_GPIO)?;
        let mut psu_gpio = Mcp23008::new(&mut tree, device)?;
        psu_gpio.setup(&mut tree, PSU_ENABLE_PIN, Direction::Out)?;
        let psu_enabled = psu_gpio.input(&mut tree, PSU_ENABLE_PIN)?.unwrap_or(false);

        let position = |pot: usize, wiper: usize| pots[pot].get_wiper(wiper);
        let resistors = [
            f64::from(position(0, 0)?) * 0.0097,
            f64::from(position(0, 1)?) * 0.0097,
            f64::from(position(1, 0)?) * 0.29,
            shunted_value(position(2, 0)?, VDD_RST_SHUNT),
            shunted_value(position(2, 1)?, VRESET_SHUNT),
            f64::from(position(3, 0)?) * 0.021 - 2.0,
            f64::from(position(4, 0)?) * 0.0097,
        ];

        info!("Backplane initialised, clock {} MHz", clock.get_frequency());
        Ok(Self {
            tree,
            tca,
            pots,
            clock_mhz: clock.get_frequency(),
            clock,
            adcs,
            power_good_gpio,
            psu_gpio,
            currents: [0.0; NUM_MONITORS],
            voltages: [0.0; NUM_MONITORS],
            power_good: [false; NUM_POWER_GOOD],
            psu_enabled,
            resistors,
        })
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

    /// Refresh supply currents, voltages and power-good flags.
    pub fn poll_all_sensors(&mut self) -> Result<(), BackplaneError> {
        let tree = &mut self.tree;
        let [current_lo, voltage_lo, current_hi, voltage_hi] = [0, 1, 2, 3].map(|i| &self.adcs[i]);

        for monitor in 0..NUM_MONITORS {
            let (current_adc, voltage_adc, input, volts_per_unit) = if monitor < FIRST_BANK {
                (current_lo, voltage_lo, monitor, LOW_RAIL_VOLTS)
            } else {
                (current_hi, voltage_hi, monitor - FIRST_BANK, HIGH_RAIL_VOLTS)
            };
            let input = input as u8;
            if let Some(fraction) = current_adc.read_input_scaled(tree, input)? {
                self.currents[monitor] = fraction * CURRENT_MULTIPLIERS[monitor];
            }
            if let Some(fraction) = voltage_adc.read_input_scaled(tree, input)? {
                self.voltages[monitor] = fraction * volts_per_unit;
            }
        }

        if let Some(levels) = self.power_good_gpio.read_pins(tree)? {
            for (pin, good) in (0u8..).zip(self.power_good.iter_mut()) {
                *good = levels.pin(pin);
            }
        }
        Ok(())
    }

    /// Set a bias resistor in its own units. The VDD_RST and VRESET pots
    /// sit in a shunt network, so their wiper is solved from the value.
    pub fn set_resistor_value(&mut self, resistor: usize, value: f64) -> Result<(), BackplaneError> {
        check_index("resistor", resistor, NUM_RESISTORS)?;
        let tree = &mut self.tree;
        let pots = &mut self.pots;
        let written = match resistor {
            0 => pots[0].set_potential(tree, 0, value)?,
            1 => pots[0].set_potential(tree, 1, value)?,
            2 => pots[1].set_potential(tree, 0, value)?,
            3 => {
                let position = 1.0 / (SENSE_CURRENT * SENSE_SERIES / value - SENSE_SERIES / VDD_RST_SHUNT);
                pots[2].set_wiper(tree, 0, wiper_step(position, value)?)?
            }
            4 => {
                let position =
                    1.0 / (SENSE_CURRENT * SENSE_SERIES / (value - VRESET_OFFSET) - SENSE_SERIES / VRESET_SHUNT);
                pots[2].set_wiper(tree, 1, wiper_step(position, value)?)?
            }
            5 => pots[3].set_potential(tree, 0, value)?,
            _ => pots[4].set_potential(tree, 0, value)?,
        };
        if written.is_none() {
            warn!("Resistor {} write trapped, keeping {}", RESISTOR_NAMES[resistor], self.resistors[resistor]);
            return Ok(());
        }
        self.resistors[resistor] = value;
        info!("Resistor {} set to {} {}", RESISTOR_NAMES[resistor], value, RESISTOR_UNITS[resistor]);
        Ok(())
    }

    pub fn set_clock_frequency(&mut self, mhz: f64) -> Result<(), BackplaneError> {
        if self.clock.set_frequency(&mut self.tree, mhz)?.is_some() {
            self.clock_mhz = mhz;
        }
        Ok(())
    }

    pub fn set_psu_enable(&mut self, enabled: bool) -> Result<(), BackplaneError> {
        debug!("PSU enable -> {}", enabled);
        if self.psu_gpio.output(&mut self.tree, PSU_ENABLE_PIN, enabled)?.is_some() {
            self.psu_enabled = enabled;
        }
        Ok(())
    }
}

impl<B> Backplane<B> {
    pub fn get_resistor_value(&self, resistor: usize) -> Result<f64, BackplaneError> {
        check_index("resistor", resistor, NUM_RESISTORS)?;
        Ok(self.resistors[resistor])
    }

    pub fn get_resistor_name(&self, resistor: usize) -> Result<&'static str, BackplaneError> {
        check_index("resistor", resistor, NUM_RESISTORS)?;
        Ok(RESISTOR_NAMES[resistor])
    }

    pub fn get_resistor_units(&self, resistor: usize) -> Result<&'static str, BackplaneError> {
        check_index("resistor", resistor, NUM_RESISTORS)?;
        Ok(RESISTOR_UNITS[resistor])
    }

    /// Supply current in mA.
    pub fn get_current(&self, monitor: usize) -> Result<f64, BackplaneError> {
        check_index("monitor", monitor, NUM_MONITORS)?;
        Ok(self.currents[monitor])
    }

    pub fn get_voltage(&self, monitor: usize) -> Result<f64, BackplaneError> {
        check_index("monitor", monitor, NUM_MONITORS)?;
        Ok(self.voltages[monitor])
    }

    pub fn get_adc_name(&self, monitor: usize) -> Result<&'static str, BackplaneError> {
        check_index("monitor", monitor, NUM_MONITORS)?;
        Ok(ADC_NAMES[monitor])
    }

    pub fn get_power_good(&self, index: usize) -> Result<bool, BackplaneError> {
        check_index("power good", index, NUM_POWER_GOOD)?;
        Ok(self.power_good[index])
    }

    pub fn power_good(&self) -> &[bool; NUM_POWER_GOOD] {
        &self.power_good
    }

    pub fn get_clock_frequency(&self) -> f64 {
        self.clock_mhz
    }

    pub fn get_psu_enable(&self) -> bool {
        self.psu_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn backplane() -> Backplane<SimBus> {
        Backplane::new(BusTransport::new(SimBus::backplane()), MUX_ADDRESS).unwrap()
    }

    #[test]
    fn test_initial_resistors_from_wipers() {
        let bp = backplane();
        assert!((bp.get_resistor_value(0).unwrap() - 128.0 * 0.0097).abs() < 1e-9);
        assert!((bp.get_resistor_value(5).unwrap() - (128.0 * 0.021 - 2.0)).abs() < 1e-9);
        assert!((bp.get_resistor_value(3).unwrap() - shunted_value(128, VDD_RST_SHUNT)).abs() < 1e-12);
        assert_eq!(bp.get_clock_frequency(), DEFAULT_CLOCK_MHZ);
    }

    #[test]
    fn test_shunted_resistor_inverts() {
        let mut bp = backplane();
        let value = shunted_value(100, VDD_RST_SHUNT);
        bp.set_resistor_value(3, value).unwrap();
        let written = bp.bus().register(Some(POT_CHANNEL), POT_BASE + 2, 0x00).unwrap();
        assert!((99..=100).contains(&written));
    }

    #[test]
    fn test_resistor_errors() {
        let mut bp = backplane();
        assert!(matches!(
            bp.set_resistor_value(7, 1.0),
            Err(BackplaneError::Range { index: 7, .. })
        ));
        assert!(matches!(
            bp.set_resistor_value(3, 100.0),
            Err(BackplaneError::IllegalValue { .. })
        ));
        assert!(matches!(
            bp.set_resistor_value(0, 3.0),
            Err(BackplaneError::I2c(I2cError::IllegalValue { .. }))
        ));
        assert!((bp.get_resistor_value(0).unwrap() - 128.0 * 0.0097).abs() < 1e-9);
    }

    #[test]
    fn test_trapped_writes_keep_cached_values() {
        let mut bp = backplane();
        let before = bp.get_resistor_value(0).unwrap();
        let bus = bp.bus_mut();
        bus.set_failing(Some(POT_CHANNEL), POT_BASE, true);
        bus.set_failing(Some(CLOCK_CHANNEL), CLOCK_ADDRESS, true);
        bus.set_failing(Some(GPIO_CHANNEL), PSU_ENABLE_GPIO, true);

        bp.set_resistor_value(0, 1.0).unwrap();
        bp.set_clock_frequency(25.0).unwrap();
        bp.set_psu_enable(true).unwrap();

        assert_eq!(bp.get_resistor_value(0).unwrap(), before);
        assert_eq!(bp.get_clock_frequency(), DEFAULT_CLOCK_MHZ);
        assert!(!bp.get_psu_enable());
        assert!(bp.tree().transport().trapped_faults() >= 3);
    }
}
