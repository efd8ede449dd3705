//! TPL0102 dual 256-tap I2C digital potentiometer.

use embedded_hal::i2c::I2c;

use crate::i2c::{Device, I2cError, I2cTree, Xfer};

pub const NUM_WIPERS: usize = 2;
pub const MAX_POSITION: u8 = 255;

const WIPER_REGISTERS: [u8; NUM_WIPERS] = [0x00, 0x01];
const ACCESS_CONTROL: u8 = 0x10;
/// Set: wiper writes are volatile. Clear: they are also stored to EEPROM.
const ACR_VOLATILE: u8 = 0x80;
/// Set for normal operation; clear puts the part in shutdown.
const ACR_ACTIVE: u8 = 0x40;

#[derive(Debug, Clone)]
pub struct Tpl0102 {
    device: Device,
    positions: [u8; NUM_WIPERS],
    terminals: [(f64, f64); NUM_WIPERS],
    non_volatile: bool,
}

impl Tpl0102 {
    pub fn new<B: I2c>(tree: &mut I2cTree<B>, device: Device) -> Result<Self, I2cError> {
        let mut positions = [0x80; NUM_WIPERS];
        for (slot, reg) in positions.iter_mut().zip(WIPER_REGISTERS) {
            if let Some(position) = device.read_u8(tree, reg)? {
                *slot = position;
            }
        }
        let acr = device.read_u8(tree, ACCESS_CONTROL)?.unwrap_or(ACR_VOLATILE | ACR_ACTIVE);
        Ok(Self {
            device,
            positions,
            terminals: [(0.0, 1.0); NUM_WIPERS],
            non_volatile: acr & ACR_VOLATILE == 0,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_non_volatile(&self) -> bool {
        self.non_volatile
    }

    /// Choose whether subsequent wiper writes persist across power cycles.
    pub fn set_non_volatile<B: I2c>(&mut self, tree: &mut I2cTree<B>, enabled: bool) -> Xfer<()> {
        let acr = if enabled { ACR_ACTIVE } else { ACR_ACTIVE | ACR_VOLATILE };
        let written = self.device.write8(tree, ACCESS_CONTROL, acr)?;
        if written.is_some() {
            self.non_volatile = enabled;
        }
        Ok(written)
    }

    pub fn get_wiper(&self, wiper: usize) -> Result<u8, I2cError> {
        check_wiper(wiper)?;
        Ok(self.positions[wiper])
    }

    pub fn set_wiper<B: I2c>(&mut self, tree: &mut I2cTree<B>, wiper: usize, position: u8) -> Xfer<()> {
        check_wiper(wiper)?;
        let written = self.device.write8(tree, WIPER_REGISTERS[wiper], position)?;
        if written.is_some() {
            self.positions[wiper] = position;
        }
        Ok(written)
    }

    /// Record the potentials across the ends of a wiper's resistor so that
    /// wiper positions can be read and written as potentials.
    pub fn set_terminal_potentials(&mut self, wiper: usize, low: f64, high: f64) -> Result<(), I2cError> {
        check_wiper(wiper)?;
        if (high - low).abs() < f64::EPSILON {
            return Err(I2cError::IllegalValue {
                what: "terminal span",
                value: high - low,
            });
        }
        self.terminals[wiper] = (low, high);
        Ok(())
    }

    pub fn get_potential(&self, wiper: usize) -> Result<f64, I2cError> {
        let position = self.get_wiper(wiper)?;
        let (low, high) = self.terminals[wiper];
        Ok(low + (high - low) * f64::from(position) / f64::from(MAX_POSITION))
    }

    pub fn set_potential<B: I2c>(&mut self, tree: &mut I2cTree<B>, wiper: usize, value: f64) -> Xfer<()> {
        check_wiper(wiper)?;
        let (low, high) = self.terminals[wiper];
        let fraction = (value - low) / (high - low);
        if !(0.0..=1.0).contains(&fraction) {
            return Err(I2cError::IllegalValue {
                what: "potential",
                value,
            });
        }
        let position = (fraction * f64::from(MAX_POSITION)).round() as u8;
        self.set_wiper(tree, wiper, position)
    }
}

fn check_wiper(wiper: usize) -> Result<(), I2cError> {
    if wiper >= NUM_WIPERS {
        return Err(I2cError::IllegalChannel {
            channel: wiper,
            max: NUM_WIPERS - 1,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::BusTransport;
    use crate::sim::{SimBus, SimChip};

    fn pot() -> (I2cTree<SimBus>, Tpl0102) {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x50, SimChip::registers());
        bus.set_register(None, 0x50, 0x00, 0x40);
        bus.set_register(None, 0x50, 0x01, 0xC0);
        bus.set_register(None, 0x50, ACCESS_CONTROL, ACR_VOLATILE | ACR_ACTIVE);
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let device = tree.add_device(0x50);
        let pot = Tpl0102::new(&mut tree, device).unwrap();
        (tree, pot)
    }

    #[test]
    fn test_reads_wipers_on_construction() {
        let (_, pot) = pot();
        assert_eq!(pot.get_wiper(0).unwrap(), 0x40);
        assert_eq!(pot.get_wiper(1).unwrap(), 0xC0);
        assert!(!pot.is_non_volatile());
    }

    #[test]
    fn test_potential_mapping() {
        let (mut tree, mut pot) = pot();
        pot.set_terminal_potentials(1, -2.0, 3.3).unwrap();
        pot.set_potential(&mut tree, 1, 3.3).unwrap();
        assert_eq!(tree.transport().bus().register(None, 0x50, 0x01), Some(0xFF));
        pot.set_potential(&mut tree, 1, -2.0).unwrap();
        assert_eq!(pot.get_wiper(1).unwrap(), 0);
        assert!((pot.get_potential(1).unwrap() + 2.0).abs() < 1e-9);
        assert!(pot.set_potential(&mut tree, 1, 3.4).is_err());
    }

    #[test]
    fn test_non_volatile_clears_volatile_bit() {
        let (mut tree, mut pot) = pot();
        pot.set_non_volatile(&mut tree, true).unwrap();
        assert_eq!(tree.transport().bus().register(None, 0x50, ACCESS_CONTROL), Some(ACR_ACTIVE));
        assert!(pot.is_non_volatile());
    }

    #[test]
    fn test_wiper_index_checked() {
        let (mut tree, mut pot) = pot();
        assert!(pot.set_wiper(&mut tree, 2, 0).is_err());
        assert!(pot.get_wiper(2).is_err());
    }
}
