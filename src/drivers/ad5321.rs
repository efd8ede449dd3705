//! AD5321 12-bit I2C DAC.

use embedded_hal::i2c::I2c;

use crate::i2c::{Device, I2cError, I2cTree, Xfer};

const CODE_SPAN: f64 = 4096.0;
const MAX_CODE: u16 = 4095;

#[derive(Debug, Clone, Copy)]
pub struct Ad5321 {
    device: Device,
}

impl Ad5321 {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Encode a fraction of full scale as the two bytes the part expects:
    /// the upper nibble of the code, then the lower byte.
    pub fn encode(output: f64) -> Result<(u8, u8), I2cError> {
        if !(0.0..=1.0).contains(&output) {
            return Err(I2cError::IllegalValue {
                what: "DAC output",
                value: output,
            });
        }
        let code = ((output * CODE_SPAN) as u16).min(MAX_CODE);
        Ok(((code >> 8) as u8 & 0x0F, (code & 0xFF) as u8))
    }

    pub fn set_output_scaled<B: I2c>(&self, tree: &mut I2cTree<B>, output: f64) -> Xfer<()> {
        let (msb, lsb) = Self::encode(output)?;
        self.device.write8(tree, msb, lsb)
    }

    pub fn read_value_scaled<B: I2c>(&self, tree: &mut I2cTree<B>) -> Xfer<f64> {
        let word = self.device.read_u16(tree, 0)?;
        Ok(word.map(|w| f64::from(w.swap_bytes() & 0x0FFF) / CODE_SPAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::BusTransport;
    use crate::sim::{SimBus, SimChip};

    #[test]
    fn test_encoding() {
        assert_eq!(Ad5321::encode(0.75).unwrap(), (0x0C, 0x00));
        assert_eq!(Ad5321::encode(1.0).unwrap(), (0x0F, 0xFF));
        assert_eq!(Ad5321::encode(0.0).unwrap(), (0x00, 0x00));
        assert!(Ad5321::encode(1.01).is_err());
        assert!(Ad5321::encode(-0.1).is_err());
    }

    #[test]
    fn test_write_and_read_back() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x0C, SimChip::dac());
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let dac = Ad5321::new(tree.add_device(0x0C));

        dac.set_output_scaled(&mut tree, 0.5).unwrap();
        assert_eq!(tree.transport().bus().dac_code(None, 0x0C), Some(2048));
        assert_eq!(dac.read_value_scaled(&mut tree).unwrap(), Some(0.5));
    }

    #[test]
    fn test_rejected_value_never_reaches_bus() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x0C, SimChip::dac());
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let dac = Ad5321::new(tree.add_device(0x0C));

        assert!(dac.set_output_scaled(&mut tree, 2.0).is_err());
        assert!(tree.transport().bus().log().is_empty());
    }
}
