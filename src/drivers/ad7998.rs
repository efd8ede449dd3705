//! AD7998 8-channel 12-bit I2C ADC.

use embedded_hal::i2c::I2c;

use crate::i2c::{Device, I2cError, I2cTree, Xfer};

pub const NUM_CHANNELS: u8 = 8;

const CYCLE_TIMER_REGISTER: u8 = 0x03;
const CONVERSION_COMMAND: u8 = 0x80;
const FULL_SCALE: f64 = 4095.0;

#[derive(Debug, Clone, Copy)]
pub struct Ad7998 {
    device: Device,
}

impl Ad7998 {
    /// Take ownership of an attached device and start its cycle timer.
    pub fn new<B: I2c>(tree: &mut I2cTree<B>, device: Device) -> Result<Self, I2cError> {
        device.write8(tree, CYCLE_TIMER_REGISTER, 0x01)?;
        Ok(Self { device })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Raw conversion word, channel-id bits included.
    pub fn read_input_raw<B: I2c>(&self, tree: &mut I2cTree<B>, channel: u8) -> Xfer<u16> {
        if channel >= NUM_CHANNELS {
            return Err(I2cError::IllegalChannel {
                channel: usize::from(channel),
                max: usize::from(NUM_CHANNELS - 1),
            });
        }
        let word = self
            .device
            .read_u16(tree, CONVERSION_COMMAND | (channel << 4))?;
        Ok(word.map(u16::swap_bytes))
    }

    /// Conversion result as a fraction of full scale, `0.0..=1.0`.
    pub fn read_input_scaled<B: I2c>(&self, tree: &mut I2cTree<B>, channel: u8) -> Xfer<f64> {
        let raw = self.read_input_raw(tree, channel)?;
        Ok(raw.map(|r| f64::from(r & 0x0FFF) / FULL_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::BusTransport;
    use crate::sim::{SimBus, SimChip, SimTransaction};

    fn adc() -> (I2cTree<SimBus>, Ad7998) {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x22, SimChip::adc());
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let device = tree.add_device(0x22);
        let adc = Ad7998::new(&mut tree, device).unwrap();
        (tree, adc)
    }

    #[test]
    fn test_init_starts_cycle_timer() {
        let (tree, _) = adc();
        assert_eq!(
            tree.transport().bus().log()[0],
            SimTransaction::Write { channel: None, address: 0x22, bytes: vec![0x03, 0x01] }
        );
    }

    #[test]
    fn test_scaled_reading() {
        let (mut tree, adc) = adc();
        tree.transport_mut().bus_mut().set_adc(None, 0x22, 3, 0x0FFF);
        tree.transport_mut().bus_mut().set_adc(None, 0x22, 4, 0x0800);
        assert_eq!(adc.read_input_scaled(&mut tree, 3).unwrap(), Some(1.0));
        assert_eq!(adc.read_input_scaled(&mut tree, 4).unwrap(), Some(2048.0 / 4095.0));
        assert_eq!(adc.read_input_scaled(&mut tree, 0).unwrap(), Some(0.0));
    }

    #[test]
    fn test_raw_word_keeps_channel_bits() {
        let (mut tree, adc) = adc();
        tree.transport_mut().bus_mut().set_adc(None, 0x22, 1, 0x0234);
        assert_eq!(adc.read_input_raw(&mut tree, 1).unwrap(), Some(0x1234));
    }

    #[test]
    fn test_illegal_channel() {
        let (mut tree, adc) = adc();
        assert!(matches!(
            adc.read_input_raw(&mut tree, 8),
            Err(I2cError::IllegalChannel { channel: 8, .. })
        ));
    }
}
