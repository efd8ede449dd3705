//! TCA9548 8-channel I2C switch.

use embedded_hal::i2c::I2c;

use crate::i2c::{Device, I2cError, I2cTree, NodeId};

pub const NUM_CHANNELS: u8 = 8;

/// A multiplexer container in the tree. Devices and groups attached to it
/// get their channel selected before each access, and only when the
/// selection changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tca9548 {
    node: NodeId,
}

impl Tca9548 {
    pub fn new<B: I2c>(tree: &mut I2cTree<B>, address: u8) -> Self {
        Self {
            node: tree.add_mux(address),
        }
    }

    pub fn id(&self) -> NodeId {
        self.node
    }

    pub fn attach_device<B: I2c>(
        &self,
        tree: &mut I2cTree<B>,
        channel: u8,
        address: u8,
    ) -> Result<Device, I2cError> {
        tree.attach_device(self.node, Some(channel), address)
    }

    /// Attach an existing device or container on a channel.
    pub fn attach<B: I2c>(&self, tree: &mut I2cTree<B>, channel: u8, child: NodeId) -> Result<(), I2cError> {
        tree.attach(self.node, child, Some(channel))
    }

    pub fn remove<B: I2c>(&self, tree: &mut I2cTree<B>, child: NodeId) -> Result<(), I2cError> {
        tree.remove(self.node, child)
    }

    pub fn selected_channel<B: I2c>(&self, tree: &I2cTree<B>) -> Option<u8> {
        tree.selected_channel(self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::BusTransport;
    use crate::sim::{SimBus, SimChip};

    #[test]
    fn test_device_on_each_channel() {
        let mut bus = SimBus::new();
        bus.add_mux(0x70);
        for channel in 0..NUM_CHANNELS {
            bus.add_chip(Some(channel), 0x50, SimChip::registers());
        }
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let tca = Tca9548::new(&mut tree, 0x70);

        for channel in 0..NUM_CHANNELS {
            let dev = tca.attach_device(&mut tree, channel, 0x50).unwrap();
            dev.write8(&mut tree, 0x00, channel).unwrap();
            assert_eq!(tca.selected_channel(&tree), Some(channel));
        }
        assert_eq!(tree.transport().bus().register(Some(5), 0x50, 0x00), Some(5));
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut tree = I2cTree::new(BusTransport::new(SimBus::new()));
        let tca = Tca9548::new(&mut tree, 0x70);
        assert!(matches!(
            tca.attach_device(&mut tree, 8, 0x20),
            Err(I2cError::IllegalChannel { channel: 8, .. })
        ));
    }
}
