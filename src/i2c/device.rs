use embedded_hal::i2c::I2c;

use super::{I2cTree, NodeId, Xfer};

/// A device at a fixed address in an [`I2cTree`].
///
/// The handle is plain data; every call borrows the tree, runs the pre-access
/// hook chain and then issues exactly one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    id: NodeId,
    address: u8,
}

impl Device {
    pub(crate) fn new(id: NodeId, address: u8) -> Self {
        Self { id, address }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Write a bare command byte.
    pub fn write_byte<B: I2c>(&self, tree: &mut I2cTree<B>, value: u8) -> Xfer<()> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.write_byte(addr, value))
    }

    pub fn write8<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8, value: u8) -> Xfer<()> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.write_byte_data(addr, reg, value))
    }

    pub fn write16<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8, value: u16) -> Xfer<()> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.write_word_data(addr, reg, value))
    }

    pub fn write_list<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8, data: &[u8]) -> Xfer<()> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.write_block_data(addr, reg, data))
    }

    pub fn read_u8<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8) -> Xfer<u8> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.read_byte_data(addr, reg))
    }

    pub fn read_s8<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8) -> Xfer<i8> {
        Ok(self.read_u8(tree, reg)?.map(|v| i8::from_ne_bytes([v])))
    }

    pub fn read_u16<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8) -> Xfer<u16> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.read_word_data(addr, reg))
    }

    pub fn read_s16<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8) -> Xfer<i16> {
        Ok(self.read_u16(tree, reg)?.map(|v| i16::from_ne_bytes(v.to_ne_bytes())))
    }

    pub fn read_list<B: I2c>(&self, tree: &mut I2cTree<B>, reg: u8, len: usize) -> Xfer<Vec<u8>> {
        let addr = self.address;
        tree.access(self.id, |bus| bus.read_block_data(addr, reg, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::{BusConfig, BusTransport, FaultPolicy, I2cError};
    use crate::sim::{SimBus, SimChip};

    fn tree(policy: FaultPolicy) -> (I2cTree<SimBus>, Device) {
        let mut bus = SimBus::new();
        bus.add_mux(0x70);
        bus.add_chip(Some(0), 0x40, SimChip::registers());
        let mut tree = I2cTree::new(BusTransport::with_config(bus, BusConfig { fault_policy: policy }));
        let mux = tree.add_mux(0x70);
        let dev = tree.attach_device(mux, Some(0), 0x40).unwrap();
        (tree, dev)
    }

    #[test]
    fn test_words_are_little_endian() {
        let (mut tree, dev) = tree(FaultPolicy::Raise);
        dev.write16(&mut tree, 0x10, 0x1234).unwrap();
        assert_eq!(tree.transport().bus().register(Some(0), 0x40, 0x10), Some(0x34));
        assert_eq!(tree.transport().bus().register(Some(0), 0x40, 0x11), Some(0x12));
        assert_eq!(dev.read_u16(&mut tree, 0x10).unwrap(), Some(0x1234));
    }

    #[test]
    fn test_signed_reads() {
        let (mut tree, dev) = tree(FaultPolicy::Raise);
        dev.write_list(&mut tree, 0x20, &[0xFE, 0xFF, 0xFF]).unwrap();
        assert_eq!(dev.read_s8(&mut tree, 0x20).unwrap(), Some(-2));
        assert_eq!(dev.read_s16(&mut tree, 0x21).unwrap(), Some(-1));
        assert_eq!(dev.read_list(&mut tree, 0x20, 3).unwrap(), Some(vec![0xFE, 0xFF, 0xFF]));
    }

    #[test]
    fn test_trap_returns_sentinel() {
        let (mut tree, dev) = tree(FaultPolicy::Trap);
        tree.transport_mut().bus_mut().set_failing(Some(0), 0x40, true);
        assert_eq!(dev.read_u8(&mut tree, 0).unwrap(), None);
        assert_eq!(dev.write8(&mut tree, 0, 1).unwrap(), None);
        assert_eq!(tree.transport().trapped_faults(), 2);
    }

    #[test]
    fn test_raise_propagates_bus_error() {
        let (mut tree, dev) = tree(FaultPolicy::Raise);
        tree.transport_mut().bus_mut().set_failing(Some(0), 0x40, true);
        match dev.read_u8(&mut tree, 0) {
            Err(I2cError::Bus { address, .. }) => assert_eq!(address, 0x40),
            other => panic!("expected bus error, got {other:?}"),
        }
    }
}
