use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::I2cError;

/// What happens to a transaction that fails on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultPolicy {
    /// Log a warning and hand the caller the `Ok(None)` sentinel.
    #[default]
    Trap,
    /// Propagate the failure as [`I2cError::Bus`].
    Raise,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub fault_policy: FaultPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub transactions: u32,
    pub trapped_faults: u32,
    pub raised_faults: u32,
}

/// SMBus-style byte, word and block primitives over an `embedded-hal` bus.
///
/// Words travel little-endian, low byte first, as SMBus defines them.
pub struct BusTransport<B> {
    bus: B,
    config: BusConfig,
    stats: TransportStats,
}

impl<B: I2c> BusTransport<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, BusConfig::default())
    }

    pub fn with_config(bus: B, config: BusConfig) -> Self {
        Self {
            bus,
            config,
            stats: TransportStats::default(),
        }
    }

    pub fn policy(&self) -> FaultPolicy {
        self.config.fault_policy
    }

    pub fn set_policy(&mut self, policy: FaultPolicy) {
        self.config.fault_policy = policy;
    }

    pub fn trapped_faults(&self) -> u32 {
        self.stats.trapped_faults
    }

    pub fn get_stats(&self) -> TransportStats {
        self.stats
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Send a single command byte with no register address.
    pub fn write_byte(&mut self, address: u8, value: u8) -> Result<(), I2cError> {
        self.write(address, &[value])
    }

    pub fn write_byte_data(&mut self, address: u8, reg: u8, value: u8) -> Result<(), I2cError> {
        self.write(address, &[reg, value])
    }

    pub fn write_word_data(&mut self, address: u8, reg: u8, value: u16) -> Result<(), I2cError> {
        let [lo, hi] = value.to_le_bytes();
        self.write(address, &[reg, lo, hi])
    }

    pub fn write_block_data(&mut self, address: u8, reg: u8, data: &[u8]) -> Result<(), I2cError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        self.write(address, &frame)
    }

    pub fn read_byte_data(&mut self, address: u8, reg: u8) -> Result<u8, I2cError> {
        let mut buf = [0u8; 1];
        self.write_read(address, reg, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_word_data(&mut self, address: u8, reg: u8) -> Result<u16, I2cError> {
        let mut buf = [0u8; 2];
        self.write_read(address, reg, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_block_data(&mut self, address: u8, reg: u8, len: usize) -> Result<Vec<u8>, I2cError> {
        let mut buf = vec![0u8; len];
        self.write_read(address, reg, &mut buf)?;
        Ok(buf)
    }

    /// Applies the fault policy to the outcome of one transaction.
    ///
    /// Only wire faults are subject to the policy; tree and argument errors
    /// always propagate.
    pub fn resolve<T>(&mut self, outcome: Result<T, I2cError>) -> Result<Option<T>, I2cError> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_bus_fault() => match self.config.fault_policy {
                FaultPolicy::Trap => {
                    self.stats.trapped_faults = self.stats.trapped_faults.wrapping_add(1);
                    warn!("Trapped {}", err);
                    Ok(None)
                }
                FaultPolicy::Raise => {
                    self.stats.raised_faults = self.stats.raised_faults.wrapping_add(1);
                    Err(err)
                }
            },
            Err(err) => Err(err),
        }
    }

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), I2cError> {
        self.stats.transactions = self.stats.transactions.wrapping_add(1);
        trace!("i2c write 0x{:02x} {:02x?}", address, bytes);
        self.bus
            .write(address, bytes)
            .map_err(|e| I2cError::bus(address, &e))
    }

    fn write_read(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> Result<(), I2cError> {
        self.stats.transactions = self.stats.transactions.wrapping_add(1);
        trace!("i2c write_read 0x{:02x} reg 0x{:02x} len {}", address, reg, buf.len());
        self.bus
            .write_read(address, &[reg], buf)
            .map_err(|e| I2cError::bus(address, &e))
    }
}
