//! Si570 I2C programmable crystal oscillator.
//!
//! Output frequency is `f_xtal * RFREQ / (HS_DIV * N1)`. The crystal
//! frequency differs per part, so it is recovered at construction from the
//! factory startup registers and the known startup frequency.

use embedded_hal::i2c::I2c;
use tracing::{debug, info, warn};

use crate::i2c::{Device, I2cError, I2cTree, Xfer};

pub const FACTORY_STARTUP_MHZ: f64 = 10.0;
pub const MIN_FREQUENCY_MHZ: f64 = 10.0;
pub const MAX_FREQUENCY_MHZ: f64 = 945.0;

const NOMINAL_XTAL_MHZ: f64 = 114.285;
const DCO_MIN_MHZ: f64 = 4850.0;
const DCO_MAX_MHZ: f64 = 5670.0;
const HS_DIVIDERS: [u8; 6] = [11, 9, 7, 6, 5, 4];
const RFREQ_SCALE: f64 = (1u64 << 28) as f64;
/// Control register reads allowed for RECALL to self-clear.
const RECALL_POLLS: usize = 10;

mod reg {
    pub const HS_N1: u8 = 7;
    pub const CONTROL: u8 = 135;
    pub const FREEZE_DCO: u8 = 137;

    pub const RECALL: u8 = 0x01;
    pub const NEW_FREQ: u8 = 0x40;
    pub const FREEZE: u8 = 0x10;
}

/// Divider settings held in registers 7 to 12.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dividers {
    pub hs_div: u8,
    pub n1: u8,
    pub rfreq: f64,
}

impl Dividers {
    pub fn decode(regs: &[u8; 6]) -> Self {
        let hs_div = ((regs[0] >> 5) & 0x07) + 4;
        let n1 = (((regs[0] & 0x1F) << 2) | (regs[1] >> 6)) + 1;
        let mut rfreq = u64::from(regs[1] & 0x3F);
        for &byte in &regs[2..] {
            rfreq = (rfreq << 8) | u64::from(byte);
        }
        Self {
            hs_div,
            n1,
            rfreq: rfreq as f64 / RFREQ_SCALE,
        }
    }

    pub fn encode(&self) -> [u8; 6] {
        let hs = self.hs_div - 4;
        let n1 = self.n1 - 1;
        let rfreq = (self.rfreq * RFREQ_SCALE).round() as u64;
        [
            (hs << 5) | ((n1 >> 2) & 0x1F),
            ((n1 & 0x03) << 6) | ((rfreq >> 32) as u8 & 0x3F),
            (rfreq >> 24) as u8,
            (rfreq >> 16) as u8,
            (rfreq >> 8) as u8,
            rfreq as u8,
        ]
    }

    pub fn output_mhz(&self, xtal_mhz: f64) -> f64 {
        xtal_mhz * self.rfreq / (f64::from(self.hs_div) * f64::from(self.n1))
    }
}

/// Lowest-DCO divider pair that reaches `mhz`, with the DCO frequency.
pub fn find_dividers(mhz: f64) -> Option<(u8, u8, f64)> {
    let mut best: Option<(u8, u8, f64)> = None;
    for hs_div in HS_DIVIDERS {
        for n1 in (1..=128u8).filter(|n| *n == 1 || n % 2 == 0) {
            let dco = mhz * f64::from(hs_div) * f64::from(n1);
            if !(DCO_MIN_MHZ..=DCO_MAX_MHZ).contains(&dco) {
                continue;
            }
            if best.map_or(true, |(_, _, current)| dco < current) {
                best = Some((hs_div, n1, dco));
            }
        }
    }
    best
}

/// Registers a part with the nominal crystal would hold at `mhz`.
pub(crate) fn startup_registers(mhz: f64) -> Option<[u8; 6]> {
    let (hs_div, n1, dco) = find_dividers(mhz)?;
    Some(
        Dividers {
            hs_div,
            n1,
            rfreq: dco / NOMINAL_XTAL_MHZ,
        }
        .encode(),
    )
}

#[derive(Debug, Clone)]
pub struct Si570 {
    device: Device,
    xtal_mhz: f64,
    frequency_mhz: f64,
}

impl Si570 {
    /// Reload the startup registers from non-volatile memory, then derive
    /// the crystal frequency from them. Registers 7 to 12 may still hold a
    /// previous run's programming until RECALL completes.
    pub fn new<B: I2c>(tree: &mut I2cTree<B>, device: Device, startup_mhz: f64) -> Result<Self, I2cError> {
        Self::recall(tree, &device)?;
        let xtal_mhz = match device.read_list(tree, reg::HS_N1, 6)? {
            Some(bytes) => {
                let mut regs = [0u8; 6];
                regs.copy_from_slice(&bytes);
                let dividers = Dividers::decode(&regs);
                if dividers.rfreq > 0.0 {
                    startup_mhz * f64::from(dividers.hs_div) * f64::from(dividers.n1) / dividers.rfreq
                } else {
                    NOMINAL_XTAL_MHZ
                }
            }
            None => NOMINAL_XTAL_MHZ,
        };
        debug!("Si570 at 0x{:02x}: crystal {:.6} MHz", device.address(), xtal_mhz);
        Ok(Self {
            device,
            xtal_mhz,
            frequency_mhz: startup_mhz,
        })
    }

    fn recall<B: I2c>(tree: &mut I2cTree<B>, device: &Device) -> Result<(), I2cError> {
        if device.write8(tree, reg::CONTROL, reg::RECALL)?.is_none() {
            return Ok(());
        }
        for _ in 0..RECALL_POLLS {
            match device.read_u8(tree, reg::CONTROL)? {
                Some(control) if control & reg::RECALL != 0 => continue,
                _ => return Ok(()),
            }
        }
        warn!("Si570 at 0x{:02x}: RECALL did not complete", device.address());
        Ok(())
    }

    pub fn xtal_mhz(&self) -> f64 {
        self.xtal_mhz
    }

    pub fn get_frequency(&self) -> f64 {
        self.frequency_mhz
    }

    /// Reprogram the output. The DCO is frozen while the divider registers
    /// change and the new frequency is latched afterwards.
    pub fn set_frequency<B: I2c>(&mut self, tree: &mut I2cTree<B>, mhz: f64) -> Xfer<()> {
        let illegal = I2cError::IllegalValue {
            what: "Si570 frequency",
            value: mhz,
        };
        if !(MIN_FREQUENCY_MHZ..=MAX_FREQUENCY_MHZ).contains(&mhz) {
            return Err(illegal);
        }
        let (hs_div, n1, dco) = find_dividers(mhz).ok_or(illegal)?;
        let regs = Dividers {
            hs_div,
            n1,
            rfreq: dco / self.xtal_mhz,
        }
        .encode();

        self.device.write8(tree, reg::FREEZE_DCO, reg::FREEZE)?;
        let written = self.device.write_list(tree, reg::HS_N1, &regs)?;
        self.device.write8(tree, reg::FREEZE_DCO, 0)?;
        self.device.write8(tree, reg::CONTROL, reg::NEW_FREQ)?;

        if written.is_some() {
            self.frequency_mhz = mhz;
            info!("Si570 set to {} MHz (HS_DIV {}, N1 {})", mhz, hs_div, n1);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::BusTransport;
    use crate::sim::{SimBus, SimChip, SimTransaction};

    #[test]
    fn test_divider_search_prefers_lowest_dco() {
        let (hs_div, n1, dco) = find_dividers(21.0).unwrap();
        assert_eq!((hs_div, n1), (4, 58));
        assert!((dco - 4872.0).abs() < 1e-9);
        assert!(find_dividers(2000.0).is_none());
    }

    #[test]
    fn test_register_encoding() {
        let dividers = Dividers {
            hs_div: 11,
            n1: 48,
            rfreq: 46.2,
        };
        let decoded = Dividers::decode(&dividers.encode());
        assert_eq!((decoded.hs_div, decoded.n1), (11, 48));
        assert!((decoded.rfreq - 46.2).abs() < 1e-8);
    }

    #[test]
    fn test_set_frequency_programs_registers() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x55, SimChip::si570(FACTORY_STARTUP_MHZ));
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let device = tree.add_device(0x55);
        let mut osc = Si570::new(&mut tree, device, FACTORY_STARTUP_MHZ).unwrap();
        assert!((osc.xtal_mhz() - NOMINAL_XTAL_MHZ).abs() < 1e-3);

        tree.transport_mut().bus_mut().clear_log();
        osc.set_frequency(&mut tree, 21.0).unwrap();
        assert_eq!(osc.get_frequency(), 21.0);

        let mut regs = [0u8; 6];
        for (i, slot) in regs.iter_mut().enumerate() {
            *slot = tree.transport().bus().register(None, 0x55, 7 + i as u8).unwrap();
        }
        let programmed = Dividers::decode(&regs).output_mhz(osc.xtal_mhz());
        assert!((programmed - 21.0).abs() < 1e-6);

        let log = tree.transport().bus().log();
        assert_eq!(
            log.first(),
            Some(&SimTransaction::Write { channel: None, address: 0x55, bytes: vec![137, 0x10] })
        );
        assert_eq!(
            log.last(),
            Some(&SimTransaction::Write { channel: None, address: 0x55, bytes: vec![135, 0x40] })
        );
    }

    #[test]
    fn test_restart_recovers_crystal_frequency() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x55, SimChip::si570(FACTORY_STARTUP_MHZ));
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let device = tree.add_device(0x55);
        let mut first = Si570::new(&mut tree, device, FACTORY_STARTUP_MHZ).unwrap();
        first.set_frequency(&mut tree, 21.0).unwrap();

        // Service restart without a power cycle: registers hold 21 MHz.
        let device = tree.add_device(0x55);
        let mut second = Si570::new(&mut tree, device, FACTORY_STARTUP_MHZ).unwrap();
        assert!((second.xtal_mhz() - first.xtal_mhz()).abs() < 1e-6);

        second.set_frequency(&mut tree, 21.0).unwrap();
        let mut regs = [0u8; 6];
        for (i, slot) in regs.iter_mut().enumerate() {
            *slot = tree.transport().bus().register(None, 0x55, 7 + i as u8).unwrap();
        }
        let programmed = Dividers::decode(&regs).output_mhz(NOMINAL_XTAL_MHZ);
        assert!((programmed - 21.0).abs() < 1e-3);
    }

    #[test]
    fn test_construction_issues_recall_first() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x55, SimChip::si570(FACTORY_STARTUP_MHZ));
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let device = tree.add_device(0x55);
        Si570::new(&mut tree, device, FACTORY_STARTUP_MHZ).unwrap();
        assert_eq!(
            tree.transport().bus().log().first(),
            Some(&SimTransaction::Write { channel: None, address: 0x55, bytes: vec![135, 0x01] })
        );
        assert_eq!(tree.transport().bus().register(None, 0x55, 135), Some(0));
    }

    #[test]
    fn test_out_of_range_frequency() {
        let mut bus = SimBus::new();
        bus.add_chip(None, 0x55, SimChip::si570(FACTORY_STARTUP_MHZ));
        let mut tree = I2cTree::new(BusTransport::new(bus));
        let device = tree.add_device(0x55);
        let mut osc = Si570::new(&mut tree, device, FACTORY_STARTUP_MHZ).unwrap();
        assert!(osc.set_frequency(&mut tree, 5.0).is_err());
        assert!(osc.set_frequency(&mut tree, 1000.0).is_err());
    }
}
