//! MCP23008 8-bit I2C GPIO expander.
//!
//! The driver keeps shadow copies of the direction, pull-up and output
//! registers so single-pin updates are one register write.

use embedded_hal::i2c::I2c;
use heapless::Vec;

use crate::i2c::{Device, I2cError, I2cTree, Xfer};

pub const IODIR: u8 = 0x00;
pub const GPPU: u8 = 0x06;
pub const GPIO: u8 = 0x09;

pub const NUM_PINS: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// A snapshot of all eight pin levels from one GPIO register read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinLevels(pub u8);

impl PinLevels {
    pub fn pin(self, pin: u8) -> bool {
        pin < NUM_PINS && self.0 & (1 << pin) != 0
    }
}

#[derive(Debug, Clone)]
pub struct Mcp23008 {
    device: Device,
    iodir: u8,
    gppu: u8,
    gpio: u8,
}

impl Mcp23008 {
    /// Read the current register contents into the driver's shadow copies.
    pub fn new<B: I2c>(tree: &mut I2cTree<B>, device: Device) -> Result<Self, I2cError> {
        let iodir = device.read_u8(tree, IODIR)?.unwrap_or(0xFF);
        let gppu = device.read_u8(tree, GPPU)?.unwrap_or(0x00);
        let gpio = device.read_u8(tree, GPIO)?.unwrap_or(0x00);
        Ok(Self {
            device,
            iodir,
            gppu,
            gpio,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn setup<B: I2c>(&mut self, tree: &mut I2cTree<B>, pin: u8, direction: Direction) -> Xfer<()> {
        let mask = pin_mask(pin)?;
        match direction {
            Direction::In => self.iodir |= mask,
            Direction::Out => self.iodir &= !mask,
        }
        self.device.write8(tree, IODIR, self.iodir)
    }

    pub fn pullup<B: I2c>(&mut self, tree: &mut I2cTree<B>, pin: u8, enabled: bool) -> Xfer<()> {
        let mask = pin_mask(pin)?;
        set_bits(&mut self.gppu, mask, enabled);
        self.device.write8(tree, GPPU, self.gppu)
    }

    /// Read all eight pin levels.
    pub fn read_pins<B: I2c>(&self, tree: &mut I2cTree<B>) -> Xfer<PinLevels> {
        Ok(self.device.read_u8(tree, GPIO)?.map(PinLevels))
    }

    pub fn input<B: I2c>(&self, tree: &mut I2cTree<B>, pin: u8) -> Xfer<bool> {
        pin_mask(pin)?;
        Ok(self.read_pins(tree)?.map(|levels| levels.pin(pin)))
    }

    /// Levels of several pins from a single register read, in request order.
    pub fn input_pins<B: I2c>(&self, tree: &mut I2cTree<B>, pins: &[u8]) -> Xfer<Vec<bool, 8>> {
        for &pin in pins {
            pin_mask(pin)?;
        }
        if pins.len() > usize::from(NUM_PINS) {
            return Err(I2cError::IllegalChannel {
                channel: pins.len(),
                max: usize::from(NUM_PINS),
            });
        }
        let Some(levels) = self.read_pins(tree)? else {
            return Ok(None);
        };
        let mut result = Vec::new();
        for &pin in pins {
            // Length checked above.
            let _ = result.push(levels.pin(pin));
        }
        Ok(Some(result))
    }

    pub fn output<B: I2c>(&mut self, tree: &mut I2cTree<B>, pin: u8, level: bool) -> Xfer<()> {
        let mask = pin_mask(pin)?;
        set_bits(&mut self.gpio, mask, level);
        self.device.write8(tree, GPIO, self.gpio)
    }

    /// Set several outputs with one register write.
    pub fn output_pins<B: I2c>(&mut self, tree: &mut I2cTree<B>, levels: &[(u8, bool)]) -> Xfer<()> {
        let mut gpio = self.gpio;
        for &(pin, level) in levels {
            set_bits(&mut gpio, pin_mask(pin)?, level);
        }
        self.gpio = gpio;
        self.device.write8(tree, GPIO, self.gpio)
    }

    /// Drive every output low.
    pub fn disable_outputs<B: I2c>(&mut self, tree: &mut I2cTree<B>) -> Xfer<()> {
        self.gpio = 0;
        self.device.write8(tree, GPIO, self.gpio)
    }
}

fn pin_mask(pin: u8) -> Result<u8, I2cError> {
    if pin >= NUM_PINS {
        return Err(I2cError::IllegalChannel {
            channel: usize::from(pin),
            max: usize::from(NUM_PINS - 1),
        });
    }
    Ok(1 << pin)
}

fn set_bits(register: &mut u8, mask: u8, on: bool) {
    if on {
        *register |= mask;
    } else {
        *register &= !mask;
    }
}
