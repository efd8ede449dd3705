//! Typed drivers for the chips on the PSCU and QEM backplane boards.
//!
//! Each driver wraps a [`Device`](crate::i2c::Device) handle and borrows the
//! [`I2cTree`](crate::i2c::I2cTree) per call; the tree stays the single owner
//! of the bus.

pub mod ad5321;
pub mod ad7998;
pub mod mcp23008;
pub mod si570;
pub mod tca9548;
pub mod tpl0102;

pub use ad5321::Ad5321;
pub use ad7998::Ad7998;
pub use mcp23008::{Direction, Mcp23008, PinLevels};
pub use si570::Si570;
pub use tca9548::Tca9548;
pub use tpl0102::Tpl0102;
