//! # PSCU
//!
//! I2C control and monitoring core for the LPD detector power supply control
//! unit (PSCU) and the QEM backplane.
//!
//! ## Features
//!
//! - **Bus layer**: SMBus-style primitives over any `embedded-hal` 1.0 bus,
//!   with a per-transport fault policy (trap or raise)
//! - **Device tree**: TCA9548 multiplexer channel selection ahead of every
//!   device access, with desync detection
//! - **Drivers**: AD7998 ADC, AD5321 DAC, MCP23008 GPIO, TPL0102 digital
//!   potentiometer, Si570 oscillator
//! - **PSCU**: quad output boxes, temperature, humidity, fan, pump, position
//!   and the hardware interlock, with staggered enable-all sequencing
//! - **Front panel**: paged USB LCD rendering
//! - **Service**: parameter tree and a line-JSON control protocol
//!
//! ## Quick Start
//!
//! ```rust
//! use pscu::i2c::BusTransport;
//! use pscu::pscu::{Pscu, PscuOptions};
//! use pscu::sim::SimBus;
//!
//! let mut unit = Pscu::new(BusTransport::new(SimBus::pscu()), PscuOptions::default()).unwrap();
//! unit.poll_all_sensors().unwrap();
//! println!("Coolant in: {:.1}C", unit.get_temperature(9).unwrap());
//! ```
//!
//! ## Architecture
//!
//! - [`i2c`] - transport, device tree and device handle
//! - [`drivers`] - typed chip drivers
//! - [`pscu`] - the PSCU domain object
//! - [`backplane`] - the QEM backplane domain object
//! - [`deferred`] - cooperative deferred command queue
//! - [`display`] - front-panel LCD
//! - [`params`] - path-addressed parameter tree
//! - [`controller`] - tick and request handling for the service
//! - [`config`] - service configuration
//! - [`sim`] - simulated hardware

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod backplane;
pub mod config;
pub mod controller;
pub mod deferred;
pub mod display;
pub mod drivers;
pub mod i2c;
pub mod params;
pub mod pscu;
pub mod sim;

pub use backplane::Backplane;
pub use config::PscuConfig;
pub use controller::{ApiRequest, ApiResponse, PscuController};
pub use params::ParamTree;
pub use pscu::Pscu;
