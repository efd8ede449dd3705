//! I2C access layer: a fault-policy-aware transport over any `embedded-hal` bus,
//! an arena tree of devices and containers, and the device handle every driver
//! uses to reach its registers.
//!
//! Every transaction a [`Device`] issues first runs the pre-access hook chain
//! of the containers it is attached to, so a device behind a TCA9548 mux gets
//! its channel selected (only when it differs from the cached selection)
//! before its own bytes go out.

use core::fmt;

use serde::{Deserialize, Serialize};

mod device;
mod error;
mod transport;
mod tree;

pub use device::Device;
pub use error::I2cError;
pub use transport::{BusConfig, BusTransport, FaultPolicy, TransportStats};
pub use tree::I2cTree;

/// Outcome of a device transaction. `Ok(None)` is the sentinel returned when a
/// bus fault was trapped under [`FaultPolicy::Trap`].
pub type Xfer<T> = Result<Option<T>, I2cError>;

/// Handle to a node (device or container) in an [`I2cTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
