use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

use super::NodeId;

/// Errors raised by the bus transport, the container tree and the device drivers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum I2cError {
    /// A transaction failed on the wire.
    #[error("I2C error from device at address 0x{address:02x}: {message} ({kind})")]
    Bus {
        address: u8,
        kind: ErrorKind,
        message: String,
    },

    /// The node's hook still points at a container that no longer lists it.
    #[error("node {node} was not properly detached from its container")]
    Desync { node: NodeId },

    #[error("node {node} is not attached to container {container}")]
    NotAttached { node: NodeId, container: NodeId },

    #[error("cannot attach node {node} to {container}: {reason}")]
    InvalidAttachment {
        node: NodeId,
        container: NodeId,
        reason: &'static str,
    },

    #[error("node {0} is not a container")]
    NotAContainer(NodeId),

    #[error("node {0} does not exist in this tree")]
    UnknownNode(NodeId),

    #[error("illegal channel {channel} requested (maximum {max})")]
    IllegalChannel { channel: usize, max: usize },

    #[error("illegal {what} value {value} specified")]
    IllegalValue { what: &'static str, value: f64 },
}

impl I2cError {
    /// True for wire-level failures, the only kind the fault policy may trap.
    #[must_use]
    pub fn is_bus_fault(&self) -> bool {
        matches!(self, Self::Bus { .. })
    }

    pub(crate) fn bus<E: embedded_hal::i2c::Error>(address: u8, err: &E) -> Self {
        Self::Bus {
            address,
            kind: err.kind(),
            message: format!("{err:?}"),
        }
    }
}
