use std::collections::BTreeMap;

use embedded_hal::i2c::I2c;
use tracing::debug;

use super::{BusTransport, Device, I2cError, NodeId, Xfer};

/// Highest channel number on an 8-way multiplexer.
const MAX_MUX_CHANNEL: u8 = 7;

#[derive(Debug)]
enum ContainerKind {
    /// Plain grouping; its hook only forwards to its own container.
    Group,
    /// TCA9548-style switch. `selected` caches the last channel written.
    Mux { address: u8, selected: Option<u8> },
}

#[derive(Debug)]
struct Container {
    kind: ContainerKind,
    attached: BTreeMap<NodeId, Option<u8>>,
}

#[derive(Debug)]
enum NodeKind {
    Device,
    Container(Container),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    /// Container whose hook runs before this node is accessed.
    hook: Option<NodeId>,
}

/// Arena of devices and containers sharing one bus transport.
///
/// All access to the transport goes through the tree, so holding `&mut I2cTree`
/// is the exclusive-access guarantee a mux selection followed by a device
/// transaction needs.
pub struct I2cTree<B> {
    transport: BusTransport<B>,
    nodes: Vec<Node>,
}

impl<B: I2c> I2cTree<B> {
    pub fn new(transport: BusTransport<B>) -> Self {
        Self {
            transport,
            nodes: Vec::new(),
        }
    }

    pub fn transport(&self) -> &BusTransport<B> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut BusTransport<B> {
        &mut self.transport
    }

    /// Create an unattached device at a 7-bit address.
    pub fn add_device(&mut self, address: u8) -> Device {
        let id = self.push(NodeKind::Device);
        Device::new(id, address)
    }

    /// Create an unattached plain container.
    pub fn add_group(&mut self) -> NodeId {
        self.push(NodeKind::Container(Container {
            kind: ContainerKind::Group,
            attached: BTreeMap::new(),
        }))
    }

    /// Create an unattached multiplexer container at a 7-bit address.
    pub fn add_mux(&mut self, address: u8) -> NodeId {
        self.push(NodeKind::Container(Container {
            kind: ContainerKind::Mux {
                address,
                selected: None,
            },
            attached: BTreeMap::new(),
        }))
    }

    /// Create a device and attach it in one step.
    pub fn attach_device(
        &mut self,
        container: NodeId,
        channel: Option<u8>,
        address: u8,
    ) -> Result<Device, I2cError> {
        let device = self.add_device(address);
        self.attach(container, device.id(), channel)?;
        Ok(device)
    }

    /// Attach a device or container so that its accesses run the container's
    /// hook first. Multiplexers require a channel; plain groups take none.
    pub fn attach(
        &mut self,
        container: NodeId,
        child: NodeId,
        channel: Option<u8>,
    ) -> Result<(), I2cError> {
        self.node(child)?;
        let reject = |reason| I2cError::InvalidAttachment {
            node: child,
            container,
            reason,
        };

        if child == container || self.is_ancestor(child, container)? {
            return Err(reject("attachment would create a cycle"));
        }
        if self.node(child)?.hook.is_some() {
            return Err(reject("node is already attached to a container"));
        }

        let target = self.container_mut(container)?;
        match (&target.kind, channel) {
            (ContainerKind::Mux { .. }, None) => {
                return Err(reject("a multiplexer attachment needs a channel"));
            }
            (ContainerKind::Mux { .. }, Some(ch)) if ch > MAX_MUX_CHANNEL => {
                return Err(I2cError::IllegalChannel {
                    channel: usize::from(ch),
                    max: usize::from(MAX_MUX_CHANNEL),
                });
            }
            (ContainerKind::Group, Some(_)) => {
                return Err(reject("a plain container does not take a channel"));
            }
            _ => {}
        }
        target.attached.insert(child, channel);
        self.nodes[child.0].hook = Some(container);
        debug!("Attached {} to {} (channel {:?})", child, container, channel);
        Ok(())
    }

    /// Detach a node, clearing both the container's bookkeeping and the
    /// node's hook binding.
    pub fn remove(&mut self, container: NodeId, child: NodeId) -> Result<(), I2cError> {
        self.node(child)?;
        let target = self.container_mut(container)?;
        if target.attached.remove(&child).is_none() {
            return Err(I2cError::NotAttached {
                node: child,
                container,
            });
        }
        let node = &mut self.nodes[child.0];
        if node.hook == Some(container) {
            node.hook = None;
        }
        debug!("Removed {} from {}", child, container);
        Ok(())
    }

    pub fn is_attached(&self, container: NodeId, child: NodeId) -> bool {
        self.container(container)
            .map(|c| c.attached.contains_key(&child))
            .unwrap_or(false)
    }

    /// Mux channel a node is attached on, if any.
    pub fn channel_of(&self, container: NodeId, child: NodeId) -> Option<u8> {
        self.container(container)
            .ok()
            .and_then(|c| c.attached.get(&child).copied().flatten())
    }

    /// Channel the multiplexer last selected successfully.
    pub fn selected_channel(&self, mux: NodeId) -> Option<u8> {
        match self.container(mux).map(|c| &c.kind) {
            Ok(ContainerKind::Mux { selected, .. }) => *selected,
            _ => None,
        }
    }

    /// Nodes attached to a container, in creation order.
    pub fn attached(&self, container: NodeId) -> Vec<NodeId> {
        self.container(container)
            .map(|c| c.attached.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Run the hook chain that precedes an access to `node`.
    ///
    /// Returns `Ok(false)` when a trapped fault interrupted the chain (a mux
    /// select failed), in which case the caller must not touch the bus.
    pub fn pre_access(&mut self, node: NodeId) -> Result<bool, I2cError> {
        match self.node(node)?.hook {
            Some(container) => self.container_hook(container, node),
            None => Ok(true),
        }
    }

    /// Issue one transaction on behalf of `node` after its hook chain.
    pub(crate) fn access<T>(
        &mut self,
        node: NodeId,
        op: impl FnOnce(&mut BusTransport<B>) -> Result<T, I2cError>,
    ) -> Xfer<T> {
        if !self.pre_access(node)? {
            return Ok(None);
        }
        let outcome = op(&mut self.transport);
        self.transport.resolve(outcome)
    }

    fn container_hook(&mut self, container: NodeId, caller: NodeId) -> Result<bool, I2cError> {
        // The container's own upstream path has to be live first.
        if !self.pre_access(container)? {
            return Ok(false);
        }

        let target = self.container(container)?;
        let Some(channel) = target.attached.get(&caller).copied() else {
            return Err(I2cError::Desync { node: caller });
        };
        let ContainerKind::Mux { address, selected } = target.kind else {
            return Ok(true);
        };
        let Some(channel) = channel else {
            return Err(I2cError::Desync { node: caller });
        };
        if selected == Some(channel) {
            return Ok(true);
        }

        let outcome = self.transport.write_byte(address, 1 << channel);
        let done = self.transport.resolve(outcome)?.is_some();
        if let ContainerKind::Mux { selected, .. } = &mut self.container_mut(container)?.kind {
            *selected = done.then_some(channel);
        }
        if done {
            debug!("Mux 0x{:02x} selected channel {}", address, channel);
        }
        Ok(done)
    }

    fn is_ancestor(&self, candidate: NodeId, node: NodeId) -> Result<bool, I2cError> {
        let mut cursor = self.node(node)?.hook;
        while let Some(current) = cursor {
            if current == candidate {
                return Ok(true);
            }
            cursor = self.node(current)?.hook;
        }
        Ok(false)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node { kind, hook: None });
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> Result<&Node, I2cError> {
        self.nodes.get(id.0).ok_or(I2cError::UnknownNode(id))
    }

    fn container(&self, id: NodeId) -> Result<&Container, I2cError> {
        match &self.node(id)?.kind {
            NodeKind::Container(c) => Ok(c),
            NodeKind::Device => Err(I2cError::NotAContainer(id)),
        }
    }

    fn container_mut(&mut self, id: NodeId) -> Result<&mut Container, I2cError> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Container(c)) => Ok(c),
            Some(NodeKind::Device) => Err(I2cError::NotAContainer(id)),
            None => Err(I2cError::UnknownNode(id)),
        }
    }

    #[cfg(test)]
    fn forget(&mut self, container: NodeId, child: NodeId) {
        if let Ok(c) = self.container_mut(container) {
            c.attached.remove(&child);
        }
    }
}
