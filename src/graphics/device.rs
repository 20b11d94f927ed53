use std::{ops::Deref, sync::Arc};

use super::{
    commands::{CommandQueue, CommandQueueCreateInfo},
    error::Result,
    fence::Fence,
    hal::{
        sim::{Sim, SimConfig, SimDevice},
        Backend, RawDevice,
    },
};

#[derive(Clone, Debug)]
pub struct Device<B: Backend>(Arc<DeviceInner<B>>);

impl<B: Backend> Device<B> {
    pub fn new(raw: B::Device) -> Self {
        let name = raw.name();

        Self(Arc::new(DeviceInner { name, raw }))
    }
}

impl Device<Sim> {
    pub fn simulated(config: SimConfig) -> Self {
        Self::new(SimDevice::new(config))
    }
}

impl<B: Backend> Deref for Device<B> {
    type Target = DeviceInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub struct DeviceInner<B: Backend> {
    name: String,
    pub(super) raw: B::Device,
}

impl<B: Backend> DeviceInner<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &B::Device {
        &self.raw
    }
}

impl<B: Backend> Device<B> {
    pub fn create_command_queue(&self, info: &CommandQueueCreateInfo) -> Result<CommandQueue<B>> {
        CommandQueue::inner_new(self, info)
    }

    /// A standalone fence, e.g. for signaling from several queues.
    pub fn create_fence(&self) -> Result<Fence<B>> {
        Fence::inner_new(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use crate::graphics::hal::sim::{Sim, SimConfig};

    use super::Device;

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<Device<Sim>>();

    #[test]
    fn standalone_fence_starts_at_zero() {
        let device = Device::simulated(SimConfig::immediate());
        let fence = device.create_fence().unwrap();

        assert!(device.name().contains("Simulated"));
        assert_eq!(fence.current_value(), 0);
        assert!(fence.is_complete(0).unwrap());
    }
}
