use crate::graphics::{
    error::Result,
    hal::{Backend, RawCommandAllocator, RawDevice},
};

use super::queue_desc::QueueKind;

#[derive(Debug)]
pub(crate) struct CommandAllocator<B: Backend> {
    pub(crate) raw: B::CommandAllocator,
    kind: QueueKind,
}

impl<B: Backend> CommandAllocator<B> {
    pub(crate) fn inner_new(device: &B::Device, kind: QueueKind) -> Result<Self> {
        let raw = device.create_command_allocator(kind)?;

        Ok(Self { raw, kind })
    }

    pub(crate) fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Only valid once the GPU has finished every list recorded from this allocator.
    pub(crate) fn reset(&self) -> Result<()> {
        self.raw.reset()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(dead_code)]
mod tests {
    use crate::graphics::hal::sim::Sim;

    use super::CommandAllocator;

    const fn is_send<T: Send>() {}

    const _: () = is_send::<CommandAllocator<Sim>>();
}
