use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tracing::trace;

use super::{
    error::Result,
    hal::{Backend, RawDevice, RawEvent, RawFence, RawQueue},
};

/// Monotonic GPU completion counter.
///
/// `current_value` is the last value handed to a queue signal; the GPU
/// reports `completed_value` once it has executed everything submitted before
/// that signal.
#[derive(Debug)]
pub struct Fence<B: Backend> {
    device: B::Device,
    pub(crate) raw: B::Fence,
    value: AtomicU64,
}

impl<B: Backend> Fence<B> {
    pub(crate) fn inner_new(device: &B::Device) -> Result<Self> {
        let raw = device.create_fence(0)?;

        Ok(Self {
            device: device.clone(),
            raw,
            value: Default::default(),
        })
    }

    /// Advances the target value and enqueues its signal on `queue`.
    ///
    /// The target only moves once the native signal is enqueued. Signals on
    /// one fence must be serialized; `CommandQueue` issues them under its
    /// submission lock.
    pub fn signal(&self, queue: &B::Queue) -> Result<u64> {
        let value = self.value.load(Ordering::Acquire) + 1;
        queue.signal(&self.raw, value)?;
        self.value.store(value, Ordering::Release);

        trace!(fence_value = value, "fence signal enqueued");

        Ok(value)
    }

    pub fn current_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn completed_value(&self) -> Result<u64> {
        Ok(self.raw.completed_value()?)
    }

    pub fn is_complete(&self, value: u64) -> Result<bool> {
        Ok(self.completed_value()? >= value)
    }

    /// Blocks the calling thread until the GPU reaches `value`.
    pub fn wait_for_value(&self, value: u64) -> Result<()> {
        if self.is_complete(value)? {
            return Ok(());
        }

        trace!(fence_value = value, "blocking on fence");

        let event = self.device.create_event()?;
        self.raw.set_event_on_completion(value, &event)?;
        event.wait()?;

        Ok(())
    }

    /// Waits for the last value handed out by [`Fence::signal`].
    pub fn wait_for_current(&self) -> Result<()> {
        self.wait_for_value(self.current_value())
    }
}

/// A fence value to wait for.
///
/// Unlike the command list that produced it, a sync point is never recycled,
/// so it can be kept around to wait for "the last submission that used this
/// resource".
#[derive(Debug)]
pub struct SyncPoint<B: Backend> {
    fence: Arc<Fence<B>>,
    value: u64,
}

impl<B: Backend> Clone for SyncPoint<B> {
    fn clone(&self) -> Self {
        Self {
            fence: Arc::clone(&self.fence),
            value: self.value,
        }
    }
}

impl<B: Backend> SyncPoint<B> {
    pub(crate) fn new(fence: Arc<Fence<B>>, value: u64) -> Self {
        Self { fence, value }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn fence(&self) -> &Arc<Fence<B>> {
        &self.fence
    }

    pub fn is_complete(&self) -> Result<bool> {
        self.fence.is_complete(self.value)
    }

    pub fn wait(&self) -> Result<()> {
        self.fence.wait_for_value(self.value)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rayon::prelude::*;

    use crate::graphics::{
        commands::CommandQueueDesc,
        error::Error,
        hal::{
            sim::{Sim, SimConfig, SimDevice},
            HalError, RawDevice,
        },
    };

    use super::Fence;

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<Fence<Sim>>();

    #[test]
    fn signal_increments_target() {
        let device = SimDevice::new(SimConfig::immediate());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = Fence::<Sim>::inner_new(&device).unwrap();

        assert_eq!(fence.current_value(), 0);
        assert_eq!(fence.signal(&queue).unwrap(), 1);
        assert_eq!(fence.signal(&queue).unwrap(), 2);
        assert_eq!(fence.current_value(), 2);
        assert_eq!(fence.completed_value().unwrap(), 2);
        assert!(fence.is_complete(2).unwrap());
        assert!(!fence.is_complete(3).unwrap());
    }

    #[test]
    fn wait_blocks_until_gpu_catches_up() {
        let device = SimDevice::new(SimConfig::manual());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = Fence::<Sim>::inner_new(&device).unwrap();

        let value = fence.signal(&queue).unwrap();
        assert!(!fence.is_complete(value).unwrap());

        thread::scope(|s| {
            s.spawn(|| queue.complete_all());
            fence.wait_for_value(value).unwrap();
        });

        assert!(fence.is_complete(value).unwrap());
    }

    #[test]
    fn concurrent_waits_on_many_values() {
        let device = SimDevice::new(SimConfig::manual());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = Fence::<Sim>::inner_new(&device).unwrap();

        let values = (0..16)
            .map(|_| fence.signal(&queue).unwrap())
            .collect::<Vec<_>>();

        thread::scope(|s| {
            s.spawn(|| while queue.complete_next().is_some() {});

            values
                .par_iter()
                .chain(values.par_iter())
                .for_each(|&value| fence.wait_for_value(value).unwrap());
        });

        assert_eq!(fence.completed_value().unwrap(), 16);
    }

    #[test]
    fn wait_reports_device_loss() {
        let device = SimDevice::new(SimConfig::manual());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = Fence::<Sim>::inner_new(&device).unwrap();
        let value = fence.signal(&queue).unwrap();

        let result = thread::scope(|s| {
            s.spawn(|| device.lose());
            fence.wait_for_value(value)
        });

        assert!(matches!(result, Err(Error::Hal(HalError::DeviceLost))));
    }

    #[test]
    fn failed_signal_keeps_target() {
        let device = SimDevice::new(SimConfig::manual());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = Fence::<Sim>::inner_new(&device).unwrap();

        assert_eq!(fence.signal(&queue).unwrap(), 1);
        device.lose();

        assert!(matches!(
            fence.signal(&queue),
            Err(Error::Hal(HalError::DeviceLost))
        ));
        assert_eq!(fence.current_value(), 1);
    }
}
