//! Direct3D 12 backend.

use std::fmt::Debug;

use oxidx::dx::{
    self, ICommandAllocator, ICommandQueue, IDevice, IDeviceChild, IFence,
    IGraphicsCommandList,
};
use smallvec::SmallVec;

use crate::graphics::{
    commands::{CommandQueueDesc, QueueKind, QueuePriority},
    device::Device,
};

use super::{
    Backend, HalError, HalResult, RawCommandAllocator, RawCommandList, RawDevice, RawEvent,
    RawFence, RawQueue,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct Dx12;

impl Backend for Dx12 {
    const NAME: &'static str = "dx12";

    type Device = Dx12Device;
    type Queue = dx::CommandQueue;
    type Fence = dx::Fence;
    type CommandAllocator = dx::CommandAllocator;
    type CommandList = dx::GraphicsCommandList;
    type Event = Dx12Event;
}

fn driver<E: Debug>(err: E) -> HalError {
    HalError::Driver(format!("{err:?}"))
}

fn raw_type(kind: QueueKind) -> dx::CommandListType {
    match kind {
        QueueKind::Direct => dx::CommandListType::Direct,
        QueueKind::Compute => dx::CommandListType::Compute,
        QueueKind::Copy => dx::CommandListType::Copy,
    }
}

fn raw_queue_desc(desc: &CommandQueueDesc) -> dx::CommandQueueDesc {
    let raw = match desc.kind {
        QueueKind::Direct => dx::CommandQueueDesc::direct(),
        QueueKind::Compute => dx::CommandQueueDesc::compute(),
        QueueKind::Copy => dx::CommandQueueDesc::copy(),
    };

    let raw = match desc.priority {
        QueuePriority::Normal => raw,
        QueuePriority::High => raw.with_priority(dx::CommandQueuePriority::High),
        QueuePriority::GlobalRealtime => {
            raw.with_priority(dx::CommandQueuePriority::GlobalRealtime)
        }
    };

    if desc.flags.is_empty() {
        raw
    } else {
        raw.with_flags(dx::CommandQueueFlags::DisableGpuTimeout)
    }
}

#[derive(Clone, Debug)]
pub struct Dx12Device {
    name: String,
    raw: dx::Device,
}

impl Dx12Device {
    pub fn new(adapter: dx::Adapter3) -> HalResult<Self> {
        use oxidx::dx::IAdapter3;

        let name = adapter.get_desc1().map_err(driver)?.description().to_string();
        let raw: dx::Device =
            dx::create_device(Some(&adapter), dx::FeatureLevel::Level11).map_err(driver)?;

        Ok(Self { name, raw })
    }
}

impl Device<Dx12> {
    pub fn dx12(adapter: dx::Adapter3) -> HalResult<Self> {
        Ok(Self::new(Dx12Device::new(adapter)?))
    }
}

impl RawDevice<Dx12> for Dx12Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn create_command_queue(&self, desc: &CommandQueueDesc) -> HalResult<dx::CommandQueue> {
        self.raw
            .create_command_queue(&raw_queue_desc(desc))
            .map_err(driver)
    }

    fn create_fence(&self, initial_value: u64) -> HalResult<dx::Fence> {
        self.raw
            .create_fence(initial_value, dx::FenceFlags::empty())
            .map_err(driver)
    }

    fn create_command_allocator(&self, kind: QueueKind) -> HalResult<dx::CommandAllocator> {
        self.raw
            .create_command_allocator(raw_type(kind))
            .map_err(driver)
    }

    fn create_command_list(
        &self,
        kind: QueueKind,
        allocator: &dx::CommandAllocator,
    ) -> HalResult<dx::GraphicsCommandList> {
        self.raw
            .create_command_list(0, raw_type(kind), allocator, dx::PSO_NONE)
            .map_err(driver)
    }

    fn create_event(&self) -> HalResult<Dx12Event> {
        let raw = dx::Event::create(false, false).map_err(driver)?;

        Ok(Dx12Event { raw })
    }
}

impl RawQueue<Dx12> for dx::CommandQueue {
    fn execute_command_lists(&self, lists: &[&dx::GraphicsCommandList]) -> HalResult<()> {
        let lists = lists
            .iter()
            .map(|list| Some((*list).clone()))
            .collect::<SmallVec<[_; 8]>>();

        ICommandQueue::execute_command_lists(self, &lists);
        Ok(())
    }

    fn signal(&self, fence: &dx::Fence, value: u64) -> HalResult<()> {
        ICommandQueue::signal(self, fence, value).map_err(driver)
    }

    fn wait(&self, fence: &dx::Fence, value: u64) -> HalResult<()> {
        ICommandQueue::wait(self, fence, value).map_err(driver)
    }
}

impl RawFence<Dx12> for dx::Fence {
    fn completed_value(&self) -> HalResult<u64> {
        // A removed device reports every fence as complete with u64::MAX.
        match self.get_completed_value() {
            u64::MAX => Err(HalError::DeviceLost),
            value => Ok(value),
        }
    }

    fn set_event_on_completion(&self, value: u64, event: &Dx12Event) -> HalResult<()> {
        IFence::set_event_on_completion(self, value, event.raw).map_err(driver)
    }
}

/// Win32 event handle, closed on drop.
#[derive(Debug)]
pub struct Dx12Event {
    raw: dx::Event,
}

unsafe impl Send for Dx12Event {}
unsafe impl Sync for Dx12Event {}

impl RawEvent for Dx12Event {
    fn wait(&self) -> HalResult<()> {
        // WAIT_OBJECT_0
        match self.raw.wait(u32::MAX) {
            0 => Ok(()),
            code => Err(HalError::Driver(format!(
                "waiting on fence event failed with {code:#x}"
            ))),
        }
    }
}

impl Drop for Dx12Event {
    fn drop(&mut self) {
        let _ = self.raw.close();
    }
}

impl RawCommandAllocator for dx::CommandAllocator {
    fn reset(&self) -> HalResult<()> {
        ICommandAllocator::reset(self).map_err(driver)
    }
}

impl RawCommandList<Dx12> for dx::GraphicsCommandList {
    fn reset(&self, allocator: &dx::CommandAllocator) -> HalResult<()> {
        IGraphicsCommandList::reset(self, allocator, dx::PSO_NONE).map_err(driver)
    }

    fn close(&self) -> HalResult<()> {
        IGraphicsCommandList::close(self).map_err(driver)
    }

    fn set_name(&self, name: &str) -> HalResult<()> {
        IDeviceChild::set_debug_object_name(self, name).map_err(driver)
    }
}
