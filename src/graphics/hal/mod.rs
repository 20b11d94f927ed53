//! Native API seam.
//!
//! Everything above this module talks to the GPU through the [`Backend`]
//! associated types. The raw types mirror the explicit-API objects one to one
//! (queue, fence, allocator, list, OS wait event) and never enforce the
//! command-list lifecycle themselves; that is the job of
//! [`crate::graphics::commands`].

use std::fmt::Debug;

use thiserror::Error;

use crate::graphics::commands::{CommandQueueDesc, QueueKind};

#[cfg(all(windows, feature = "dx12"))]
pub mod dx12;
pub mod sim;

pub type HalResult<T> = Result<T, HalError>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HalError {
    #[error("device lost")]
    DeviceLost,
    #[error("out of memory")]
    OutOfMemory,
    #[error("driver error: {0}")]
    Driver(String),
}

pub trait Backend: Clone + Copy + Debug + Send + Sync + 'static {
    const NAME: &'static str;

    type Device: RawDevice<Self>;
    type Queue: RawQueue<Self>;
    type Fence: RawFence<Self>;
    type CommandAllocator: RawCommandAllocator;
    type CommandList: RawCommandList<Self>;
    type Event: RawEvent;
}

pub trait RawDevice<B: Backend>: Clone + Debug + Send + Sync {
    fn name(&self) -> String;

    fn create_command_queue(&self, desc: &CommandQueueDesc) -> HalResult<B::Queue>;

    fn create_fence(&self, initial_value: u64) -> HalResult<B::Fence>;

    fn create_command_allocator(&self, kind: QueueKind) -> HalResult<B::CommandAllocator>;

    /// The returned list is open for recording, like a freshly created native list.
    fn create_command_list(
        &self,
        kind: QueueKind,
        allocator: &B::CommandAllocator,
    ) -> HalResult<B::CommandList>;

    fn create_event(&self) -> HalResult<B::Event>;
}

pub trait RawQueue<B: Backend>: Clone + Debug + Send + Sync {
    fn execute_command_lists(&self, lists: &[&B::CommandList]) -> HalResult<()>;

    fn signal(&self, fence: &B::Fence, value: u64) -> HalResult<()>;

    /// Makes the queue timeline wait for `fence` to reach `value`. Does not block the CPU.
    fn wait(&self, fence: &B::Fence, value: u64) -> HalResult<()>;
}

pub trait RawFence<B: Backend>: Debug + Send + Sync {
    fn completed_value(&self) -> HalResult<u64>;

    fn set_event_on_completion(&self, value: u64, event: &B::Event) -> HalResult<()>;
}

pub trait RawEvent: Debug + Send + Sync {
    /// Blocks the calling thread until the event is set.
    fn wait(&self) -> HalResult<()>;
}

pub trait RawCommandAllocator: Debug + Send + Sync {
    fn reset(&self) -> HalResult<()>;
}

pub trait RawCommandList<B: Backend>: Debug + Send + Sync {
    fn reset(&self, allocator: &B::CommandAllocator) -> HalResult<()>;

    fn close(&self) -> HalResult<()>;

    /// Debug name shown by native tooling.
    fn set_name(&self, name: &str) -> HalResult<()>;
}
