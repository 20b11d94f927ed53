pub mod graphics;

pub use graphics::{
    commands::{
        CommandList, CommandQueue, CommandQueueCreateInfo, CommandQueueDesc, Dependency,
        ListPhase, QueueFlags, QueueKind, QueuePriority,
    },
    device::Device,
    error::{Error, Result},
    fence::{Fence, SyncPoint},
};
