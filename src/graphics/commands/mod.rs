mod command_allocator;
mod command_list;
mod command_queue;
mod queue_desc;

pub use command_list::*;
pub use command_queue::*;
pub use queue_desc::*;
