use std::{ops::Deref, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::graphics::{
    device::Device,
    error::Result,
    fence::{Fence, SyncPoint},
    hal::{Backend, RawDevice, RawQueue},
};

use super::{
    command_list::{self, CommandList, ListPhase},
    CommandQueueCreateInfo, CommandQueueDesc,
};

/// What a queue shares with the command lists of its pool.
#[derive(Debug)]
pub(crate) struct QueueShared<B: Backend> {
    pub(crate) desc: CommandQueueDesc,
    /// Held across execute and signal so fence order matches submission order.
    pub(crate) raw: Mutex<B::Queue>,
    pub(crate) fence: Arc<Fence<B>>,
}

impl<B: Backend> QueueShared<B> {
    pub(crate) fn submit(&self, lists: &[&B::CommandList]) -> Result<SyncPoint<B>> {
        let raw = self.raw.lock();
        raw.execute_command_lists(lists)?;
        let value = self.fence.signal(&raw)?;

        Ok(SyncPoint::new(Arc::clone(&self.fence), value))
    }

    pub(crate) fn signal(&self) -> Result<SyncPoint<B>> {
        let raw = self.raw.lock();
        let value = self.fence.signal(&raw)?;

        Ok(SyncPoint::new(Arc::clone(&self.fence), value))
    }
}

/// A hardware queue with a fixed, round-robin pool of command lists.
///
/// At most `command_list_count` lists are in flight: once the pool wraps
/// around, [`begin_command_list`](CommandQueueInner::begin_command_list)
/// blocks until the GPU has finished with the slot it is about to reuse.
#[derive(Clone, Debug)]
pub struct CommandQueue<B: Backend>(Arc<CommandQueueInner<B>>);

#[derive(Debug)]
pub struct CommandQueueInner<B: Backend> {
    shared: Arc<QueueShared<B>>,
    lists: Box<[CommandList<B>]>,
    next: Mutex<usize>,
}

impl<B: Backend> CommandQueue<B> {
    pub(crate) fn inner_new(device: &Device<B>, info: &CommandQueueCreateInfo) -> Result<Self> {
        info.validate()?;

        let raw = device.raw.create_command_queue(&info.desc)?;
        let fence = Fence::inner_new(&device.raw)?;

        let shared = Arc::new(QueueShared {
            desc: info.desc,
            raw: Mutex::new(raw),
            fence: Arc::new(fence),
        });

        let lists = (0..info.command_list_count)
            .map(|slot| CommandList::inner_new(slot, Arc::clone(&shared), &device.raw))
            .collect::<Result<Box<[_]>>>()?;

        debug!(
            backend = B::NAME,
            device = %device.name(),
            kind = ?info.desc.kind,
            command_list_count = lists.len(),
            "created command queue"
        );

        Ok(Self(Arc::new(CommandQueueInner {
            shared,
            lists,
            next: Mutex::new(0),
        })))
    }
}

impl<B: Backend> Deref for CommandQueue<B> {
    type Target = CommandQueueInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<B: Backend> CommandQueueInner<B> {
    pub fn desc(&self) -> &CommandQueueDesc {
        &self.shared.desc
    }

    pub fn capacity(&self) -> usize {
        self.lists.len()
    }

    pub fn fence(&self) -> &Arc<Fence<B>> {
        &self.shared.fence
    }

    /// The native queue, for driving or inspecting it directly.
    pub fn raw(&self) -> B::Queue {
        self.shared.raw.lock().clone()
    }

    /// Hands out the next pool slot, reset and ready for recording.
    ///
    /// Blocks while the slot's previous submission is still executing. A
    /// failed wait is returned and the slot is not handed out.
    ///
    /// # Panics
    ///
    /// When the slot is still recording, i.e. a list was begun and never
    /// executed before the pool wrapped around to it.
    pub fn begin_command_list(&self) -> Result<CommandList<B>> {
        let slot = {
            let mut next = self.next.lock();
            let slot = *next;
            *next = (slot + 1) % self.lists.len();
            slot
        };

        let list = &self.lists[slot];

        assert!(
            list.phase() != ListPhase::Recording,
            "command list {slot} is still recording when the pool wrapped around to it"
        );

        if !list.is_complete()? {
            debug!(
                slot,
                fence_value = list.fence_value(),
                "command list pool exhausted, waiting for the gpu"
            );
            list.wait()?;
        }

        list.begin()?;

        Ok(list.clone())
    }

    /// Same as [`CommandListInner::execute`], for lists of this queue only.
    ///
    /// # Panics
    ///
    /// When `list` comes from another queue's pool.
    pub fn execute_command_list(&self, list: &CommandList<B>) -> Result<SyncPoint<B>> {
        assert!(
            list.belongs_to(&self.shared),
            "command list {} executed on a queue it does not belong to",
            list.slot()
        );

        list.execute()
    }

    /// Submits several recorded lists in one native call. They complete
    /// together and share the returned fence value.
    pub fn execute_command_lists(&self, lists: &[&CommandList<B>]) -> Result<SyncPoint<B>> {
        if lists.is_empty() {
            return self.signal();
        }

        let inners = lists.iter().map(|list| &***list).collect::<Vec<_>>();
        command_list::submit(&self.shared, &inners)
    }

    /// Signals the fence without submitting work.
    pub fn signal(&self) -> Result<SyncPoint<B>> {
        self.shared.signal()
    }

    /// The last value signaled on this queue.
    pub fn last_sync_point(&self) -> SyncPoint<B> {
        SyncPoint::new(
            Arc::clone(&self.shared.fence),
            self.shared.fence.current_value(),
        )
    }

    /// Blocks until everything submitted so far has finished executing.
    pub fn flush(&self) -> Result<()> {
        self.signal()?.wait()?;
        self.collect_completed()?;

        Ok(())
    }

    /// Releases the dependencies of every list the GPU has finished with.
    /// Returns how many lists were retired.
    pub fn collect_completed(&self) -> Result<usize> {
        let mut retired = 0;
        for list in self.lists.iter() {
            if list.phase() == ListPhase::Submitted && list.is_complete()? {
                retired += 1;
            }
        }

        Ok(retired)
    }

    /// Number of submitted lists the GPU has not finished yet.
    pub fn in_flight(&self) -> Result<usize> {
        let completed = self.shared.fence.completed_value()?;

        Ok(self
            .lists
            .iter()
            .filter(|list| list.phase() == ListPhase::Submitted)
            .filter(|list| list.fence_value().is_some_and(|value| value > completed))
            .count())
    }

    /// Makes this queue's GPU timeline wait for `sync_point`. The CPU does not block.
    pub fn wait_on_gpu(&self, sync_point: &SyncPoint<B>) -> Result<()> {
        self.shared
            .raw
            .lock()
            .wait(&sync_point.fence().raw, sync_point.value())?;

        Ok(())
    }

    /// Makes this queue's GPU timeline wait for everything submitted to `other` so far.
    pub fn wait_for_queue_on_gpu(&self, other: &CommandQueue<B>) -> Result<()> {
        self.wait_on_gpu(&other.last_sync_point())
    }
}

impl<B: Backend> Drop for CommandQueueInner<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shared.fence.wait_for_current() {
            error!(%err, kind = ?self.shared.desc.kind, "failed to drain command queue on drop");
        }
    }
}
