use std::{
    any::Any,
    ops::Deref,
    sync::{atomic::Ordering, Arc},
};

use atomig::{Atom, Atomic};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::graphics::{
    error::{Error, Result},
    fence::SyncPoint,
    hal::{Backend, RawCommandList, RawDevice},
};

use super::{command_allocator::CommandAllocator, command_queue::QueueShared, QueueKind};

/// Shared handle to anything recorded commands read from or write to.
pub type Dependency = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListPhase {
    Idle,
    Recording,
    Submitted,
}

impl Atom for ListPhase {
    type Repr = u8;

    fn pack(self) -> Self::Repr {
        self as u8
    }

    fn unpack(src: Self::Repr) -> Self {
        match src {
            0 => ListPhase::Idle,
            1 => ListPhase::Recording,
            _ => ListPhase::Submitted,
        }
    }
}

#[derive(Debug, Default)]
struct ListState {
    fence_value: Option<u64>,
    dependencies: SmallVec<[Dependency; 8]>,
    generation: u64,
    name: Option<String>,
}

/// A pooled, reusable command list.
///
/// Handed out by [`CommandQueue::begin_command_list`](super::CommandQueue::begin_command_list)
/// and cycled through `Idle -> Recording -> Submitted -> Idle`. The handle is
/// cheap to clone; every clone refers to the same pool slot.
#[derive(Clone, Debug)]
pub struct CommandList<B: Backend>(Arc<CommandListInner<B>>);

#[derive(Debug)]
pub struct CommandListInner<B: Backend> {
    slot: usize,
    pub(super) queue: Arc<QueueShared<B>>,
    allocator: CommandAllocator<B>,
    raw: B::CommandList,

    /// Only written while `state` is locked.
    phase: Atomic<ListPhase>,
    state: Mutex<ListState>,
}

impl<B: Backend> Deref for CommandList<B> {
    type Target = CommandListInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<B: Backend> CommandList<B> {
    pub(super) fn inner_new(
        slot: usize,
        queue: Arc<QueueShared<B>>,
        device: &B::Device,
    ) -> Result<Self> {
        let allocator = CommandAllocator::inner_new(device, queue.desc.kind)?;
        let raw = device.create_command_list(queue.desc.kind, &allocator.raw)?;
        raw.close()?;

        Ok(Self(Arc::new(CommandListInner {
            slot,
            queue,
            allocator,
            raw,
            phase: Atomic::new(ListPhase::Idle),
            state: Default::default(),
        })))
    }

    pub(super) fn belongs_to(&self, queue: &Arc<QueueShared<B>>) -> bool {
        Arc::ptr_eq(&self.queue, queue)
    }
}

impl<B: Backend> CommandListInner<B> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn kind(&self) -> QueueKind {
        self.allocator.kind()
    }

    pub fn phase(&self) -> ListPhase {
        self.phase.load(Ordering::Acquire)
    }

    /// Fence value assigned by the last submission, until the next `begin`.
    pub fn fence_value(&self) -> Option<u64> {
        self.state.lock().fence_value
    }

    /// How many times the slot has been handed out.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn name(&self) -> Option<String> {
        self.state.lock().name.clone()
    }

    pub fn dependency_count(&self) -> usize {
        self.state.lock().dependencies.len()
    }

    pub fn sync_point(&self) -> Option<SyncPoint<B>> {
        self.fence_value()
            .map(|value| SyncPoint::new(Arc::clone(&self.queue.fence), value))
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.raw.set_name(&name)?;
        self.state.lock().name = Some(name);

        Ok(())
    }

    /// Keeps `resource` alive until the GPU has finished with this list.
    ///
    /// Must be called for every resource the recorded commands reference.
    pub fn add_dependency<T: Any + Send + Sync>(&self, resource: Arc<T>) {
        self.add_dependency_dyn(resource);
    }

    pub fn add_dependency_dyn(&self, resource: Dependency) {
        let mut state = self.state.lock();
        self.assert_recording("add a dependency to");
        state.dependencies.push(resource);
    }

    /// Runs `f` against the native list.
    pub fn record<R>(&self, f: impl FnOnce(&B::CommandList) -> R) -> R {
        {
            let _state = self.state.lock();
            self.assert_recording("record into");
        }
        f(&self.raw)
    }

    /// Closes the list and submits it to its queue.
    ///
    /// If the native submission fails the list goes back to `Idle`, holding
    /// its dependencies until the slot is begun again.
    ///
    /// # Panics
    ///
    /// When the list is not recording, e.g. when it is executed twice.
    pub fn execute(&self) -> Result<SyncPoint<B>> {
        submit(&self.queue, &[self])
    }

    /// Non-blocking completion check. A completed list releases its
    /// dependencies and goes back to `Idle`.
    pub fn is_complete(&self) -> Result<bool> {
        let value = {
            let state = self.state.lock();
            match self.phase() {
                ListPhase::Idle => return Ok(true),
                ListPhase::Recording => return Ok(false),
                ListPhase::Submitted => state.fence_value,
            }
        };

        let Some(value) = value else {
            return Ok(true);
        };

        if self.queue.fence.is_complete(value)? {
            self.retire(value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Blocks until the GPU has executed this list, then releases its
    /// dependencies. A no-op on an idle list.
    ///
    /// # Panics
    ///
    /// When the list has been begun but not executed.
    pub fn wait(&self) -> Result<()> {
        let value = {
            let state = self.state.lock();
            match self.phase() {
                ListPhase::Idle => return Ok(()),
                ListPhase::Recording => panic!(
                    "command list {} waited on before it was executed",
                    self.slot
                ),
                ListPhase::Submitted => state.fence_value,
            }
        };

        if let Some(value) = value {
            self.queue.fence.wait_for_value(value)?;
            self.retire(value);
        }

        Ok(())
    }

    pub(super) fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        let phase = self.phase();
        assert!(
            phase == ListPhase::Idle,
            "command list {} begun while {:?}",
            self.slot,
            phase
        );

        self.allocator.reset()?;
        self.raw.reset(&self.allocator.raw)?;

        let released = std::mem::take(&mut state.dependencies);
        state.fence_value = None;
        state.name = None;
        state.generation += 1;
        self.phase.store(ListPhase::Recording, Ordering::Release);

        trace!(slot = self.slot, generation = state.generation, "command list begun");

        drop(state);
        drop(released);

        Ok(())
    }

    fn retire(&self, value: u64) {
        let released = {
            let mut state = self.state.lock();
            if self.phase() != ListPhase::Submitted || state.fence_value != Some(value) {
                return;
            }

            self.phase.store(ListPhase::Idle, Ordering::Release);
            std::mem::take(&mut state.dependencies)
        };

        trace!(
            slot = self.slot,
            fence_value = value,
            released = released.len(),
            "command list retired"
        );
    }

    fn assert_recording(&self, action: &str) {
        let phase = self.phase();
        assert!(
            phase == ListPhase::Recording,
            "cannot {action} command list {}: not recording ({phase:?})",
            self.slot
        );
    }
}

/// Submits `lists` with a single native call followed by a single fence
/// signal; every list gets the same fence value.
pub(super) fn submit<B: Backend>(
    queue: &Arc<QueueShared<B>>,
    lists: &[&CommandListInner<B>],
) -> Result<SyncPoint<B>> {
    for (i, list) in lists.iter().enumerate() {
        assert!(
            Arc::ptr_eq(&list.queue, queue),
            "command list {} submitted to a queue it does not belong to",
            list.slot
        );
        assert!(
            lists[..i].iter().all(|other| !std::ptr::eq(*other, *list)),
            "command list {} submitted twice in one batch",
            list.slot
        );
    }

    let mut states = lists
        .iter()
        .map(|list| list.state.lock())
        .collect::<SmallVec<[MutexGuard<'_, ListState>; 8]>>();

    for list in lists {
        list.assert_recording("execute");
    }

    // Every list is closed even when one fails, so all of them can be reset.
    let closed = lists
        .iter()
        .map(|list| list.raw.close())
        .fold(Ok(()), |acc, result| acc.and(result));

    let raws = lists
        .iter()
        .map(|list| &list.raw)
        .collect::<SmallVec<[&B::CommandList; 8]>>();
    let submitted = closed
        .map_err(Error::from)
        .and_then(|()| queue.submit(&raws));

    let sync_point = match submitted {
        Ok(sync_point) => sync_point,
        Err(err) => {
            for (list, state) in lists.iter().zip(states.iter_mut()) {
                state.fence_value = None;
                list.phase.store(ListPhase::Idle, Ordering::Release);
            }

            warn!(%err, lists = lists.len(), "command list submission failed");
            return Err(err);
        }
    };

    for (list, state) in lists.iter().zip(states.iter_mut()) {
        state.fence_value = Some(sync_point.value());
        list.phase.store(ListPhase::Submitted, Ordering::Release);

        trace!(
            slot = list.slot,
            fence_value = sync_point.value(),
            dependencies = state.dependencies.len(),
            "command list submitted"
        );
    }

    Ok(sync_point)
}

#[cfg(test)]
#[allow(unused)]
mod tests {
    use super::{CommandList, ListPhase};
    use crate::graphics::hal::sim::Sim;

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<CommandList<Sim>>();

    #[test]
    fn phase_packs_round_trip() {
        use atomig::Atom;

        for phase in [ListPhase::Idle, ListPhase::Recording, ListPhase::Submitted] {
            assert_eq!(ListPhase::unpack(phase.pack()), phase);
        }
    }
}
