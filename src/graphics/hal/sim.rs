//! In-process simulated GPU.
//!
//! Each [`SimQueue`] owns a FIFO timeline of submitted work (command lists,
//! fence signals, fence waits). How that timeline is retired depends on
//! [`SimMode`]:
//!
//! - `Immediate`: work retires as soon as it is submitted;
//! - `Manual`: nothing retires until the owner calls [`SimQueue::step`],
//!   [`SimQueue::complete_next`] or [`SimQueue::complete_all`];
//! - `Threaded`: a background thread per queue retires work, sleeping
//!   `latency_us` before every command list.
//!
//! Fences, events and allocators behave like their native counterparts,
//! including the checks a validation layer would do: resetting an allocator
//! whose commands are still executing, or submitting an open list, fails.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::graphics::commands::{CommandQueueDesc, QueueKind};

use super::{
    Backend, HalError, HalResult, RawCommandAllocator, RawCommandList, RawDevice, RawEvent,
    RawFence, RawQueue,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct Sim;

impl Backend for Sim {
    const NAME: &'static str = "sim";

    type Device = SimDevice;
    type Queue = SimQueue;
    type Fence = SimFence;
    type CommandAllocator = SimCommandAllocator;
    type CommandList = SimCommandList;
    type Event = SimEvent;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimMode {
    #[default]
    Immediate,
    Manual,
    Threaded,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub mode: SimMode,
    /// Time the threaded GPU spends on each command list.
    pub latency_us: u64,
}

impl SimConfig {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn manual() -> Self {
        Self {
            mode: SimMode::Manual,
            latency_us: 0,
        }
    }

    pub fn threaded(latency: Duration) -> Self {
        Self {
            mode: SimMode::Threaded,
            latency_us: latency.as_micros() as u64,
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimCommand {
    Marker(String),
    Draw { vertex_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    CopyBuffer { bytes: u64 },
}

/// A command list as the simulated GPU saw it when it executed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedList {
    pub name: Option<String>,
    pub commands: Vec<SimCommand>,
}

#[derive(Clone, Debug)]
pub struct SimDevice(Arc<SimDeviceInner>);

#[derive(Debug)]
struct SimDeviceInner {
    name: String,
    config: SimConfig,
    lost: AtomicBool,
    fences: Mutex<Vec<Weak<SimFenceInner>>>,
    timelines: Mutex<Vec<Weak<SimTimeline>>>,
}

impl SimDevice {
    pub fn new(config: SimConfig) -> Self {
        let name = format!("Simulated GPU ({:?})", config.mode);

        Self(Arc::new(SimDeviceInner {
            name,
            config,
            lost: AtomicBool::new(false),
            fences: Default::default(),
            timelines: Default::default(),
        }))
    }

    pub fn config(&self) -> &SimConfig {
        &self.0.config
    }

    pub fn is_lost(&self) -> bool {
        self.0.lost.load(Ordering::Acquire)
    }

    /// Simulates device removal: pending work is dropped, every registered
    /// wait is abandoned and all later calls fail with [`HalError::DeviceLost`].
    pub fn lose(&self) {
        if self.0.lost.swap(true, Ordering::AcqRel) {
            return;
        }

        warn!(device = %self.0.name, "simulated device lost");

        for timeline in self.0.timelines.lock().iter().filter_map(Weak::upgrade) {
            let mut state = timeline.state.lock();
            for work in state.pending.drain(..) {
                if let SimWork::Execute(_, allocators) = work {
                    allocators.iter().for_each(SimCommandAllocator::retire);
                }
            }
            timeline.work_ready.notify_all();
        }

        for fence in self.0.fences.lock().iter().filter_map(Weak::upgrade) {
            SimFence(fence).abandon();
        }
    }

    fn check(&self) -> HalResult<()> {
        if self.is_lost() {
            Err(HalError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Retries every immediate-mode timeline, some of which may be parked on a
    /// GPU-side fence wait that just got satisfied.
    fn pump(&self) {
        if self.0.config.mode != SimMode::Immediate {
            return;
        }

        let timelines = self
            .0
            .timelines
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect::<SmallVec<[_; 4]>>();

        for timeline in timelines {
            timeline.drain();
        }
    }
}

impl RawDevice<Sim> for SimDevice {
    fn name(&self) -> String {
        self.0.name.clone()
    }

    fn create_command_queue(&self, desc: &CommandQueueDesc) -> HalResult<SimQueue> {
        self.check()?;
        SimQueue::inner_new(self.clone(), desc)
    }

    fn create_fence(&self, initial_value: u64) -> HalResult<SimFence> {
        self.check()?;

        let fence = Arc::new(SimFenceInner {
            device: self.clone(),
            state: Mutex::new(FenceState {
                completed: initial_value,
                waiters: Vec::new(),
            }),
            reached: Condvar::new(),
        });

        let mut fences = self.0.fences.lock();
        fences.retain(|f| f.strong_count() > 0);
        fences.push(Arc::downgrade(&fence));

        Ok(SimFence(fence))
    }

    fn create_command_allocator(&self, kind: QueueKind) -> HalResult<SimCommandAllocator> {
        self.check()?;

        Ok(SimCommandAllocator(Arc::new(SimAllocatorInner {
            device: self.clone(),
            kind,
            in_flight: AtomicUsize::new(0),
        })))
    }

    fn create_command_list(
        &self,
        kind: QueueKind,
        allocator: &SimCommandAllocator,
    ) -> HalResult<SimCommandList> {
        self.check()?;

        Ok(SimCommandList {
            kind,
            state: Mutex::new(SimListState {
                commands: Vec::new(),
                allocator: Some(allocator.clone()),
                open: true,
                name: None,
            }),
        })
    }

    fn create_event(&self) -> HalResult<SimEvent> {
        self.check()?;
        Ok(SimEvent::default())
    }
}

#[derive(Debug)]
enum SimWork {
    Execute(ExecutedList, SmallVec<[SimCommandAllocator; 1]>),
    Signal(SimFence, u64),
    Wait(SimFence, u64),
}

#[derive(Debug, Default)]
struct TimelineState {
    pending: VecDeque<SimWork>,
    draining: bool,
}

#[derive(Debug)]
struct SimTimeline {
    device: SimDevice,
    kind: QueueKind,
    state: Mutex<TimelineState>,
    work_ready: Condvar,
    executed: Mutex<Vec<ExecutedList>>,
    /// Set when the owning queue is dropped. Read by the threaded worker.
    shutdown: AtomicBool,
    /// Fence the threaded worker is blocked on for a GPU-side wait.
    parked_on: Mutex<Option<SimFence>>,
}

impl SimTimeline {
    fn push(&self, work: impl IntoIterator<Item = SimWork>) {
        self.state.lock().pending.extend(work);

        match self.device.0.config.mode {
            SimMode::Immediate => self.drain(),
            SimMode::Threaded => {
                self.work_ready.notify_one();
            }
            SimMode::Manual => {}
        }
    }

    fn pop_ready(state: &mut TimelineState) -> Option<SimWork> {
        match state.pending.front() {
            Some(SimWork::Wait(fence, value)) if !fence.is_reached(*value) => None,
            Some(_) => state.pending.pop_front(),
            None => None,
        }
    }

    fn step(&self) -> Option<Retired> {
        let work = Self::pop_ready(&mut self.state.lock())?;
        Some(self.retire(work))
    }

    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let work = {
                let mut state = self.state.lock();
                match Self::pop_ready(&mut state) {
                    Some(work) => work,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            self.retire(work);
        }
    }

    fn retire(&self, work: SimWork) -> Retired {
        match work {
            SimWork::Execute(list, allocators) => {
                trace!(queue = ?self.kind, name = ?list.name, "simulated gpu executed command list");
                self.executed.lock().push(list);
                allocators.iter().for_each(SimCommandAllocator::retire);
                Retired::Executed
            }
            SimWork::Signal(fence, value) => {
                fence.complete(value);
                Retired::Signaled(value)
            }
            SimWork::Wait(_, value) => Retired::Waited(value),
        }
    }

    fn run(self: Arc<Self>, latency: Duration) {
        loop {
            let work = {
                let mut state = self.state.lock();
                loop {
                    if let Some(work) = state.pending.pop_front() {
                        break work;
                    }
                    if self.shutdown.load(Ordering::SeqCst) || self.device.is_lost() {
                        debug!(queue = ?self.kind, "simulated gpu thread exiting");
                        return;
                    }
                    self.work_ready.wait(&mut state);
                }
            };

            match &work {
                SimWork::Wait(fence, value) => {
                    *self.parked_on.lock() = Some(fence.clone());
                    let reached =
                        fence.wait_reached(*value, || self.shutdown.load(Ordering::SeqCst));
                    *self.parked_on.lock() = None;

                    if !matches!(reached, Ok(true)) {
                        debug!(queue = ?self.kind, "simulated gpu thread exiting while parked on a fence");
                        return;
                    }
                }
                SimWork::Execute(..) if !latency.is_zero() => thread::sleep(latency),
                _ => {}
            }

            self.retire(work);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retired {
    Executed,
    Signaled(u64),
    Waited(u64),
}

#[derive(Debug)]
struct SimQueueOwner {
    timeline: Arc<SimTimeline>,
}

impl Drop for SimQueueOwner {
    fn drop(&mut self) {
        {
            let _state = self.timeline.state.lock();
            self.timeline.shutdown.store(true, Ordering::SeqCst);
            self.timeline.work_ready.notify_all();
        }

        let parked_on = self.timeline.parked_on.lock().clone();
        if let Some(fence) = parked_on {
            fence.wake();
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimQueue(Arc<SimQueueOwner>);

impl SimQueue {
    fn inner_new(device: SimDevice, desc: &CommandQueueDesc) -> HalResult<Self> {
        let timeline = Arc::new(SimTimeline {
            device: device.clone(),
            kind: desc.kind,
            state: Default::default(),
            work_ready: Condvar::new(),
            executed: Default::default(),
            shutdown: AtomicBool::new(false),
            parked_on: Mutex::new(None),
        });

        {
            let mut timelines = device.0.timelines.lock();
            timelines.retain(|t| t.strong_count() > 0);
            timelines.push(Arc::downgrade(&timeline));
        }

        if device.0.config.mode == SimMode::Threaded {
            let worker = Arc::clone(&timeline);
            let latency = device.0.config.latency();

            thread::Builder::new()
                .name(format!("sim-gpu-{:?}", desc.kind).to_lowercase())
                .spawn(move || worker.run(latency))
                .map_err(|e| HalError::Driver(e.to_string()))?;
        }

        trace!(kind = ?desc.kind, priority = ?desc.priority, flags = ?desc.flags, "created simulated queue");

        Ok(Self(Arc::new(SimQueueOwner { timeline })))
    }

    fn timeline(&self) -> &SimTimeline {
        &self.0.timeline
    }

    pub fn kind(&self) -> QueueKind {
        self.timeline().kind
    }

    /// Number of work items the simulated GPU has not retired yet.
    pub fn pending(&self) -> usize {
        self.timeline().state.lock().pending.len()
    }

    /// Retires one work item, unless the timeline is empty or parked on an
    /// unreached fence wait.
    pub fn step(&self) -> Option<Retired> {
        self.timeline().step()
    }

    /// Retires work up to and including the next fence signal and returns the
    /// signaled value.
    pub fn complete_next(&self) -> Option<u64> {
        loop {
            if let Retired::Signaled(value) = self.step()? {
                return Some(value);
            }
        }
    }

    pub fn complete_all(&self) {
        while self.step().is_some() {}
    }

    pub fn executed(&self) -> Vec<ExecutedList> {
        self.timeline().executed.lock().clone()
    }
}

impl RawQueue<Sim> for SimQueue {
    fn execute_command_lists(&self, lists: &[&SimCommandList]) -> HalResult<()> {
        self.timeline().device.check()?;

        let mut work = SmallVec::<[SimWork; 4]>::new();
        for list in lists {
            let state = list.state.lock();
            if state.open {
                return Err(HalError::Driver(
                    "command list submitted while still open".to_string(),
                ));
            }

            let allocators = state
                .allocator
                .iter()
                .cloned()
                .collect::<SmallVec<[SimCommandAllocator; 1]>>();

            work.push(SimWork::Execute(
                ExecutedList {
                    name: state.name.clone(),
                    commands: state.commands.clone(),
                },
                allocators,
            ));
        }

        for item in &work {
            if let SimWork::Execute(_, allocators) = item {
                allocators.iter().for_each(SimCommandAllocator::acquire);
            }
        }

        self.timeline().push(work);
        Ok(())
    }

    fn signal(&self, fence: &SimFence, value: u64) -> HalResult<()> {
        self.timeline().device.check()?;
        self.timeline().push([SimWork::Signal(fence.clone(), value)]);
        Ok(())
    }

    fn wait(&self, fence: &SimFence, value: u64) -> HalResult<()> {
        self.timeline().device.check()?;
        self.timeline().push([SimWork::Wait(fence.clone(), value)]);
        Ok(())
    }
}

#[derive(Debug)]
struct FenceState {
    completed: u64,
    waiters: Vec<(u64, SimEvent)>,
}

#[derive(Debug)]
struct SimFenceInner {
    device: SimDevice,
    state: Mutex<FenceState>,
    reached: Condvar,
}

#[derive(Clone, Debug)]
pub struct SimFence(Arc<SimFenceInner>);

impl SimFence {
    /// Host-side signal, the equivalent of `ID3D12Fence::Signal`.
    pub fn signal(&self, value: u64) {
        self.complete(value);
    }

    fn is_reached(&self, value: u64) -> bool {
        self.0.state.lock().completed >= value
    }

    fn complete(&self, value: u64) {
        let fired = {
            let mut state = self.0.state.lock();
            if value > state.completed {
                state.completed = value;
            }

            let completed = state.completed;
            let mut fired = SmallVec::<[SimEvent; 4]>::new();
            state.waiters.retain(|(target, event)| {
                if *target <= completed {
                    fired.push(event.clone());
                    false
                } else {
                    true
                }
            });

            self.0.reached.notify_all();
            fired
        };

        fired.iter().for_each(SimEvent::set);
        self.0.device.pump();
    }

    /// Blocks until the fence reaches `value`. Returns `false` when
    /// `cancelled` reports true first.
    fn wait_reached(&self, value: u64, cancelled: impl Fn() -> bool) -> HalResult<bool> {
        let mut state = self.0.state.lock();
        loop {
            if self.0.device.is_lost() {
                return Err(HalError::DeviceLost);
            }
            if state.completed >= value {
                return Ok(true);
            }
            if cancelled() {
                return Ok(false);
            }
            self.0.reached.wait(&mut state);
        }
    }

    fn wake(&self) {
        let _state = self.0.state.lock();
        self.0.reached.notify_all();
    }

    fn abandon(&self) {
        let waiters = std::mem::take(&mut self.0.state.lock().waiters);
        self.0.reached.notify_all();

        for (_, event) in waiters {
            event.abandon();
        }
    }
}

impl RawFence<Sim> for SimFence {
    fn completed_value(&self) -> HalResult<u64> {
        self.0.device.check()?;
        Ok(self.0.state.lock().completed)
    }

    fn set_event_on_completion(&self, value: u64, event: &SimEvent) -> HalResult<()> {
        let mut state = self.0.state.lock();
        self.0.device.check()?;

        if state.completed >= value {
            drop(state);
            event.set();
        } else {
            state.waiters.push((value, event.clone()));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum EventState {
    #[default]
    Unset,
    Set,
    Abandoned,
}

#[derive(Debug, Default)]
struct SimEventInner {
    state: Mutex<EventState>,
    cond: Condvar,
}

#[derive(Clone, Debug, Default)]
pub struct SimEvent(Arc<SimEventInner>);

impl SimEvent {
    pub fn is_set(&self) -> bool {
        *self.0.state.lock() == EventState::Set
    }

    fn set(&self) {
        self.transition(EventState::Set);
    }

    fn abandon(&self) {
        self.transition(EventState::Abandoned);
    }

    fn transition(&self, to: EventState) {
        let mut state = self.0.state.lock();
        if *state == EventState::Unset {
            *state = to;
        }
        self.0.cond.notify_all();
    }
}

impl RawEvent for SimEvent {
    fn wait(&self) -> HalResult<()> {
        let mut state = self.0.state.lock();
        loop {
            match *state {
                EventState::Set => return Ok(()),
                EventState::Abandoned => return Err(HalError::DeviceLost),
                EventState::Unset => self.0.cond.wait(&mut state),
            }
        }
    }
}

#[derive(Debug)]
struct SimAllocatorInner {
    device: SimDevice,
    kind: QueueKind,
    in_flight: AtomicUsize,
}

#[derive(Clone, Debug)]
pub struct SimCommandAllocator(Arc<SimAllocatorInner>);

impl SimCommandAllocator {
    pub fn kind(&self) -> QueueKind {
        self.0.kind
    }

    /// Number of submitted lists backed by this allocator that the GPU has not
    /// executed yet.
    pub fn in_flight(&self) -> usize {
        self.0.in_flight.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.0.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    fn retire(&self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RawCommandAllocator for SimCommandAllocator {
    fn reset(&self) -> HalResult<()> {
        self.0.device.check()?;

        match self.in_flight() {
            0 => Ok(()),
            n => Err(HalError::Driver(format!(
                "command allocator reset while {n} of its command lists are still executing"
            ))),
        }
    }
}

#[derive(Debug)]
struct SimListState {
    commands: Vec<SimCommand>,
    allocator: Option<SimCommandAllocator>,
    open: bool,
    name: Option<String>,
}

#[derive(Debug)]
pub struct SimCommandList {
    kind: QueueKind,
    state: Mutex<SimListState>,
}

impl SimCommandList {
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.state.lock().commands.clone()
    }

    pub fn marker(&self, label: impl Into<String>) {
        self.push(SimCommand::Marker(label.into()));
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        self.push(SimCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        self.push(SimCommand::Dispatch { x, y, z });
    }

    pub fn copy_buffer(&self, bytes: u64) {
        self.push(SimCommand::CopyBuffer { bytes });
    }

    fn push(&self, command: SimCommand) {
        let mut state = self.state.lock();
        assert!(state.open, "recording {command:?} into a closed command list");
        state.commands.push(command);
    }
}

impl RawCommandList<Sim> for SimCommandList {
    fn reset(&self, allocator: &SimCommandAllocator) -> HalResult<()> {
        let mut state = self.state.lock();
        if state.open {
            return Err(HalError::Driver(
                "command list reset while still open".to_string(),
            ));
        }

        state.commands.clear();
        state.allocator = Some(allocator.clone());
        state.open = true;

        Ok(())
    }

    fn close(&self) -> HalResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(HalError::Driver("command list closed twice".to_string()));
        }

        state.open = false;
        Ok(())
    }

    fn set_name(&self, name: &str) -> HalResult<()> {
        self.state.lock().name = Some(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<SimDevice>();
    const _: () = is_send_sync::<SimQueue>();
    const _: () = is_send_sync::<SimFence>();
    const _: () = is_send_sync::<SimCommandList>();

    fn closed_list(device: &SimDevice) -> (SimCommandAllocator, SimCommandList) {
        let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
        let list = device
            .create_command_list(QueueKind::Direct, &allocator)
            .unwrap();
        list.marker("work");
        list.close().unwrap();
        (allocator, list)
    }

    #[test]
    fn manual_timeline_retires_in_order() {
        let device = SimDevice::new(SimConfig::manual());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = device.create_fence(0).unwrap();
        let (allocator, list) = closed_list(&device);

        queue.execute_command_lists(&[&list]).unwrap();
        queue.signal(&fence, 1).unwrap();

        assert_eq!(queue.pending(), 2);
        assert_eq!(allocator.in_flight(), 1);
        assert_eq!(fence.completed_value().unwrap(), 0);

        assert_eq!(queue.step(), Some(Retired::Executed));
        assert_eq!(allocator.in_flight(), 0);
        assert_eq!(queue.step(), Some(Retired::Signaled(1)));
        assert_eq!(queue.step(), None);
        assert_eq!(fence.completed_value().unwrap(), 1);
    }

    #[test]
    fn allocator_reset_fails_while_in_flight() {
        let device = SimDevice::new(SimConfig::manual());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let (allocator, list) = closed_list(&device);

        queue.execute_command_lists(&[&list]).unwrap();
        assert!(matches!(allocator.reset(), Err(HalError::Driver(_))));

        queue.complete_all();
        assert_eq!(allocator.reset(), Ok(()));
    }

    #[test]
    fn open_list_is_rejected() {
        let device = SimDevice::new(SimConfig::immediate());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
        let list = device
            .create_command_list(QueueKind::Direct, &allocator)
            .unwrap();

        assert!(queue.execute_command_lists(&[&list]).is_err());
    }

    #[test]
    fn event_fires_when_fence_reaches_value() {
        let device = SimDevice::new(SimConfig::manual());
        let fence = device.create_fence(0).unwrap();
        let event = device.create_event().unwrap();

        fence.set_event_on_completion(2, &event).unwrap();
        fence.signal(1);
        assert!(!event.is_set());

        thread::scope(|s| {
            s.spawn(|| fence.signal(2));
            event.wait().unwrap();
        });
        assert!(event.is_set());
    }

    #[test]
    fn gpu_wait_parks_timeline_until_fence_reached() {
        let device = SimDevice::new(SimConfig::immediate());
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let other = device.create_fence(0).unwrap();
        let own = device.create_fence(0).unwrap();

        queue.wait(&other, 1).unwrap();
        queue.signal(&own, 1).unwrap();
        assert_eq!(queue.pending(), 2);
        assert_eq!(own.completed_value().unwrap(), 0);

        other.signal(1);
        assert_eq!(queue.pending(), 0);
        assert_eq!(own.completed_value().unwrap(), 1);
    }

    #[test]
    fn threaded_timeline_completes_on_its_own() {
        let device = SimDevice::new(SimConfig::threaded(Duration::from_millis(1)));
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let fence = device.create_fence(0).unwrap();
        let (_allocator, list) = closed_list(&device);

        queue.execute_command_lists(&[&list]).unwrap();
        queue.signal(&fence, 1).unwrap();

        let event = device.create_event().unwrap();
        fence.set_event_on_completion(1, &event).unwrap();
        event.wait().unwrap();

        assert_eq!(queue.executed().len(), 1);
    }

    #[test]
    fn lost_device_abandons_waiters() {
        let device = SimDevice::new(SimConfig::manual());
        let fence = device.create_fence(0).unwrap();
        let event = device.create_event().unwrap();
        fence.set_event_on_completion(1, &event).unwrap();

        thread::scope(|s| {
            s.spawn(|| device.lose());
            assert_eq!(event.wait(), Err(HalError::DeviceLost));
        });

        assert_eq!(fence.completed_value(), Err(HalError::DeviceLost));
        assert!(device.create_event().is_err());
    }

    #[test]
    fn lost_device_fails_allocator_reset() {
        let device = SimDevice::new(SimConfig::manual());
        let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
        assert_eq!(allocator.reset(), Ok(()));

        device.lose();
        assert_eq!(allocator.reset(), Err(HalError::DeviceLost));
    }

    #[test]
    fn dropped_queue_stops_thread_parked_on_gpu_wait() {
        let device = SimDevice::new(SimConfig::threaded(Duration::ZERO));
        let queue = device
            .create_command_queue(&CommandQueueDesc::default())
            .unwrap();
        let never = device.create_fence(0).unwrap();

        queue.wait(&never, 1).unwrap();
        while queue.pending() > 0 {
            thread::yield_now();
        }

        let timeline = Arc::downgrade(&queue.0.timeline);
        drop(queue);

        for _ in 0..1000 {
            if timeline.strong_count() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("simulated gpu thread still running after its queue was dropped");
    }
}
