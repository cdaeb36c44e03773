// src/backend/sim.rs
// In-process accelerator model. Every queue is a timeline of enqueued items;
// nothing completes until a host-side drain (or complete_all) catches it up.
use super::{
    DeviceIndex, Driver, DriverResult, EventFlags, RawEvent, RawStream, StreamPriority,
};
use crate::error::{DriverError, DriverOp};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

// Codes follow the vendor runtime numbering so logs read the same on both drivers.
pub const CODE_OUT_OF_MEMORY: i32 = 2;
pub const CODE_INVALID_DEVICE: i32 = 101;
pub const CODE_INVALID_HANDLE: i32 = 400;

static SIM_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // Simulator id -> device selected on this thread.
    static SELECTED: RefCell<HashMap<u64, DeviceIndex>> = RefCell::new(HashMap::new());
}

/// Call counters, for asserting how often the hardware was touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub default_streams: usize,
    pub streams_created: usize,
    pub streams_destroyed: usize,
    pub events_created: usize,
    pub events_destroyed: usize,
    pub records: usize,
    pub waits: usize,
}

#[derive(Debug)]
struct Wait {
    at: u64,
    source: RawStream,
    position: u64,
}

#[derive(Debug)]
struct SimQueue {
    device: DeviceIndex,
    priority: StreamPriority,
    is_default: bool,
    enqueued: u64,
    completed: u64,
    waits: Vec<Wait>,
}

impl SimQueue {
    fn new(device: DeviceIndex, priority: StreamPriority, is_default: bool) -> Self {
        Self {
            device,
            priority,
            is_default,
            enqueued: 0,
            completed: 0,
            waits: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct SimEvent {
    device: DeviceIndex,
    flags: EventFlags,
    recorded_at: Option<(RawStream, u64)>,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    queues: HashMap<RawStream, SimQueue>,
    events: HashMap<RawEvent, SimEvent>,
    faults: HashMap<DriverOp, i32>,
    stats: SimStats,
}

impl SimState {
    fn take_fault(&mut self, op: DriverOp) -> DriverResult<()> {
        match self.faults.remove(&op) {
            Some(code) => Err(DriverError::new(op, code)),
            None => Ok(()),
        }
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn queue_mut(
        &mut self,
        op: DriverOp,
        device: DeviceIndex,
        stream: RawStream,
    ) -> DriverResult<&mut SimQueue> {
        match self.queues.get_mut(&stream) {
            Some(queue) if queue.device == device => Ok(queue),
            _ => Err(DriverError::new(op, CODE_INVALID_HANDLE)),
        }
    }

    fn live_pooled_streams(&self) -> usize {
        self.queues.values().filter(|q| !q.is_default).count()
    }

    /// Complete `stream` up to `upto`, first satisfying every wait enqueued at
    /// or before that point. A wait only references positions recorded before
    /// it was enqueued, so the recursion always terminates.
    fn drain(&mut self, stream: RawStream, upto: u64) {
        let deps: Vec<(RawStream, u64)> = match self.queues.get_mut(&stream) {
            Some(queue) if queue.completed < upto => {
                let (ready, pending): (Vec<Wait>, Vec<Wait>) =
                    queue.waits.drain(..).partition(|w| w.at <= upto);
                queue.waits = pending;
                ready.into_iter().map(|w| (w.source, w.position)).collect()
            }
            _ => return,
        };

        for (source, position) in deps {
            self.drain(source, position);
        }

        if let Some(queue) = self.queues.get_mut(&stream) {
            queue.completed = queue.completed.max(upto);
        }
    }
}

/// Simulated multi-device driver.
#[derive(Debug)]
pub struct SimDriver {
    id: u64,
    device_count: usize,
    stream_limit: Option<usize>,
    state: Mutex<SimState>,
}

impl SimDriver {
    pub fn new(device_count: usize) -> Self {
        Self {
            id: SIM_COUNTER.fetch_add(1, Ordering::Relaxed),
            device_count,
            stream_limit: None,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Cap the number of live non-default queues; creation past the cap fails
    /// with an out-of-memory code.
    pub fn with_stream_limit(mut self, limit: usize) -> Self {
        self.stream_limit = Some(limit);
        self
    }

    /// Make the next call of `op` fail once with `code`.
    pub fn fail_next(&self, op: DriverOp, code: i32) {
        self.state.lock().faults.insert(op, code);
    }

    pub fn stats(&self) -> SimStats {
        self.state.lock().stats
    }

    /// Let every queue catch up with everything enqueued so far.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        let targets: Vec<(RawStream, u64)> = state
            .queues
            .iter()
            .map(|(id, q)| (*id, q.enqueued))
            .collect();
        for (stream, upto) in targets {
            state.drain(stream, upto);
        }
    }

    /// Priority a queue was created with, if it exists.
    pub fn stream_priority(&self, stream: RawStream) -> Option<StreamPriority> {
        self.state.lock().queues.get(&stream).map(|q| q.priority)
    }

    /// Flags an event was created with, if it exists.
    pub fn event_flags(&self, event: RawEvent) -> Option<EventFlags> {
        self.state.lock().events.get(&event).map(|e| e.flags)
    }

    pub fn live_events(&self) -> usize {
        self.state.lock().events.len()
    }

    fn check_device(&self, op: DriverOp, device: DeviceIndex) -> DriverResult<()> {
        if device < self.device_count {
            Ok(())
        } else {
            Err(DriverError::new(op, CODE_INVALID_DEVICE))
        }
    }
}

impl Driver for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    fn device_count(&self) -> DriverResult<usize> {
        self.state.lock().take_fault(DriverOp::DeviceCount)?;
        Ok(self.device_count)
    }

    fn current_device(&self) -> DriverResult<DeviceIndex> {
        self.state.lock().take_fault(DriverOp::CurrentDevice)?;
        Ok(SELECTED.with_borrow(|selected| selected.get(&self.id).copied().unwrap_or(0)))
    }

    fn set_device(&self, device: DeviceIndex) -> DriverResult<()> {
        self.state.lock().take_fault(DriverOp::SetDevice)?;
        self.check_device(DriverOp::SetDevice, device)?;
        SELECTED.with_borrow_mut(|selected| {
            selected.insert(self.id, device);
        });
        Ok(())
    }

    fn default_stream(&self, device: DeviceIndex) -> DriverResult<RawStream> {
        self.check_device(DriverOp::CreateStream, device)?;
        let mut state = self.state.lock();
        state.take_fault(DriverOp::CreateStream)?;
        let handle = RawStream(state.next_handle());
        state
            .queues
            .insert(handle, SimQueue::new(device, StreamPriority::Low, true));
        state.stats.default_streams += 1;
        Ok(handle)
    }

    fn create_stream(
        &self,
        device: DeviceIndex,
        priority: StreamPriority,
    ) -> DriverResult<RawStream> {
        self.check_device(DriverOp::CreateStream, device)?;
        let mut state = self.state.lock();
        state.take_fault(DriverOp::CreateStream)?;
        if let Some(limit) = self.stream_limit {
            if state.live_pooled_streams() >= limit {
                return Err(DriverError::new(DriverOp::CreateStream, CODE_OUT_OF_MEMORY));
            }
        }
        let handle = RawStream(state.next_handle());
        state
            .queues
            .insert(handle, SimQueue::new(device, priority, false));
        state.stats.streams_created += 1;
        Ok(handle)
    }

    fn destroy_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::DestroyStream)?;
        state.queue_mut(DriverOp::DestroyStream, device, stream)?;
        state.queues.remove(&stream);
        state.stats.streams_destroyed += 1;
        Ok(())
    }

    fn synchronize_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::SynchronizeStream)?;
        let upto = state
            .queue_mut(DriverOp::SynchronizeStream, device, stream)?
            .enqueued;
        state.drain(stream, upto);
        Ok(())
    }

    fn query_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<bool> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::QueryStream)?;
        let queue = state.queue_mut(DriverOp::QueryStream, device, stream)?;
        Ok(queue.completed >= queue.enqueued)
    }

    fn create_event(&self, device: DeviceIndex, flags: EventFlags) -> DriverResult<RawEvent> {
        self.check_device(DriverOp::CreateEvent, device)?;
        let mut state = self.state.lock();
        state.take_fault(DriverOp::CreateEvent)?;
        let handle = RawEvent(state.next_handle());
        state.events.insert(
            handle,
            SimEvent {
                device,
                flags,
                recorded_at: None,
            },
        );
        state.stats.events_created += 1;
        Ok(handle)
    }

    fn destroy_event(&self, device: DeviceIndex, event: RawEvent) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::DestroyEvent)?;
        if !state.events.get(&event).is_some_and(|e| e.device == device) {
            return Err(DriverError::new(DriverOp::DestroyEvent, CODE_INVALID_HANDLE));
        }
        state.events.remove(&event);
        state.stats.events_destroyed += 1;
        Ok(())
    }

    fn record_event(
        &self,
        event: RawEvent,
        device: DeviceIndex,
        stream: RawStream,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::RecordEvent)?;
        if !state.events.get(&event).is_some_and(|e| e.device == device) {
            return Err(DriverError::new(DriverOp::RecordEvent, CODE_INVALID_HANDLE));
        }
        let queue = state.queue_mut(DriverOp::RecordEvent, device, stream)?;
        queue.enqueued += 1;
        let position = queue.enqueued;
        if let Some(e) = state.events.get_mut(&event) {
            e.recorded_at = Some((stream, position));
        }
        state.stats.records += 1;
        Ok(())
    }

    fn query_event(&self, event: RawEvent) -> DriverResult<bool> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::QueryEvent)?;
        let recorded_at = state
            .events
            .get(&event)
            .ok_or(DriverError::new(DriverOp::QueryEvent, CODE_INVALID_HANDLE))?
            .recorded_at;
        // An event with no recorded work counts as complete, as on hardware.
        Ok(match recorded_at {
            Some((stream, position)) => state
                .queues
                .get(&stream)
                .is_none_or(|q| q.completed >= position),
            None => true,
        })
    }

    fn synchronize_event(&self, event: RawEvent) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::SynchronizeEvent)?;
        let recorded_at = state
            .events
            .get(&event)
            .ok_or(DriverError::new(
                DriverOp::SynchronizeEvent,
                CODE_INVALID_HANDLE,
            ))?
            .recorded_at;
        if let Some((stream, position)) = recorded_at {
            state.drain(stream, position);
        }
        Ok(())
    }

    fn stream_wait_event(
        &self,
        device: DeviceIndex,
        stream: RawStream,
        event: RawEvent,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.take_fault(DriverOp::StreamWaitEvent)?;
        let recorded_at = state
            .events
            .get(&event)
            .ok_or(DriverError::new(
                DriverOp::StreamWaitEvent,
                CODE_INVALID_HANDLE,
            ))?
            .recorded_at;
        let queue = state.queue_mut(DriverOp::StreamWaitEvent, device, stream)?;
        if let Some((source, position)) = recorded_at {
            queue.enqueued += 1;
            let at = queue.enqueued;
            queue.waits.push(Wait {
                at,
                source,
                position,
            });
        }
        state.stats.waits += 1;
        Ok(())
    }
}
