// src/stream/mod.rs
pub mod pool;
pub(crate) mod registry;

pub use pool::{PoolStats, STREAMS_PER_POOL};

use crate::backend::{DeviceIndex, RawStream, StreamPriority};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::runtime::Runtime;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Where a stream handle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// The device's built-in queue.
    Default,
    /// A round-robin pool slot.
    Pooled { priority: StreamPriority, slot: usize },
}

/// Lightweight handle to a hardware queue on one device.
///
/// Handles are views: cloning shares the queue, and dropping a handle never
/// destroys it. The owning [`Runtime`]'s pool keeps the queue alive. Two
/// handles are equal when they name the same queue of the same runtime.
#[derive(Clone)]
pub struct Stream {
    runtime: Runtime,
    device: DeviceIndex,
    raw: RawStream,
    kind: StreamKind,
}

impl Stream {
    pub(crate) fn new(runtime: Runtime, device: DeviceIndex, raw: RawStream, kind: StreamKind) -> Self {
        Self {
            runtime,
            device,
            raw,
            kind,
        }
    }

    pub fn device(&self) -> DeviceIndex {
        self.device
    }

    /// Driver handle of the underlying queue.
    pub fn raw(&self) -> RawStream {
        self.raw
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn is_default(&self) -> bool {
        matches!(self.kind, StreamKind::Default)
    }

    pub fn priority(&self) -> StreamPriority {
        match self.kind {
            StreamKind::Default => StreamPriority::Low,
            StreamKind::Pooled { priority, .. } => priority,
        }
    }

    /// Pool slot index, `None` for the default stream.
    pub fn slot(&self) -> Option<usize> {
        match self.kind {
            StreamKind::Default => None,
            StreamKind::Pooled { slot, .. } => Some(slot),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Non-blocking check that all enqueued work has finished.
    pub fn query(&self) -> Result<bool> {
        Ok(self.runtime.driver().query_stream(self.device, self.raw)?)
    }

    /// Block the calling thread until the queue drains.
    pub fn synchronize(&self) -> Result<()> {
        self.runtime
            .driver()
            .synchronize_stream(self.device, self.raw)?;
        Ok(())
    }

    /// Make all work enqueued on this stream from now on wait for the point
    /// last recorded on `event`, whichever device recorded it.
    pub fn synchronize_with(&self, event: &Event) -> Result<()> {
        let (runtime, raw_event) = event.recorded_marker().ok_or(Error::NotRecorded)?;
        if runtime.id() != self.runtime.id() {
            return Err(Error::ForeignStream);
        }

        self.runtime
            .driver()
            .stream_wait_event(self.device, self.raw, raw_event)?;
        tracing::trace!(
            device = self.device,
            stream = self.raw.0,
            event = raw_event.0,
            event_device = ?event.device(),
            "Stream waits on event"
        );
        Ok(())
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.runtime.id() == other.runtime.id()
            && self.device == other.device
            && self.raw == other.raw
    }
}

impl Eq for Stream {}

impl Hash for Stream {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.runtime.id().hash(state);
        self.device.hash(state);
        self.raw.hash(state);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("runtime", &self.runtime.id())
            .field("device", &self.device)
            .field("raw", &self.raw.0)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamKind::Default => write!(f, "device {} default stream", self.device),
            StreamKind::Pooled { priority, slot } => write!(
                f,
                "device {} {:?}-priority stream #{}",
                self.device, priority, slot
            ),
        }
    }
}
