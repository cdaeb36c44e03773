// src/backend/mod.rs
// Driver seam: everything below this trait is the vendor runtime (or the simulator).
pub mod device;
pub mod sim;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "cuda")]
pub use cuda::CudaDriver;

pub use device::{DeviceIndex, check_device};
pub use sim::{SimDriver, SimStats};

use crate::error::DriverError;
use std::fmt::Debug;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opaque driver handle of a hardware queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawStream(pub u64);

/// Opaque driver handle of a hardware synchronization marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawEvent(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamPriority {
    #[default]
    Low,
    High,
}

impl StreamPriority {
    pub fn from_hint(high_priority: bool) -> Self {
        if high_priority {
            StreamPriority::High
        } else {
            StreamPriority::Low
        }
    }
}

/// Creation flags for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags {
    /// Keep timestamps so elapsed time can be measured (slower record).
    pub timing: bool,
    /// Host waits block on the driver instead of spinning.
    pub blocking_sync: bool,
}

impl EventFlags {
    pub fn timing() -> Self {
        Self {
            timing: true,
            ..Self::default()
        }
    }

    pub fn blocking_sync() -> Self {
        Self {
            blocking_sync: true,
            ..Self::default()
        }
    }
}

/// Queue and event primitives consumed from the device driver.
///
/// Implementations must be callable from any thread. The current device is
/// per calling thread, the way the vendor runtimes track it.
pub trait Driver: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn device_count(&self) -> DriverResult<usize>;

    /// Device selected on the calling thread.
    fn current_device(&self) -> DriverResult<DeviceIndex>;

    /// Select `device` on the calling thread.
    fn set_device(&self, device: DeviceIndex) -> DriverResult<()>;

    /// The device's built-in queue. Called once per device.
    fn default_stream(&self, device: DeviceIndex) -> DriverResult<RawStream>;

    fn create_stream(&self, device: DeviceIndex, priority: StreamPriority)
    -> DriverResult<RawStream>;

    fn destroy_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<()>;

    /// Block the calling thread until every item enqueued on `stream` finished.
    fn synchronize_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<()>;

    /// Non-blocking: true when the queue is idle.
    fn query_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<bool>;

    fn create_event(&self, device: DeviceIndex, flags: EventFlags) -> DriverResult<RawEvent>;

    fn destroy_event(&self, device: DeviceIndex, event: RawEvent) -> DriverResult<()>;

    fn record_event(
        &self,
        event: RawEvent,
        device: DeviceIndex,
        stream: RawStream,
    ) -> DriverResult<()>;

    /// Non-blocking: true once the last recorded point was reached.
    fn query_event(&self, event: RawEvent) -> DriverResult<bool>;

    fn synchronize_event(&self, event: RawEvent) -> DriverResult<()>;

    /// Make future work on `stream` wait for the last recorded point of `event`.
    fn stream_wait_event(
        &self,
        device: DeviceIndex,
        stream: RawStream,
        event: RawEvent,
    ) -> DriverResult<()>;
}
