//! # Ferrox Streams
//!
//! Execution streams and synchronization events for one or more accelerator
//! devices: the concurrency layer underneath every device-side operation.
//!
//! ## Features
//!
//! - Per-device round-robin stream pools (32 queues per priority), created lazily
//! - Thread-local current stream per device, defaulting to the device's default stream
//! - `StreamGuard` to save and restore device and stream selection across a scope
//! - `Event`s for ordering work across streams and across devices
//! - Simulated driver for tests, CUDA driver behind the `cuda` feature
//!
//! ```
//! use std::sync::Arc;
//! use ferrox_streams::backend::SimDriver;
//! use ferrox_streams::{Event, Runtime, StreamGuard};
//!
//! # fn main() -> ferrox_streams::Result<()> {
//! let runtime = Runtime::new(Arc::new(SimDriver::new(2)))?;
//! let producer = runtime.acquire_stream(Some(1), false)?;
//! let consumer = runtime.acquire_stream(Some(0), false)?;
//!
//! let mut ready = Event::new();
//! ready.record(&producer)?;
//! consumer.synchronize_with(&ready)?;
//! consumer.synchronize()?;
//! assert!(ready.happened()?);
//!
//! {
//!     let _guard = StreamGuard::with_stream(&producer)?;
//!     assert_eq!(runtime.current_device()?, 1);
//!     assert_eq!(runtime.current_stream(None)?, producer);
//! }
//! assert_eq!(runtime.current_device()?, 0);
//! # Ok(())
//! # }
//! ```
pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod guard;
pub mod runtime;
pub mod stream;

// Re-export commonly used types for convenience
pub use backend::{DeviceIndex, EventFlags, RawEvent, RawStream, StreamPriority};
pub use config::{Backend, RuntimeConfig};
pub use error::{DriverError, DriverOp, Error, Result};
pub use event::Event;
pub use guard::StreamGuard;
pub use runtime::Runtime;
pub use stream::{PoolStats, STREAMS_PER_POOL, Stream, StreamKind};

// Shortcuts bound to the process-wide runtime.

pub fn device_count() -> Result<usize> {
    Ok(Runtime::global()?.device_count())
}

pub fn current_device() -> Result<DeviceIndex> {
    Runtime::global()?.current_device()
}

pub fn set_device(device: DeviceIndex) -> Result<()> {
    Runtime::global()?.set_device(device)
}

/// Next pooled stream of `device`, or of the current device when `None`.
pub fn acquire_stream(device: Option<DeviceIndex>, high_priority: bool) -> Result<Stream> {
    Runtime::global()?.acquire_stream(device, high_priority)
}

pub fn default_stream(device: Option<DeviceIndex>) -> Result<Stream> {
    Runtime::global()?.default_stream(device)
}

pub fn current_stream(device: Option<DeviceIndex>) -> Result<Stream> {
    Runtime::global()?.current_stream(device)
}

/// Make `stream` current for its device on this thread, in the runtime that
/// created it.
pub fn set_current_stream(stream: &Stream) -> Result<()> {
    stream.runtime().set_current_stream(stream)
}
