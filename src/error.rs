// src/error.rs
use crate::backend::DeviceIndex;
use std::fmt;

/// Driver entry points, used to tag failures with the call that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    DeviceCount,
    SetDevice,
    CurrentDevice,
    CreateStream,
    DestroyStream,
    SynchronizeStream,
    QueryStream,
    CreateEvent,
    DestroyEvent,
    RecordEvent,
    QueryEvent,
    SynchronizeEvent,
    StreamWaitEvent,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverOp::DeviceCount => "device_count",
            DriverOp::SetDevice => "set_device",
            DriverOp::CurrentDevice => "current_device",
            DriverOp::CreateStream => "create_stream",
            DriverOp::DestroyStream => "destroy_stream",
            DriverOp::SynchronizeStream => "synchronize_stream",
            DriverOp::QueryStream => "query_stream",
            DriverOp::CreateEvent => "create_event",
            DriverOp::DestroyEvent => "destroy_event",
            DriverOp::RecordEvent => "record_event",
            DriverOp::QueryEvent => "query_event",
            DriverOp::SynchronizeEvent => "synchronize_event",
            DriverOp::StreamWaitEvent => "stream_wait_event",
        };
        f.write_str(name)
    }
}

/// A failed driver call together with the driver's own error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("driver call `{op}` failed with code {code}")]
pub struct DriverError {
    pub op: DriverOp,
    pub code: i32,
}

impl DriverError {
    pub fn new(op: DriverOp, code: i32) -> Self {
        Self { op, code }
    }
}

/// Errors from stream, event and guard operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Device index outside `[0, device_count)`.
    #[error("invalid device index {device}: {count} device(s) available")]
    InvalidDevice { device: DeviceIndex, count: usize },

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// An event bound to one device was recorded on another device's stream.
    #[error("event bound to device {bound} cannot be recorded on a stream of device {requested}")]
    CrossDeviceRecord {
        bound: DeviceIndex,
        requested: DeviceIndex,
    },

    /// Waiting on an event that was never recorded.
    #[error("event has not been recorded")]
    NotRecorded,

    /// A stream or event from one runtime was handed to another runtime.
    #[error("stream or event belongs to a different runtime")]
    ForeignStream,

    #[error("global runtime is already initialized")]
    AlreadyInitialized,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Raw driver code, if this error came from the driver.
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            Error::Driver(e) => Some(e.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
