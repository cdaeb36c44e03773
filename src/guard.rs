// src/guard.rs
use crate::backend::DeviceIndex;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::stream::Stream;
use std::marker::PhantomData;

/// Scoped save/restore of the current device and the current stream of
/// every device.
///
/// On drop the guard first puts every device's stream back to its snapshot,
/// then switches the current device back to the one it started on. Moving a
/// guard moves the pending restore with it; assigning over a live guard runs
/// that guard's restore first.
///
/// The snapshot describes the creating thread, so guards are `!Send`.
pub struct StreamGuard {
    runtime: Runtime,
    original_device: DeviceIndex,
    last_device: DeviceIndex,
    // `None` until the first stream change; then one entry per device.
    original_streams: Option<Vec<Stream>>,
    _not_send: PhantomData<*const ()>,
}

impl StreamGuard {
    /// Remember the current device only. Streams are captured on the first
    /// `set_stream`.
    pub fn new(runtime: &Runtime) -> Result<Self> {
        let device = runtime.current_device()?;
        Ok(Self {
            runtime: runtime.clone(),
            original_device: device,
            last_device: device,
            original_streams: None,
            _not_send: PhantomData,
        })
    }

    /// Snapshot everything, then make `stream` current on its device and
    /// switch to that device.
    pub fn with_stream(stream: &Stream) -> Result<Self> {
        let mut guard = Self::new(stream.runtime())?;
        guard.set_stream(stream)?;
        Ok(guard)
    }

    /// Snapshot everything, then switch to `device` without touching streams.
    pub fn with_device(runtime: &Runtime, device: DeviceIndex) -> Result<Self> {
        runtime.check_device(device)?;
        let mut guard = Self::new(runtime)?;
        guard.capture_streams()?;
        guard.set_device(device)?;
        Ok(guard)
    }

    pub fn set_device(&mut self, device: DeviceIndex) -> Result<()> {
        self.runtime.set_device(device)?;
        self.last_device = device;
        Ok(())
    }

    /// Switch to `stream`'s device and make `stream` current there.
    pub fn set_stream(&mut self, stream: &Stream) -> Result<()> {
        if stream.runtime().id() != self.runtime.id() {
            return Err(Error::ForeignStream);
        }
        self.capture_streams()?;
        self.set_device(stream.device())?;
        self.runtime.set_current_stream(stream)
    }

    /// Streams current on each device when the snapshot was taken; empty
    /// before the snapshot.
    pub fn original_streams(&self) -> &[Stream] {
        self.original_streams.as_deref().unwrap_or(&[])
    }

    pub fn original_device(&self) -> DeviceIndex {
        self.original_device
    }

    /// Device most recently selected through this guard.
    pub fn last_device(&self) -> DeviceIndex {
        self.last_device
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn capture_streams(&mut self) -> Result<()> {
        if self.original_streams.is_some() {
            return Ok(());
        }
        let streams = (0..self.runtime.device_count())
            .map(|device| self.runtime.current_stream(Some(device)))
            .collect::<Result<Vec<_>>>()?;
        self.original_streams = Some(streams);
        Ok(())
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Streams first, device last.
        for stream in self.original_streams() {
            if let Err(e) = self.runtime.set_current_stream(stream) {
                tracing::warn!(device = stream.device(), error = %e, "Failed to restore current stream");
            }
        }
        if let Err(e) = self.runtime.set_device(self.original_device) {
            tracing::warn!(device = self.original_device, error = %e, "Failed to restore current device");
        }
        tracing::trace!(
            device = self.original_device,
            streams = self.original_streams().len(),
            "Restored device and streams"
        );
    }
}

impl std::fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGuard")
            .field("original_device", &self.original_device)
            .field("last_device", &self.last_device)
            .field("original_streams", &self.original_streams())
            .finish()
    }
}
