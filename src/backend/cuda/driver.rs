// src/backend/cuda/driver.rs
use super::context::DeviceContexts;
use super::driver_error;
use crate::backend::{
    DeviceIndex, Driver, DriverResult, EventFlags, RawEvent, RawStream, StreamPriority,
};
use crate::error::{DriverError, DriverOp};
use cudarc::driver::{result, sys};
use std::cell::Cell;
use std::ptr;

thread_local! {
    static SELECTED: Cell<DeviceIndex> = const { Cell::new(0) };
}

fn stream_ptr(raw: RawStream) -> sys::CUstream {
    raw.0 as usize as sys::CUstream
}

fn event_ptr(raw: RawEvent) -> sys::CUevent {
    raw.0 as usize as sys::CUevent
}

/// Driver-API backend. Streams and events are raw `CUstream`/`CUevent`
/// pointers carried as integers; the null stream is the default queue.
#[derive(Debug)]
pub struct CudaDriver {
    device_count: usize,
    contexts: DeviceContexts,
}

impl CudaDriver {
    pub fn new() -> DriverResult<Self> {
        result::init().map_err(|e| driver_error(DriverOp::DeviceCount, e))?;
        let count =
            result::device::get_count().map_err(|e| driver_error(DriverOp::DeviceCount, e))?;
        let device_count = count.max(0) as usize;
        tracing::info!(device_count, "Initialized CUDA driver");
        Ok(Self {
            device_count,
            contexts: DeviceContexts::new(device_count),
        })
    }

    // Stream priorities: lower numbers run first. Pool "high" maps to the
    // greatest priority the context offers, "low" to the default.
    fn priority_value(&self, priority: StreamPriority) -> DriverResult<i32> {
        let mut least = 0;
        let mut greatest = 0;
        unsafe { sys::cuCtxGetStreamPriorityRange(&mut least, &mut greatest) }
            .result()
            .map_err(|e| driver_error(DriverOp::CreateStream, e))?;
        Ok(match priority {
            StreamPriority::Low => least,
            StreamPriority::High => greatest,
        })
    }
}

impl Driver for CudaDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn device_count(&self) -> DriverResult<usize> {
        Ok(self.device_count)
    }

    fn current_device(&self) -> DriverResult<DeviceIndex> {
        Ok(SELECTED.get())
    }

    fn set_device(&self, device: DeviceIndex) -> DriverResult<()> {
        self.contexts.bind(DriverOp::SetDevice, device)?;
        SELECTED.set(device);
        Ok(())
    }

    fn default_stream(&self, device: DeviceIndex) -> DriverResult<RawStream> {
        self.contexts.bind(DriverOp::CreateStream, device)?;
        Ok(RawStream(ptr::null_mut::<sys::CUstream_st>() as usize as u64))
    }

    fn create_stream(
        &self,
        device: DeviceIndex,
        priority: StreamPriority,
    ) -> DriverResult<RawStream> {
        self.contexts.bind(DriverOp::CreateStream, device)?;
        let value = self.priority_value(priority)?;
        let mut stream: sys::CUstream = ptr::null_mut();
        unsafe {
            sys::cuStreamCreateWithPriority(
                &mut stream,
                sys::CUstream_flags::CU_STREAM_NON_BLOCKING as u32,
                value,
            )
        }
        .result()
        .map_err(|e| driver_error(DriverOp::CreateStream, e))?;
        Ok(RawStream(stream as usize as u64))
    }

    fn destroy_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<()> {
        self.contexts.bind(DriverOp::DestroyStream, device)?;
        unsafe { result::stream::destroy(stream_ptr(stream)) }
            .map_err(|e| driver_error(DriverOp::DestroyStream, e))
    }

    fn synchronize_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<()> {
        self.contexts.bind(DriverOp::SynchronizeStream, device)?;
        unsafe { result::stream::synchronize(stream_ptr(stream)) }
            .map_err(|e| driver_error(DriverOp::SynchronizeStream, e))
    }

    fn query_stream(&self, device: DeviceIndex, stream: RawStream) -> DriverResult<bool> {
        self.contexts.bind(DriverOp::QueryStream, device)?;
        match unsafe { sys::cuStreamQuery(stream_ptr(stream)) } {
            sys::CUresult::CUDA_SUCCESS => Ok(true),
            sys::CUresult::CUDA_ERROR_NOT_READY => Ok(false),
            code => Err(DriverError::new(DriverOp::QueryStream, code as i32)),
        }
    }

    fn create_event(&self, device: DeviceIndex, flags: EventFlags) -> DriverResult<RawEvent> {
        self.contexts.bind(DriverOp::CreateEvent, device)?;
        let mut bits = 0u32;
        if !flags.timing {
            bits |= sys::CUevent_flags::CU_EVENT_DISABLE_TIMING as u32;
        }
        if flags.blocking_sync {
            bits |= sys::CUevent_flags::CU_EVENT_BLOCKING_SYNC as u32;
        }
        let mut event: sys::CUevent = ptr::null_mut();
        unsafe { sys::cuEventCreate(&mut event, bits) }
            .result()
            .map_err(|e| driver_error(DriverOp::CreateEvent, e))?;
        Ok(RawEvent(event as usize as u64))
    }

    fn destroy_event(&self, device: DeviceIndex, event: RawEvent) -> DriverResult<()> {
        self.contexts.bind(DriverOp::DestroyEvent, device)?;
        unsafe { result::event::destroy(event_ptr(event)) }
            .map_err(|e| driver_error(DriverOp::DestroyEvent, e))
    }

    fn record_event(
        &self,
        event: RawEvent,
        device: DeviceIndex,
        stream: RawStream,
    ) -> DriverResult<()> {
        self.contexts.bind(DriverOp::RecordEvent, device)?;
        unsafe { result::event::record(event_ptr(event), stream_ptr(stream)) }
            .map_err(|e| driver_error(DriverOp::RecordEvent, e))
    }

    fn query_event(&self, event: RawEvent) -> DriverResult<bool> {
        match unsafe { sys::cuEventQuery(event_ptr(event)) } {
            sys::CUresult::CUDA_SUCCESS => Ok(true),
            sys::CUresult::CUDA_ERROR_NOT_READY => Ok(false),
            code => Err(DriverError::new(DriverOp::QueryEvent, code as i32)),
        }
    }

    fn synchronize_event(&self, event: RawEvent) -> DriverResult<()> {
        unsafe { result::event::synchronize(event_ptr(event)) }
            .map_err(|e| driver_error(DriverOp::SynchronizeEvent, e))
    }

    fn stream_wait_event(
        &self,
        device: DeviceIndex,
        stream: RawStream,
        event: RawEvent,
    ) -> DriverResult<()> {
        self.contexts.bind(DriverOp::StreamWaitEvent, device)?;
        unsafe {
            result::stream::wait_event(
                stream_ptr(stream),
                event_ptr(event),
                sys::CUevent_wait_flags::CU_EVENT_WAIT_DEFAULT,
            )
        }
        .map_err(|e| driver_error(DriverOp::StreamWaitEvent, e))
    }
}
