// src/backend/cuda/context.rs
// Primary contexts, one per device, retained on first use and bound per call.
use super::driver_error;
use crate::backend::{DeviceIndex, DriverResult};
use crate::error::{DriverError, DriverOp};
use cudarc::driver::{result, sys};
use once_cell::sync::OnceCell;

#[derive(Debug)]
struct ContextHandle {
    device: sys::CUdevice,
    ctx: sys::CUcontext,
}

// Primary contexts are process-wide and usable from any thread.
unsafe impl Send for ContextHandle {}
unsafe impl Sync for ContextHandle {}

#[derive(Debug)]
pub struct DeviceContexts {
    contexts: Vec<OnceCell<ContextHandle>>,
}

impl DeviceContexts {
    pub fn new(device_count: usize) -> Self {
        Self {
            contexts: (0..device_count).map(|_| OnceCell::new()).collect(),
        }
    }

    fn handle(&self, op: DriverOp, device: DeviceIndex) -> DriverResult<&ContextHandle> {
        let cell = self
            .contexts
            .get(device)
            .ok_or(DriverError::new(
                op,
                sys::CUresult::CUDA_ERROR_INVALID_DEVICE as i32,
            ))?;

        cell.get_or_try_init(|| {
            let cu_device = result::device::get(device as i32).map_err(|e| driver_error(op, e))?;
            let ctx = unsafe { result::primary_ctx::retain(cu_device) }
                .map_err(|e| driver_error(op, e))?;
            tracing::debug!(device, "Retained primary context");
            Ok(ContextHandle {
                device: cu_device,
                ctx,
            })
        })
    }

    /// Make `device`'s primary context current on the calling thread.
    pub fn bind(&self, op: DriverOp, device: DeviceIndex) -> DriverResult<()> {
        let handle = self.handle(op, device)?;
        unsafe { result::ctx::set_current(handle.ctx) }.map_err(|e| driver_error(op, e))
    }
}

impl Drop for DeviceContexts {
    fn drop(&mut self) {
        for cell in self.contexts.iter_mut() {
            if let Some(handle) = cell.take() {
                if let Err(e) = unsafe { result::primary_ctx::release(handle.device) } {
                    tracing::warn!(error = ?e, "Failed to release primary context");
                }
            }
        }
    }
}
