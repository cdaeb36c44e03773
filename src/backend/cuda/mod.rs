// src/backend/cuda/mod.rs
// Only compiled with the `cuda` feature (see backend/mod.rs).
pub mod context;
pub mod driver;

pub use driver::CudaDriver;

use crate::error::{DriverError, DriverOp};

pub(crate) fn driver_error(op: DriverOp, e: cudarc::driver::DriverError) -> DriverError {
    DriverError::new(op, e.0 as i32)
}
