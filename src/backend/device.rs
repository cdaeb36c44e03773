// src/backend/device.rs
use crate::error::{Error, Result};

/// Index of a physical accelerator, valid in `[0, device_count)`.
pub type DeviceIndex = usize;

// Range check shared by the runtime, the guard and the drivers.
pub fn check_device(device: DeviceIndex, count: usize) -> Result<DeviceIndex> {
    if device < count {
        Ok(device)
    } else {
        Err(Error::InvalidDevice { device, count })
    }
}
