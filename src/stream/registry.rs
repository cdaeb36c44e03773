// src/stream/registry.rs
// Thread-local "current stream" table. Each thread owns its entries, so no locking.
// Entries hold raw handles only; the runtime rebuilds `Stream`s on lookup, so
// the table never keeps a runtime (and its pools) alive.
use super::StreamKind;
use crate::backend::{DeviceIndex, RawStream};
use crate::runtime::RuntimeId;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CURRENT_STREAMS: RefCell<HashMap<(RuntimeId, DeviceIndex), (RawStream, StreamKind)>> =
        RefCell::new(HashMap::new());
}

/// Stream explicitly set on this thread for `device`, if any.
pub(crate) fn get(runtime: RuntimeId, device: DeviceIndex) -> Option<(RawStream, StreamKind)> {
    CURRENT_STREAMS.with_borrow(|streams| streams.get(&(runtime, device)).copied())
}

/// Overwrite this thread's entry for `device` and return the old one.
pub(crate) fn set(
    runtime: RuntimeId,
    device: DeviceIndex,
    raw: RawStream,
    kind: StreamKind,
) -> Option<(RawStream, StreamKind)> {
    CURRENT_STREAMS.with_borrow_mut(|streams| streams.insert((runtime, device), (raw, kind)))
}

/// Drop this thread's entries for `runtime`. Other threads keep stale ids
/// until they exit; ids are never reused, so those entries are unreachable.
pub(crate) fn forget(runtime: RuntimeId) {
    // The table may already be gone during thread teardown.
    let _ = CURRENT_STREAMS.try_with(|streams| {
        if let Ok(mut streams) = streams.try_borrow_mut() {
            streams.retain(|(id, _), _| *id != runtime);
        }
    });
}

/// Number of entries on this thread, across all runtimes.
#[cfg(test)]
pub(crate) fn len() -> usize {
    CURRENT_STREAMS.with_borrow(|streams| streams.len())
}
