// src/event.rs
use crate::backend::{DeviceIndex, EventFlags, RawEvent};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::stream::Stream;

#[derive(Debug)]
struct Binding {
    runtime: Runtime,
    device: DeviceIndex,
    raw: RawEvent,
}

/// Synchronization marker recorded on one stream and waited on from others.
///
/// A new event is unbound and owns no driver resource. The first `record`
/// creates the marker on the recording stream's device and binds the event to
/// that device for good. Assigning another event over this one
/// (`a = b`) releases `a`'s marker and takes `b`'s binding wholesale, which is
/// how an event moves to a different device.
#[derive(Debug, Default)]
pub struct Event {
    flags: EventFlags,
    binding: Option<Binding>,
    recorded: bool,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(flags: EventFlags) -> Self {
        Self {
            flags,
            binding: None,
            recorded: false,
        }
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    /// Device the event is bound to, `None` until the first record.
    pub fn device(&self) -> Option<DeviceIndex> {
        self.binding.as_ref().map(|b| b.device)
    }

    pub fn raw(&self) -> Option<RawEvent> {
        self.binding.as_ref().map(|b| b.raw)
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    /// Record the current end of `stream`'s queue. Re-recording moves the
    /// marker; streams that already waited on the old point are unaffected.
    ///
    /// The event only binds to a device once a first record succeeds; a
    /// failed first record releases the fresh marker and leaves it unbound.
    pub fn record(&mut self, stream: &Stream) -> Result<()> {
        let driver = stream.runtime().driver();
        let device = stream.device();

        let bound = self
            .binding
            .as_ref()
            .map(|b| (b.runtime.id(), b.device, b.raw));
        let raw = match bound {
            Some((runtime, bound, raw)) => {
                if runtime != stream.runtime().id() {
                    return Err(Error::ForeignStream);
                }
                if bound != device {
                    return Err(Error::CrossDeviceRecord {
                        bound,
                        requested: device,
                    });
                }
                driver.record_event(raw, device, stream.raw())?;
                raw
            }
            None => {
                let raw = driver.create_event(device, self.flags)?;
                tracing::debug!(device, event = raw.0, "Created event");
                if let Err(e) = driver.record_event(raw, device, stream.raw()) {
                    if let Err(destroy) = driver.destroy_event(device, raw) {
                        tracing::warn!(device, event = raw.0, error = %destroy, "Failed to destroy event");
                    }
                    return Err(e.into());
                }
                self.binding = Some(Binding {
                    runtime: stream.runtime().clone(),
                    device,
                    raw,
                });
                raw
            }
        };

        self.recorded = true;
        tracing::trace!(device, stream = stream.raw().0, event = raw.0, "Recorded event");
        Ok(())
    }

    /// `record`, unless this event was already recorded once.
    pub fn record_once(&mut self, stream: &Stream) -> Result<()> {
        if self.recorded {
            return Ok(());
        }
        self.record(stream)
    }

    /// Non-blocking: has the recorded point been reached? False when unbound.
    pub fn happened(&self) -> Result<bool> {
        match self.recorded_marker() {
            Some((runtime, raw)) => Ok(runtime.driver().query_event(raw)?),
            None => Ok(false),
        }
    }

    /// Block the calling thread until the recorded point is reached. Returns
    /// immediately for an event that was never recorded.
    pub fn synchronize(&self) -> Result<()> {
        if let Some((runtime, raw)) = self.recorded_marker() {
            runtime.driver().synchronize_event(raw)?;
        }
        Ok(())
    }

    /// Make `stream` wait for this event. Same as `stream.synchronize_with(self)`.
    pub fn block(&self, stream: &Stream) -> Result<()> {
        stream.synchronize_with(self)
    }

    pub(crate) fn recorded_marker(&self) -> Option<(&Runtime, RawEvent)> {
        match &self.binding {
            Some(binding) if self.recorded => Some((&binding.runtime, binding.raw)),
            _ => None,
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            if let Err(e) = binding
                .runtime
                .driver()
                .destroy_event(binding.device, binding.raw)
            {
                tracing::warn!(device = binding.device, event = binding.raw.0, error = %e, "Failed to destroy event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimDriver;
    use crate::error::DriverOp;
    use std::sync::Arc;

    fn sim_runtime(devices: usize) -> (Arc<SimDriver>, Runtime) {
        let sim = Arc::new(SimDriver::new(devices));
        let runtime = Runtime::new(sim.clone()).unwrap();
        (sim, runtime)
    }

    #[test]
    fn test_unbound_event_touches_nothing() {
        let (sim, _runtime) = sim_runtime(1);
        let event = Event::new();
        assert_eq!(event.device(), None);
        assert!(!event.happened().unwrap());
        assert!(event.synchronize().is_ok());
        drop(event);
        assert_eq!(sim.stats().events_created, 0);
    }

    #[test]
    fn test_first_record_binds_device() {
        let (sim, runtime) = sim_runtime(2);
        let stream = runtime.acquire_stream(Some(1), false).unwrap();
        let mut event = Event::with_flags(EventFlags::blocking_sync());
        event.record(&stream).unwrap();

        assert_eq!(event.device(), Some(1));
        assert!(event.is_recorded());
        let raw = event.raw().unwrap();
        assert_eq!(sim.event_flags(raw), Some(EventFlags::blocking_sync()));
    }

    #[test]
    fn test_record_on_other_device_fails() {
        let (_, runtime) = sim_runtime(2);
        let s0 = runtime.acquire_stream(Some(0), false).unwrap();
        let s1 = runtime.acquire_stream(Some(1), false).unwrap();
        let mut event = Event::new();
        event.record(&s0).unwrap();

        assert_eq!(
            event.record(&s1).unwrap_err(),
            Error::CrossDeviceRecord {
                bound: 0,
                requested: 1
            }
        );
        // record_once is a no-op before it would reach the device check.
        assert!(event.record_once(&s1).is_ok());
        assert_eq!(event.device(), Some(0));
    }

    #[test]
    fn test_rerecord_rearms_but_record_once_does_not() {
        let (sim, runtime) = sim_runtime(1);
        let stream = runtime.acquire_stream(Some(0), false).unwrap();
        let mut event = Event::new();

        event.record_once(&stream).unwrap();
        stream.synchronize().unwrap();
        assert!(event.happened().unwrap());

        event.record_once(&stream).unwrap();
        assert!(event.happened().unwrap());
        assert_eq!(sim.stats().records, 1);

        event.record(&stream).unwrap();
        assert!(!event.happened().unwrap());
        event.synchronize().unwrap();
        assert!(event.happened().unwrap());
        assert_eq!(sim.stats().records, 2);
    }

    #[test]
    fn test_wait_on_unrecorded_event() {
        let (_, runtime) = sim_runtime(1);
        let stream = runtime.acquire_stream(Some(0), false).unwrap();
        let event = Event::new();
        assert_eq!(stream.synchronize_with(&event).unwrap_err(), Error::NotRecorded);
        assert_eq!(event.block(&stream).unwrap_err(), Error::NotRecorded);
    }

    #[test]
    fn test_record_failure_leaves_event_unrecorded() {
        let (sim, runtime) = sim_runtime(1);
        let stream = runtime.acquire_stream(Some(0), false).unwrap();
        let mut event = Event::new();

        sim.fail_next(DriverOp::RecordEvent, 719);
        assert_eq!(event.record(&stream).unwrap_err().driver_code(), Some(719));
        assert!(!event.is_recorded());
        assert!(!event.happened().unwrap());

        event.record_once(&stream).unwrap();
        assert!(event.is_recorded());
    }

    #[test]
    fn test_failed_first_record_leaves_event_unbound() {
        let (sim, runtime) = sim_runtime(2);
        let s0 = runtime.acquire_stream(Some(0), false).unwrap();
        let s1 = runtime.acquire_stream(Some(1), false).unwrap();
        let mut event = Event::new();

        sim.fail_next(DriverOp::RecordEvent, 719);
        assert_eq!(event.record(&s0).unwrap_err().driver_code(), Some(719));
        assert_eq!(event.device(), None);
        assert_eq!(sim.live_events(), 0);

        // Still free to bind to any device.
        event.record(&s1).unwrap();
        assert_eq!(event.device(), Some(1));
        assert_eq!(sim.live_events(), 1);
    }

    #[test]
    fn test_query_failure_is_reported() {
        let (sim, runtime) = sim_runtime(1);
        let stream = runtime.acquire_stream(Some(0), false).unwrap();
        let mut event = Event::new();
        event.record(&stream).unwrap();

        sim.fail_next(DriverOp::QueryEvent, 999);
        assert_eq!(event.happened().unwrap_err().driver_code(), Some(999));
    }

    #[test]
    fn test_drop_releases_marker() {
        let (sim, runtime) = sim_runtime(1);
        let stream = runtime.acquire_stream(Some(0), false).unwrap();
        {
            let mut event = Event::new();
            event.record(&stream).unwrap();
            assert_eq!(sim.live_events(), 1);
        }
        assert_eq!(sim.live_events(), 0);
    }

    #[test]
    fn test_assignment_moves_binding() {
        let (sim, runtime) = sim_runtime(2);
        let s0 = runtime.acquire_stream(Some(0), false).unwrap();
        let s1 = runtime.acquire_stream(Some(1), false).unwrap();
        let mut event0 = Event::new();
        let mut event1 = Event::new();
        event0.record(&s0).unwrap();
        event1.record(&s1).unwrap();
        let raw1 = event1.raw();

        event0 = event1;
        assert_eq!(event0.device(), Some(1));
        assert_eq!(event0.raw(), raw1);
        assert_eq!(sim.live_events(), 1);
    }
}
