// src/runtime.rs
use crate::backend::{DeviceIndex, Driver, SimDriver, StreamPriority, check_device};
use crate::config::{Backend, RuntimeConfig};
use crate::error::{Error, Result};
use crate::stream::pool::{PoolStats, StreamPool};
use crate::stream::{Stream, StreamKind, registry};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes runtimes in the thread-local current-stream table.
pub type RuntimeId = u64;

static RUNTIME_COUNTER: AtomicU64 = AtomicU64::new(0);

static GLOBAL: OnceCell<Runtime> = OnceCell::new();

struct Shared {
    id: RuntimeId,
    driver: Arc<dyn Driver>,
    pools: Vec<StreamPool>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let driver = self.driver.clone();
        for pool in self.pools.iter_mut() {
            pool.release(driver.as_ref());
        }
        registry::forget(self.id);
        tracing::debug!(runtime = self.id, "Released stream pools");
    }
}

/// Stream and device state for one driver.
///
/// Cheap to clone; every clone shares the same pools. Most programs use the
/// process-wide instance from [`Runtime::global`], tests usually build their
/// own around a [`SimDriver`].
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Wrap `driver`, sizing one pool per device it reports.
    pub fn new(driver: Arc<dyn Driver>) -> Result<Self> {
        let device_count = driver.device_count()?;
        let id = RUNTIME_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pools = (0..device_count).map(StreamPool::new).collect();

        tracing::info!(
            runtime = id,
            driver = driver.name(),
            device_count,
            "Created stream runtime"
        );

        Ok(Self {
            shared: Arc::new(Shared { id, driver, pools }),
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        match config.backend {
            Backend::Sim => {
                let mut sim = SimDriver::new(config.sim_devices);
                if let Some(limit) = config.sim_stream_limit {
                    sim = sim.with_stream_limit(limit);
                }
                Self::new(Arc::new(sim))
            }
            Backend::Cuda => Self::cuda(),
        }
    }

    #[cfg(feature = "cuda")]
    fn cuda() -> Result<Self> {
        Self::new(Arc::new(crate::backend::CudaDriver::new()?))
    }

    #[cfg(not(feature = "cuda"))]
    fn cuda() -> Result<Self> {
        Err(Error::Config("CUDA support not compiled".to_string()))
    }

    /// Process-wide runtime, built from the environment on first use.
    pub fn global() -> Result<&'static Runtime> {
        GLOBAL.get_or_try_init(|| Runtime::from_config(&RuntimeConfig::from_env()?))
    }

    /// Make `runtime` the process-wide instance. Fails once `global` has run.
    pub fn install(runtime: Runtime) -> Result<&'static Runtime> {
        GLOBAL
            .try_insert(runtime)
            .map_err(|_| Error::AlreadyInitialized)
    }

    pub fn id(&self) -> RuntimeId {
        self.shared.id
    }

    pub fn driver(&self) -> &dyn Driver {
        self.shared.driver.as_ref()
    }

    pub fn device_count(&self) -> usize {
        self.shared.pools.len()
    }

    pub fn check_device(&self, device: DeviceIndex) -> Result<DeviceIndex> {
        check_device(device, self.device_count())
    }

    fn pool(&self, device: DeviceIndex) -> Result<&StreamPool> {
        let device = self.check_device(device)?;
        Ok(&self.shared.pools[device])
    }

    fn resolve(&self, device: Option<DeviceIndex>) -> Result<DeviceIndex> {
        match device {
            Some(device) => self.check_device(device),
            None => self.current_device(),
        }
    }

    /// Device selected on the calling thread.
    pub fn current_device(&self) -> Result<DeviceIndex> {
        Ok(self.driver().current_device()?)
    }

    /// Select `device` on the calling thread. Streams are left untouched.
    pub fn set_device(&self, device: DeviceIndex) -> Result<()> {
        let device = self.check_device(device)?;
        self.driver().set_device(device)?;
        Ok(())
    }

    /// The device's default stream (current device when `device` is `None`).
    pub fn default_stream(&self, device: Option<DeviceIndex>) -> Result<Stream> {
        let device = self.resolve(device)?;
        let raw = self.pool(device)?.default_stream(self.driver())?;
        Ok(Stream::new(self.clone(), device, raw, StreamKind::Default))
    }

    /// Hand out the next pooled stream of `device` (current device when `None`).
    ///
    /// The pool holds [`STREAMS_PER_POOL`](crate::STREAMS_PER_POOL) queues per
    /// priority, so handles repeat once a pool wraps around.
    pub fn acquire_stream(&self, device: Option<DeviceIndex>, high_priority: bool) -> Result<Stream> {
        let device = self.resolve(device)?;
        let priority = StreamPriority::from_hint(high_priority);
        let (slot, raw) = self.pool(device)?.acquire(self.driver(), priority)?;
        Ok(Stream::new(
            self.clone(),
            device,
            raw,
            StreamKind::Pooled { priority, slot },
        ))
    }

    /// Calling thread's current stream for `device`, the default stream if
    /// none was set.
    pub fn current_stream(&self, device: Option<DeviceIndex>) -> Result<Stream> {
        let device = self.resolve(device)?;
        match registry::get(self.id(), device) {
            Some((raw, kind)) => Ok(Stream::new(self.clone(), device, raw, kind)),
            None => self.default_stream(Some(device)),
        }
    }

    /// Make `stream` current for its device on the calling thread. Does not
    /// change the current device.
    pub fn set_current_stream(&self, stream: &Stream) -> Result<()> {
        if stream.runtime().id() != self.id() {
            return Err(Error::ForeignStream);
        }
        self.check_device(stream.device())?;
        let previous = registry::set(self.id(), stream.device(), stream.raw(), stream.kind());
        tracing::trace!(
            device = stream.device(),
            stream = stream.raw().0,
            previous = ?previous.map(|(raw, _)| raw.0),
            "Set current stream"
        );
        Ok(())
    }

    /// Drain the default stream and every created pool stream of `device`.
    pub fn synchronize_device(&self, device: DeviceIndex) -> Result<()> {
        for raw in self.pool(device)?.created_streams() {
            self.driver().synchronize_stream(device, raw)?;
        }
        Ok(())
    }

    pub fn pool_stats(&self, device: DeviceIndex) -> Result<PoolStats> {
        Ok(self.pool(device)?.stats())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id())
            .field("driver", &self.driver().name())
            .field("device_count", &self.device_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverOp;

    fn sim_runtime(devices: usize) -> (Arc<SimDriver>, Runtime) {
        let sim = Arc::new(SimDriver::new(devices));
        let runtime = Runtime::new(sim.clone()).unwrap();
        (sim, runtime)
    }

    #[test]
    fn test_invalid_device_everywhere() {
        let (_, runtime) = sim_runtime(2);
        let invalid = Error::InvalidDevice {
            device: 5,
            count: 2,
        };
        assert_eq!(runtime.set_device(5).unwrap_err(), invalid);
        assert_eq!(runtime.default_stream(Some(5)).unwrap_err(), invalid);
        assert_eq!(runtime.acquire_stream(Some(5), false).unwrap_err(), invalid);
        assert_eq!(runtime.current_stream(Some(5)).unwrap_err(), invalid);
        assert_eq!(runtime.pool_stats(5).unwrap_err(), invalid);
    }

    #[test]
    fn test_none_means_current_device() {
        let (_, runtime) = sim_runtime(2);
        runtime.set_device(1).unwrap();
        assert_eq!(runtime.default_stream(None).unwrap().device(), 1);
        assert_eq!(runtime.acquire_stream(None, true).unwrap().device(), 1);
        assert_eq!(runtime.current_stream(None).unwrap().device(), 1);
    }

    #[test]
    fn test_current_stream_defaults_without_registry_entry() {
        let (sim, runtime) = sim_runtime(1);
        let current = runtime.current_stream(Some(0)).unwrap();
        assert!(current.is_default());
        assert_eq!(current, runtime.default_stream(Some(0)).unwrap());
        assert_eq!(sim.stats().default_streams, 1);
    }

    #[test]
    fn test_set_current_stream_rejects_other_runtime() {
        let (_, a) = sim_runtime(1);
        let (_, b) = sim_runtime(1);
        let stream = b.acquire_stream(Some(0), false).unwrap();
        assert_eq!(a.set_current_stream(&stream).unwrap_err(), Error::ForeignStream);
    }

    #[test]
    fn test_registry_is_per_runtime() {
        let (_, a) = sim_runtime(1);
        let (_, b) = sim_runtime(1);
        let stream = a.acquire_stream(Some(0), false).unwrap();
        a.set_current_stream(&stream).unwrap();
        assert_eq!(a.current_stream(Some(0)).unwrap(), stream);
        assert!(b.current_stream(Some(0)).unwrap().is_default());
    }

    #[test]
    fn test_device_count_failure_is_reported() {
        let sim = Arc::new(SimDriver::new(2));
        sim.fail_next(DriverOp::DeviceCount, 100);
        let err = Runtime::new(sim).unwrap_err();
        assert_eq!(err.driver_code(), Some(100));
    }

    #[test]
    fn test_synchronize_device_drains_every_stream() {
        let (sim, runtime) = sim_runtime(1);
        let a = runtime.acquire_stream(Some(0), false).unwrap();
        let b = runtime.acquire_stream(Some(0), true).unwrap();
        let mut first = crate::Event::new();
        let mut second = crate::Event::new();
        first.record(&a).unwrap();
        second.record(&b).unwrap();
        assert!(!a.query().unwrap());

        runtime.synchronize_device(0).unwrap();
        assert!(a.query().unwrap());
        assert!(b.query().unwrap());
        assert!(first.happened().unwrap() && second.happened().unwrap());
        assert_eq!(sim.stats().records, 2);
    }

    #[test]
    fn test_dropping_last_handle_releases_pools() {
        let sim = Arc::new(SimDriver::new(1));
        {
            let runtime = Runtime::new(sim.clone()).unwrap();
            let stream = runtime.acquire_stream(Some(0), false).unwrap();
            drop(runtime);
            // The stream still keeps the pool alive.
            assert!(stream.query().unwrap());
            assert_eq!(sim.stats().streams_destroyed, 0);
        }
        assert_eq!(sim.stats().streams_destroyed, 1);
    }

    #[test]
    fn test_current_stream_entries_do_not_pin_the_runtime() {
        let sim = Arc::new(SimDriver::new(2));
        {
            let runtime = Runtime::new(sim.clone()).unwrap();
            let stream = runtime.acquire_stream(Some(1), false).unwrap();
            runtime.set_current_stream(&stream).unwrap();
            {
                let _guard = crate::StreamGuard::with_stream(&stream).unwrap();
            }
            assert_eq!(runtime.current_stream(Some(1)).unwrap(), stream);
        }
        assert_eq!(sim.stats().streams_destroyed, 1);
    }

    #[test]
    fn test_teardown_clears_this_threads_entries() {
        let (_, runtime) = sim_runtime(2);
        let before = registry::len();
        {
            let _guard = crate::StreamGuard::with_device(&runtime, 1).unwrap();
        }
        assert_eq!(registry::len(), before + 2);
        drop(runtime);
        assert_eq!(registry::len(), before);
    }

    #[test]
    fn test_from_config_builds_sim() {
        let runtime = Runtime::from_config(&RuntimeConfig::multi_device(3)).unwrap();
        assert_eq!(runtime.device_count(), 3);
        assert_eq!(runtime.driver().name(), "sim");
    }
}
