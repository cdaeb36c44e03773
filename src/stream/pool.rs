// src/stream/pool.rs
// Per-device queue pool. Slots are created on first touch and then reused forever.
use crate::backend::{DeviceIndex, Driver, RawStream, StreamPriority};
use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Hardware queues per priority level per device.
pub const STREAMS_PER_POOL: usize = 32;

#[derive(Debug)]
struct PrioritySlots {
    priority: StreamPriority,
    slots: [OnceCell<RawStream>; STREAMS_PER_POOL],
    cursor: AtomicUsize,
}

impl PrioritySlots {
    fn new(priority: StreamPriority) -> Self {
        Self {
            priority,
            slots: std::array::from_fn(|_| OnceCell::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    fn created(&self) -> impl Iterator<Item = RawStream> + '_ {
        self.slots.iter().filter_map(|slot| slot.get().copied())
    }
}

/// Fixed-capacity stream pool of one device, plus its default queue.
#[derive(Debug)]
pub(crate) struct StreamPool {
    device: DeviceIndex,
    default: OnceCell<RawStream>,
    low: PrioritySlots,
    high: PrioritySlots,
    acquisitions: AtomicU64,
}

impl StreamPool {
    pub fn new(device: DeviceIndex) -> Self {
        Self {
            device,
            default: OnceCell::new(),
            low: PrioritySlots::new(StreamPriority::Low),
            high: PrioritySlots::new(StreamPriority::High),
            acquisitions: AtomicU64::new(0),
        }
    }

    fn slots(&self, priority: StreamPriority) -> &PrioritySlots {
        match priority {
            StreamPriority::Low => &self.low,
            StreamPriority::High => &self.high,
        }
    }

    /// The device's default queue, fetched from the driver exactly once.
    pub fn default_stream(&self, driver: &dyn Driver) -> Result<RawStream> {
        self.default
            .get_or_try_init(|| {
                let raw = driver.default_stream(self.device)?;
                tracing::debug!(device = self.device, stream = raw.0, "Initialized default stream");
                Ok::<_, Error>(raw)
            })
            .copied()
    }

    /// Next slot in round-robin order. Creation failures are returned as-is;
    /// the slot stays empty, so a later call may try again.
    pub fn acquire(&self, driver: &dyn Driver, priority: StreamPriority) -> Result<(usize, RawStream)> {
        let pool = self.slots(priority);
        let slot = pool.cursor.fetch_add(1, Ordering::Relaxed) % STREAMS_PER_POOL;

        let raw = pool.slots[slot]
            .get_or_try_init(|| {
                let raw = driver.create_stream(self.device, pool.priority)?;
                tracing::debug!(
                    device = self.device,
                    ?priority,
                    slot,
                    stream = raw.0,
                    "Created pooled stream"
                );
                Ok::<_, Error>(raw)
            })
            .copied()?;

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(device = self.device, ?priority, slot, "Acquired stream");
        Ok((slot, raw))
    }

    /// Default queue (if created) followed by every created pool queue.
    pub fn created_streams(&self) -> Vec<RawStream> {
        self.default
            .get()
            .copied()
            .into_iter()
            .chain(self.low.created())
            .chain(self.high.created())
            .collect()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            device: self.device,
            default_created: self.default.get().is_some(),
            low_priority_created: self.low.created().count(),
            high_priority_created: self.high.created().count(),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
        }
    }

    /// Destroy every pooled queue. The default queue belongs to the driver.
    pub fn release(&mut self, driver: &dyn Driver) {
        let device = self.device;
        for pool in [&mut self.low, &mut self.high] {
            for cell in pool.slots.iter_mut() {
                if let Some(raw) = cell.take() {
                    if let Err(e) = driver.destroy_stream(device, raw) {
                        tracing::warn!(device, stream = raw.0, error = %e, "Failed to destroy pooled stream");
                    }
                }
            }
        }
    }
}

/// Snapshot of one device's pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub device: DeviceIndex,
    pub default_created: bool,
    pub low_priority_created: usize,
    pub high_priority_created: usize,
    /// Successful acquisitions across both priorities.
    pub acquisitions: u64,
}

impl PoolStats {
    pub fn created(&self) -> usize {
        self.low_priority_created + self.high_priority_created
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StreamPool[device {}]: {}/{} low, {}/{} high, {} acquisitions",
            self.device,
            self.low_priority_created,
            STREAMS_PER_POOL,
            self.high_priority_created,
            STREAMS_PER_POOL,
            self.acquisitions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimDriver;
    use crate::error::DriverOp;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_round_robin_wraps_at_capacity() {
        let sim = SimDriver::new(1);
        let pool = StreamPool::new(0);

        let first: Vec<_> = (0..STREAMS_PER_POOL)
            .map(|_| pool.acquire(&sim, StreamPriority::Low).unwrap())
            .collect();
        let distinct: HashSet<_> = first.iter().map(|(_, raw)| *raw).collect();
        assert_eq!(distinct.len(), STREAMS_PER_POOL);

        // Next request lands on slot 0 again.
        let (slot, raw) = pool.acquire(&sim, StreamPriority::Low).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(raw, first[0].1);
        assert_eq!(sim.stats().streams_created, STREAMS_PER_POOL);
    }

    #[test]
    fn test_priorities_use_separate_slots() {
        let sim = SimDriver::new(1);
        let pool = StreamPool::new(0);

        let (_, low) = pool.acquire(&sim, StreamPriority::Low).unwrap();
        let (_, high) = pool.acquire(&sim, StreamPriority::High).unwrap();
        assert_ne!(low, high);
        assert_eq!(sim.stream_priority(high), Some(StreamPriority::High));

        let stats = pool.stats();
        assert_eq!(stats.low_priority_created, 1);
        assert_eq!(stats.high_priority_created, 1);
        assert_eq!(stats.acquisitions, 2);
        assert!(!stats.default_created);
    }

    #[test]
    fn test_default_stream_created_once() {
        let sim = SimDriver::new(1);
        let pool = StreamPool::new(0);
        let a = pool.default_stream(&sim).unwrap();
        let b = pool.default_stream(&sim).unwrap();
        assert_eq!(a, b);
        assert_eq!(sim.stats().default_streams, 1);
        assert_eq!(pool.created_streams(), vec![a]);
    }

    #[test]
    fn test_creation_failure_propagates_and_leaves_slot_empty() {
        let sim = SimDriver::new(1);
        let pool = StreamPool::new(0);

        sim.fail_next(DriverOp::CreateStream, 2);
        let err = pool.acquire(&sim, StreamPriority::Low).unwrap_err();
        assert_eq!(err.driver_code(), Some(2));
        assert_eq!(pool.stats().acquisitions, 0);
        assert_eq!(pool.stats().created(), 0);
    }

    #[test]
    fn test_concurrent_first_touch_creates_each_slot_once() {
        let sim = Arc::new(SimDriver::new(1));
        let pool = Arc::new(StreamPool::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sim = sim.clone();
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..64)
                        .map(|_| pool.acquire(&*sim, StreamPriority::Low).unwrap().1)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            seen.extend(handle.join().unwrap());
        }

        assert_eq!(seen.len(), STREAMS_PER_POOL);
        assert_eq!(sim.stats().streams_created, STREAMS_PER_POOL);
        assert_eq!(pool.stats().acquisitions, 8 * 64);
    }

    #[test]
    fn test_release_destroys_pooled_streams_only() {
        let sim = SimDriver::new(1);
        let mut pool = StreamPool::new(0);
        pool.default_stream(&sim).unwrap();
        pool.acquire(&sim, StreamPriority::Low).unwrap();
        pool.acquire(&sim, StreamPriority::High).unwrap();

        pool.release(&sim);
        assert_eq!(sim.stats().streams_destroyed, 2);
        assert_eq!(pool.stats().created(), 0);
        assert!(pool.stats().default_created);
    }
}
