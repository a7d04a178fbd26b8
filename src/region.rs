//! The four shared-memory regions and four named semaphores backing one
//! topic, and the reader/writer protocol that coordinates access to them
//! (§4.1).
//!
//! The counter region is 8 bytes wide: the low word is the live reader
//! count, the high word is a writer-waiting flag used only when
//! `writer_priority` is enabled. Both halves are zero-initialized by the
//! owner at creation.

use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::BackoffSchedule;
use crate::dtype::DType;
use crate::error::{FrameBusError, Result};
use crate::metadata;
use crate::semaphore::NamedSemaphore;
use crate::shm::ShmRegion;
use crate::topic::names;

const COUNTER_REGION_SIZE: usize = 8;
const WRITER_WAIT_POLL: Duration = Duration::from_micros(200);

pub struct TopicRegions {
    frame: ShmRegion,
    frame_sem: NamedSemaphore,
    // The timestamp write is folded into the `frame`-exclusive critical
    // section (there is exactly one writer and it already holds `frame`
    // exclusively), but the region itself is the named, addressable home
    // for the timestamp per spec §4.1/§6 — a cross-process reader of
    // `stm-T` must see real data, not a dead placeholder. The semaphore
    // guarding it is created, named, and unlinked for interface fidelity
    // but never itself acquired (see §4.1 "Timestamp region semaphore").
    timestamp: ShmRegion,
    _timestamp_sem: NamedSemaphore,
    counter: ShmRegion,
    counter_sem: NamedSemaphore,
    metadata: ShmRegion,
    metadata_sem: NamedSemaphore,
    frame_bytes: usize,
}

impl TopicRegions {
    /// Creates every named resource for `topic`, fresh, and writes its
    /// metadata record. Called once by the owning publisher.
    pub fn create_owner(topic: &str, shape: &[usize], dtype: DType) -> Result<Self> {
        let frame_bytes = shape.iter().product::<usize>() * dtype.element_size();
        let frame = ShmRegion::create(&names::frame(topic), frame_bytes)?;
        let frame_sem = NamedSemaphore::create(&names::frame_sem(topic), 1)?;

        let timestamp = ShmRegion::create(&names::timestamp(topic), 8)?;
        let timestamp_sem = NamedSemaphore::create(&names::timestamp_sem(topic), 1)?;

        let mut counter = ShmRegion::create(&names::counter(topic), COUNTER_REGION_SIZE)?;
        unsafe {
            std::ptr::write_bytes(counter.as_mut_ptr(), 0, COUNTER_REGION_SIZE);
        }
        let counter_sem = NamedSemaphore::create(&names::counter_sem(topic), 1)?;

        let metadata_region = ShmRegion::create(&names::metadata(topic), metadata::METADATA_WIDTH)?;
        let metadata_sem = NamedSemaphore::create(&names::metadata_sem(topic), 1)?;

        let mut regions = Self {
            frame,
            frame_sem,
            timestamp,
            _timestamp_sem: timestamp_sem,
            counter,
            counter_sem,
            metadata: metadata_region,
            metadata_sem,
            frame_bytes,
        };
        regions.write_metadata(shape, dtype)?;
        Ok(regions)
    }

    /// Opens every named resource for `topic`, retrying with `backoff` for
    /// regions a publisher hasn't created yet.
    pub fn open_subscriber(topic: &str, backoff: &BackoffSchedule) -> Result<Self> {
        let frame = ShmRegion::open_with_backoff(&names::frame(topic), backoff)?;
        let frame_sem = NamedSemaphore::open_with_backoff(&names::frame_sem(topic), backoff)?;

        let timestamp = ShmRegion::open_with_backoff(&names::timestamp(topic), backoff)?;
        let timestamp_sem =
            NamedSemaphore::open_with_backoff(&names::timestamp_sem(topic), backoff)?;

        let counter = ShmRegion::open_with_backoff(&names::counter(topic), backoff)?;
        let counter_sem = NamedSemaphore::open_with_backoff(&names::counter_sem(topic), backoff)?;

        let metadata_region = ShmRegion::open_with_backoff(&names::metadata(topic), backoff)?;
        let metadata_sem = NamedSemaphore::open_with_backoff(&names::metadata_sem(topic), backoff)?;

        let frame_bytes = frame.len();

        Ok(Self {
            frame,
            frame_sem,
            timestamp,
            _timestamp_sem: timestamp_sem,
            counter,
            counter_sem,
            metadata: metadata_region,
            metadata_sem,
            frame_bytes,
        })
    }

    fn write_metadata(&mut self, shape: &[usize], dtype: DType) -> Result<()> {
        self.metadata_sem.wait()?;
        let record = metadata::encode(shape, dtype);
        unsafe {
            std::ptr::copy_nonoverlapping(
                record.as_ptr(),
                self.metadata.as_mut_ptr(),
                metadata::METADATA_WIDTH,
            );
        }
        self.metadata_sem.post()
    }

    pub fn read_metadata(&self) -> Result<(Vec<usize>, DType)> {
        self.metadata_sem.wait()?;
        let bytes =
            unsafe { std::slice::from_raw_parts(self.metadata.as_ptr(), metadata::METADATA_WIDTH) }
                .to_vec();
        self.metadata_sem.post()?;
        metadata::decode(&bytes)
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Writes a new frame. Validated against `frame_bytes` before any
    /// semaphore is touched, so a caller's mistake leaves the region
    /// untouched rather than partially overwritten.
    pub fn publish(&self, payload: &[u8], timestamp: u64, writer_priority: bool) -> Result<()> {
        if payload.len() != self.frame_bytes {
            return Err(FrameBusError::ShapeMismatch {
                expected: self.frame_bytes,
                actual: payload.len(),
            });
        }

        if writer_priority {
            self.counter_sem.wait()?;
            self.writer_waiting_atomic().store(1, Ordering::SeqCst);
            self.counter_sem.post()?;
        }

        self.frame_sem.wait()?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.frame.as_raw_mut_ptr(),
                payload.len(),
            );
            std::ptr::copy_nonoverlapping(
                timestamp.to_le_bytes().as_ptr(),
                self.timestamp.as_raw_mut_ptr(),
                8,
            );
        }
        self.frame_sem.post()?;

        if writer_priority {
            self.counter_sem.wait()?;
            self.writer_waiting_atomic().store(0, Ordering::SeqCst);
            self.counter_sem.post()?;
        }
        Ok(())
    }

    /// Registers the calling thread as a reader. First reader acquires the
    /// frame semaphore on behalf of the whole cohort; later readers ride
    /// along. When `writer_priority` is set and a writer is waiting, a
    /// newly arriving reader (finding the region otherwise idle) backs off
    /// briefly instead of extending the writer's wait indefinitely.
    pub fn acquire_read(&self, writer_priority: bool) -> Result<()> {
        loop {
            self.counter_sem.wait()?;
            let count = self.counter_atomic().load(Ordering::SeqCst);
            if writer_priority && count == 0 && self.writer_waiting_atomic().load(Ordering::SeqCst) != 0 {
                self.counter_sem.post()?;
                thread::sleep(WRITER_WAIT_POLL);
                continue;
            }
            let new_count = self.counter_atomic().fetch_add(1, Ordering::SeqCst) + 1;
            if new_count == 1 {
                self.frame_sem.wait()?;
            }
            self.counter_sem.post()?;
            return Ok(());
        }
    }

    pub fn release_read(&self) -> Result<()> {
        self.counter_sem.wait()?;
        let new_count = self.counter_atomic().fetch_sub(1, Ordering::SeqCst) - 1;
        if new_count == 0 {
            self.frame_sem.post()?;
        }
        self.counter_sem.post()
    }

    /// Copies the current frame into `out` (must be exactly `frame_bytes`
    /// long) and returns the publish timestamp. Caller must hold a read
    /// acquisition (`acquire_read`/`release_read`) around this call.
    pub fn read_frame_into(&self, out: &mut [u8]) -> u64 {
        debug_assert_eq!(out.len(), self.frame_bytes);
        unsafe {
            std::ptr::copy_nonoverlapping(self.frame.as_ptr(), out.as_mut_ptr(), self.frame_bytes);
            let mut ts_bytes = [0u8; 8];
            std::ptr::copy_nonoverlapping(self.timestamp.as_ptr(), ts_bytes.as_mut_ptr(), 8);
            u64::from_le_bytes(ts_bytes)
        }
    }

    /// Consumes `self` (closing all process-local handles) then unlinks
    /// every named resource for `topic`. Only the owning publisher calls
    /// this.
    pub fn shutdown(self, topic: &str) {
        drop(self);
        ShmRegion::unlink(&names::frame(topic));
        NamedSemaphore::unlink(&names::frame_sem(topic));
        ShmRegion::unlink(&names::timestamp(topic));
        NamedSemaphore::unlink(&names::timestamp_sem(topic));
        ShmRegion::unlink(&names::counter(topic));
        NamedSemaphore::unlink(&names::counter_sem(topic));
        ShmRegion::unlink(&names::metadata(topic));
        NamedSemaphore::unlink(&names::metadata_sem(topic));
    }

    fn counter_atomic(&self) -> &AtomicI32 {
        unsafe { &*(self.counter.as_raw_mut_ptr() as *const AtomicI32) }
    }

    fn writer_waiting_atomic(&self) -> &AtomicI32 {
        unsafe { &*(self.counter.as_raw_mut_ptr().add(4) as *const AtomicI32) }
    }
}
