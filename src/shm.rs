//! POSIX shared-memory region: `shm_open` + `ftruncate` + `mmap`, wrapped so
//! that both the owning publisher and attaching subscribers get a uniform
//! mutable view (subscribers need to mutate the reader-counter region, so
//! there is no separate read-only variant).

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::io::FromRawFd;
use std::thread;

use memmap2::MmapMut;

use crate::config::BackoffSchedule;
use crate::error::{FrameBusError, Result};

pub struct ShmRegion {
    _file: File,
    mmap: MmapMut,
}

impl ShmRegion {
    /// Creates a new region, sized `size` bytes, recovering from a stale
    /// leftover of the same name by unlinking it and retrying once — the
    /// process that died without unlinking its own resources is the
    /// previous run, not a conflicting live publisher.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let cname = shm_cstring(name)?;
        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        let fd = if fd >= 0 {
            fd
        } else {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                tracing::warn!(name, "stale shared memory region found, unlinking and retrying");
                Self::unlink(name);
                let fd = unsafe {
                    libc::shm_open(
                        cname.as_ptr(),
                        libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                        0o600,
                    )
                };
                if fd < 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                fd
            } else {
                return Err(err.into());
            }
        };

        let file = unsafe { File::from_raw_fd(fd) };
        file.set_len(size as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Opens an existing region, retrying on `NotFound` per `backoff` —
    /// subscribers may start before their publisher does.
    pub fn open_with_backoff(name: &str, backoff: &BackoffSchedule) -> Result<Self> {
        let cname = shm_cstring(name)?;
        let started = std::time::Instant::now();
        let mut delay = backoff.initial_delay;
        loop {
            let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
            if fd >= 0 {
                let file = unsafe { File::from_raw_fd(fd) };
                let mmap = unsafe { MmapMut::map_mut(&file)? };
                return Ok(Self { _file: file, mmap });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(err.into());
            }
            if started.elapsed() >= backoff.max_wait {
                return Err(FrameBusError::Timeout(name.to_string()));
            }
            thread::sleep(delay);
            delay = backoff.next_delay(delay);
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// Cast-through helper for mutating shared state (atomics, raw byte
    /// copies) through a shared reference — both readers and the writer
    /// hold only `&self` in the hot path and coordinate via semaphores
    /// rather than Rust's borrow checker.
    pub fn as_raw_mut_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Removes the named region from the filesystem namespace. Idempotent:
    /// errors (including "doesn't exist") are swallowed, matching the
    /// explicit-teardown contract where callers unlink defensively.
    pub fn unlink(name: &str) {
        if let Ok(cname) = shm_cstring(name) {
            unsafe {
                libc::shm_unlink(cname.as_ptr());
            }
        }
    }
}

fn shm_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|e| {
        FrameBusError::InvalidMetadata(format!("shm name '{name}' is not a valid C string: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/framebus-test-{tag}-{}", uuid::Uuid::new_v4())
    }

    #[test]
    fn create_then_open_sees_same_bytes() {
        let name = unique_name("shm-basic");
        let mut owner = ShmRegion::create(&name, 64).unwrap();
        unsafe {
            std::ptr::write_bytes(owner.as_mut_ptr(), 0xAB, 64);
        }

        let backoff = BackoffSchedule::default();
        let subscriber = ShmRegion::open_with_backoff(&name, &backoff).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(subscriber.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0xAB));

        ShmRegion::unlink(&name);
    }

    #[test]
    fn stale_region_is_recovered_on_create() {
        let name = unique_name("shm-stale");
        let first = ShmRegion::create(&name, 16).unwrap();
        drop(first);
        // first's fd is gone but the kernel name persists until unlinked.
        let second = ShmRegion::create(&name, 16);
        assert!(second.is_ok());
        ShmRegion::unlink(&name);
    }

    #[test]
    fn open_nonexistent_region_times_out() {
        let name = unique_name("shm-missing");
        let backoff = BackoffSchedule {
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            max_wait: std::time::Duration::from_millis(20),
        };
        let err = ShmRegion::open_with_backoff(&name, &backoff).unwrap_err();
        assert!(matches!(err, FrameBusError::Timeout(_)));
    }
}
