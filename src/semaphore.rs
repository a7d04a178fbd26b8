//! POSIX named semaphore wrapper. Unlike the archived prototype this is
//! built from, `Drop` only closes the process-local handle (`sem_close`);
//! unlinking the kernel-persistent name is an explicit, separate step the
//! owning façade performs during its own teardown (`TopicRegions::shutdown`,
//! `SubscriberRegistry::signout`). A semaphore outliving the process that
//! created it is the whole point — other processes still hold it open.

use std::ffi::CString;
use std::thread;

use crate::config::BackoffSchedule;
use crate::error::{FrameBusError, Result};

pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
}

unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Creates a new semaphore at `name` with `initial_value`, recovering
    /// from a stale leftover the same way `ShmRegion::create` does.
    pub fn create(name: &str, initial_value: u32) -> Result<Self> {
        let cname = sem_cstring(name)?;
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600u32,
                initial_value,
            )
        };
        let sem = if sem != libc::SEM_FAILED {
            sem
        } else {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                tracing::warn!(name, "stale semaphore found, unlinking and retrying");
                Self::unlink(name);
                let sem = unsafe {
                    libc::sem_open(
                        cname.as_ptr(),
                        libc::O_CREAT | libc::O_EXCL,
                        0o600u32,
                        initial_value,
                    )
                };
                if sem == libc::SEM_FAILED {
                    return Err(std::io::Error::last_os_error().into());
                }
                sem
            } else {
                return Err(err.into());
            }
        };
        Ok(Self { sem, name: cname })
    }

    /// Opens an existing semaphore, retrying on `NotFound` per `backoff`.
    pub fn open_with_backoff(name: &str, backoff: &BackoffSchedule) -> Result<Self> {
        let cname = sem_cstring(name)?;
        let started = std::time::Instant::now();
        let mut delay = backoff.initial_delay;
        loop {
            let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
            if sem != libc::SEM_FAILED {
                return Ok(Self { sem, name: cname });
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

    /// Opens an existing semaphore once, with no retry. Used for a
    /// subscriber's own wake semaphore: if it's gone, the subscriber's
    /// registration was torn down out from under it, which should surface
    /// as `RegistrationLost` rather than hang retrying.
    pub fn open_once(name: &str) -> Result<Self> {
        let cname = sem_cstring(name)?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            let err = std::io::Error::last_os_error();
            return if err.kind() == std::io::ErrorKind::NotFound {
                Err(FrameBusError::RegistrationLost(name.to_string()))
            } else {
                Err(err.into())
            };
        }
        Ok(Self { sem, name: cname })
    }

    pub fn wait(&self) -> Result<()> {
        let rc = unsafe { libc::sem_wait(self.sem) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn post(&self) -> Result<()> {
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Non-blocking wait. Returns `Ok(false)` instead of an error when the
    /// semaphore is currently at zero.
    pub fn try_wait(&self) -> Result<bool> {
        let rc = unsafe { libc::sem_trywait(self.sem) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err.into())
        }
    }

    #[cfg(target_os = "linux")]
    fn value(&self) -> Result<i32> {
        let mut value: i32 = 0;
        let rc = unsafe { libc::sem_getvalue(self.sem, &mut value) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(value)
    }

    /// Edge-triggered wake signal. On Linux we can check the current value
    /// and skip a redundant `post` if the subscriber hasn't yet consumed the
    /// last one; `sem_getvalue` is unreliable for this on other platforms,
    /// so elsewhere we always post and rely on the subscriber tolerating a
    /// spurious wake (it re-checks the frame generation after waking).
    #[cfg(target_os = "linux")]
    pub fn try_signal_edge(&self) -> Result<()> {
        if self.value()? > 0 {
            return Ok(());
        }
        self.post()
    }

    #[cfg(not(target_os = "linux"))]
    pub fn try_signal_edge(&self) -> Result<()> {
        self.post()
    }

    pub fn unlink(name: &str) {
        if let Ok(cname) = sem_cstring(name) {
            unsafe {
                libc::sem_unlink(cname.as_ptr());
            }
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

fn sem_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|e| {
        FrameBusError::InvalidMetadata(format!(
            "semaphore name '{name}' is not a valid C string: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/framebus-test-sem-{tag}-{}", uuid::Uuid::new_v4())
    }

    #[test]
    fn create_open_wait_post_round_trip() {
        let name = unique_name("basic");
        let owner = NamedSemaphore::create(&name, 1).unwrap();
        owner.wait().unwrap();
        assert!(!owner.try_wait().unwrap());
        owner.post().unwrap();
        assert!(owner.try_wait().unwrap());
        NamedSemaphore::unlink(&name);
    }

    #[test]
    fn open_once_on_missing_semaphore_is_registration_lost() {
        let name = unique_name("missing");
        let err = NamedSemaphore::open_once(&name).unwrap_err();
        assert!(matches!(err, FrameBusError::RegistrationLost(_)));
    }

    #[test]
    fn open_with_backoff_times_out_on_missing_semaphore() {
        let name = unique_name("backoff-missing");
        let backoff = BackoffSchedule {
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            max_wait: std::time::Duration::from_millis(20),
        };
        let err = NamedSemaphore::open_with_backoff(&name, &backoff).unwrap_err();
        assert!(matches!(err, FrameBusError::Timeout(_)));
    }

    #[test]
    fn drop_does_not_unlink_the_kernel_name() {
        let name = unique_name("persists");
        let owner = NamedSemaphore::create(&name, 0).unwrap();
        drop(owner);
        // The name should still exist for a second opener; only an explicit
        // unlink removes it.
        let reopened = NamedSemaphore::open_once(&name);
        assert!(reopened.is_ok());
        NamedSemaphore::unlink(&name);
    }
}
