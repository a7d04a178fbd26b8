//! POSIX message queue control channel backend (Linux only).

#![cfg(target_os = "linux")]

use std::ffi::CString;

use crate::error::{FrameBusError, Result};
use crate::topic::names;

use super::{ControlMessage, ControlReceiver, ControlSender};

const MAX_MSG_SIZE: usize = 4096;

pub struct PosixMqServer {
    mqd: libc::mqd_t,
    name: CString,
}

unsafe impl Send for PosixMqServer {}

impl PosixMqServer {
    /// Binds the queue for `topic`, unlinking any stale leftover first —
    /// the same stale-resource recovery used by shared memory and
    /// semaphores.
    pub fn bind(topic: &str) -> Result<Self> {
        let name = mq_cstring(topic)?;
        let mut attr = libc::mq_attr {
            mq_flags: 0,
            mq_maxmsg: 1,
            mq_msgsize: MAX_MSG_SIZE as i64,
            mq_curmsgs: 0,
        };
        let mqd = unsafe {
            libc::mq_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDONLY,
                0o600u32,
                &mut attr as *mut libc::mq_attr,
            )
        };
        let mqd = if mqd != -1 {
            mqd
        } else {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                tracing::warn!(topic, "stale control queue found, unlinking and retrying");
                unsafe {
                    libc::mq_unlink(name.as_ptr());
                }
                let mqd = unsafe {
                    libc::mq_open(
                        name.as_ptr(),
                        libc::O_CREAT | libc::O_EXCL | libc::O_RDONLY,
                        0o600u32,
                        &mut attr as *mut libc::mq_attr,
                    )
                };
                if mqd == -1 {
                    return Err(std::io::Error::last_os_error().into());
                }
                mqd
            } else {
                return Err(err.into());
            }
        };
        Ok(Self { mqd, name })
    }

    pub fn shutdown(self) {
        let name = self.name.clone();
        drop(self);
        unsafe {
            libc::mq_unlink(name.as_ptr());
        }
    }
}

/// Unlinks topic's control queue by name, without needing a live handle.
/// Used by the publisher's teardown path: the listener thread owns the
/// receiver handle itself, so shutdown can't consume it directly, but the
/// name still needs removing so a later publisher on the same topic doesn't
/// have to recover a stale queue.
pub fn unlink(topic: &str) {
    if let Ok(name) = mq_cstring(topic) {
        unsafe {
            libc::mq_unlink(name.as_ptr());
        }
    }
}

impl ControlReceiver for PosixMqServer {
    /// Waits up to `timeout` for the next message. Uses `mq_timedreceive`
    /// against an absolute `CLOCK_REALTIME` deadline — POSIX message queues
    /// have no relative-timeout variant — so the listener loop in
    /// `publisher.rs` can periodically check its running flag instead of
    /// blocking on `mq_receive` past the point anyone will ever write to
    /// this queue again.
    fn recv_timeout(&mut self, timeout: std::time::Duration) -> Result<Option<ControlMessage>> {
        let mut buf = vec![0u8; MAX_MSG_SIZE];
        let deadline = absolute_deadline(timeout);
        let n = unsafe {
            libc::mq_timedreceive(
                self.mqd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                std::ptr::null_mut(),
                &deadline,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::TimedOut {
                return Ok(None);
            }
            return Err(FrameBusError::ChannelClosed(err.to_string()));
        }
        let msg: ControlMessage = serde_json::from_slice(&buf[..n as usize])?;
        Ok(Some(msg))
    }
}

fn absolute_deadline(timeout: std::time::Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as i64;
    let mut sec = now.tv_sec + timeout.as_secs() as i64;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec += 1;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

impl Drop for PosixMqServer {
    fn drop(&mut self) {
        unsafe {
            libc::mq_close(self.mqd);
        }
    }
}

pub struct PosixMqClient {
    mqd: libc::mqd_t,
}

unsafe impl Send for PosixMqClient {}

impl PosixMqClient {
    pub fn connect(topic: &str) -> Result<Self> {
        let name = mq_cstring(topic)?;
        let mqd = unsafe { libc::mq_open(name.as_ptr(), libc::O_WRONLY) };
        if mqd == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self { mqd })
    }
}

impl ControlSender for PosixMqClient {
    fn send(&mut self, msg: &ControlMessage) -> Result<()> {
        let payload = serde_json::to_vec(msg)?;
        let rc = unsafe {
            libc::mq_send(
                self.mqd,
                payload.as_ptr() as *const libc::c_char,
                payload.len(),
                0u32,
            )
        };
        if rc != 0 {
            return Err(FrameBusError::ChannelClosed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for PosixMqClient {
    fn drop(&mut self) {
        unsafe {
            libc::mq_close(self.mqd);
        }
    }
}

fn mq_cstring(topic: &str) -> Result<CString> {
    CString::new(names::control_queue(topic)).map_err(|e| {
        FrameBusError::InvalidMetadata(format!("topic '{topic}' is not a valid C string: {e}"))
    })
}
