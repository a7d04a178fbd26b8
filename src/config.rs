//! Ambient configuration: ring buffer depth, discovery backoff, and the
//! writer-priority knob, all overridable via environment variables.
//!
//! A plain struct with a `from_env()` constructor layered over `Default`,
//! rather than a config crate — there is exactly one knob group here and no
//! file-based config to merge it with.

use std::time::Duration;

use crate::control::ControlBackend;

/// Exponential backoff used while polling for a named shared-memory region
/// or semaphore to appear (a subscriber can start before its publisher).
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_wait: Duration,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl BackoffSchedule {
    /// Doubles `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(delay * 2, self.max_delay)
    }
}

/// Bus-wide knobs shared by publishers, subscribers, and client workers.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Depth of each subscriber's client-side ring buffer (§4.6).
    pub ring_len: usize,
    /// Whether `ClientWorker::latest` concatenates the full ring instead of
    /// returning only the most recent frame.
    pub concat: bool,
    /// When set, `acquire_read` yields to a pending writer instead of
    /// admitting new readers indefinitely (§4.1, readers-preference vs.
    /// writer-starvation tradeoff).
    pub writer_priority: bool,
    pub join_backoff: BackoffSchedule,
    /// Forces a specific control-channel backend instead of probing
    /// platform capability. `None` defers to `control::probe_backend()`.
    pub control_backend: Option<ControlBackend>,
    /// Bound on how long `ClientWorker::shutdown` waits for the polling
    /// thread to exit before releasing handles anyway.
    pub worker_join_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ring_len: 10,
            concat: false,
            writer_priority: false,
            join_backoff: BackoffSchedule::default(),
            control_backend: None,
            worker_join_timeout: Duration::from_secs(1),
        }
    }
}

impl BusConfig {
    /// Builds a config from defaults overridden by environment variables.
    /// Malformed values are logged and ignored rather than rejected, since
    /// this bus has no other way to surface a config error before a
    /// publisher/subscriber has even been constructed.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("FRAMEBUS_RING_LEN") {
            match raw.parse::<usize>() {
                Ok(0) => tracing::warn!("FRAMEBUS_RING_LEN=0 is invalid, keeping default"),
                Ok(n) => config.ring_len = n,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparsable FRAMEBUS_RING_LEN"),
            }
        }

        if let Ok(raw) = std::env::var("FRAMEBUS_CONCAT") {
            match raw.parse::<bool>() {
                Ok(v) => config.concat = v,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparsable FRAMEBUS_CONCAT"),
            }
        }

        if let Ok(raw) = std::env::var("FRAMEBUS_WRITER_PRIORITY") {
            match raw.parse::<bool>() {
                Ok(v) => config.writer_priority = v,
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparsable FRAMEBUS_WRITER_PRIORITY")
                }
            }
        }

        if let Ok(raw) = std::env::var("FRAMEBUS_CONTROL_BACKEND") {
            match raw.as_str() {
                "posix_mq" => config.control_backend = Some(ControlBackend::PosixMq),
                "tcp_loopback" => config.control_backend = Some(ControlBackend::TcpLoopback),
                _ => tracing::warn!(value = %raw, "ignoring unrecognized FRAMEBUS_CONTROL_BACKEND"),
            }
        }

        if let Ok(raw) = std::env::var("FRAMEBUS_WORKER_JOIN_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.worker_join_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %raw, "ignoring unparsable FRAMEBUS_WORKER_JOIN_TIMEOUT_MS"),
            }
        }

        config
    }
}
