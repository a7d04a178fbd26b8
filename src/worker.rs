//! Background polling thread that keeps a fixed-depth ring of recently
//! received frames so callers can read `latest()` without blocking on the
//! bus themselves (§4.6). Convenience layer over `Subscriber`; nothing here
//! is required to publish or subscribe directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::BusConfig;
use crate::subscriber::Subscriber;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// The single-slot "data available" gate (§4.6): a boolean behind a
/// `Condvar`, set by the polling thread after every successful read and
/// cleared by the first `latest_blocking` call that observes it set. Acts as
/// a binary gate: empty at construction, filled by the worker on arrival,
/// drained by the one waiter that consumes it.
type UpdateGate = (Mutex<bool>, Condvar);

pub struct ClientWorker {
    ring: Arc<Mutex<VecDeque<Vec<u8>>>>,
    gate: Arc<UpdateGate>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    frame_bytes: usize,
    ring_len: usize,
    concat: bool,
    join_timeout: Duration,
}

impl ClientWorker {
    /// Takes ownership of `subscriber` and starts polling it on a
    /// background thread, with `ring_len`/`concat`/`worker_join_timeout`
    /// fixed for this worker's lifetime from `config`: a topic's
    /// concatenation policy is decided once, at subscribe time, not on every
    /// `latest()` call. The ring is pre-filled with `ring_len` zeroed frames
    /// so `latest()` never needs a special empty case.
    pub fn spawn(subscriber: Subscriber, config: &BusConfig) -> Self {
        let frame_bytes = subscriber.frame_bytes();
        let ring_len = config.ring_len;
        let ring = Arc::new(Mutex::new(VecDeque::from(vec![
            vec![0u8; frame_bytes];
            ring_len
        ])));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let ring_for_thread = Arc::clone(&ring);
        let gate_for_thread = Arc::clone(&gate);
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            run(
                subscriber,
                ring_for_thread,
                gate_for_thread,
                stop_for_thread,
                ring_len,
            )
        });

        Self {
            ring,
            gate,
            stop,
            handle: Some(handle),
            frame_bytes,
            ring_len,
            concat: config.concat,
            join_timeout: config.worker_join_timeout,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn ring_len(&self) -> usize {
        self.ring_len
    }

    /// Returns the most recent frame immediately, without waiting for new
    /// data. When this topic was configured with `concat: true`, returns
    /// the full ring (always exactly `ring_len` frames, zero-padded until
    /// it fills — §9's resolution of the concatenation open question)
    /// concatenated oldest first instead.
    pub fn latest(&self) -> Vec<u8> {
        let guard = self.ring.lock().unwrap();
        snapshot(&guard, self.concat)
    }

    /// Blocks until a frame has arrived since the last call to either
    /// `latest_blocking` or (implicitly) worker startup, then returns the
    /// same snapshot `latest()` would. This is the gated call: it consumes
    /// the single-slot signal, so a second call with no intervening
    /// publication blocks again rather than returning stale data twice.
    pub fn latest_blocking(&self) -> Vec<u8> {
        let (lock, cvar) = &*self.gate;
        let mut available = lock.lock().unwrap();
        while !*available {
            available = cvar.wait(available).unwrap();
        }
        *available = false;
        drop(available);
        self.latest()
    }

    /// Stops the polling thread (bounded by `BusConfig::worker_join_timeout`)
    /// and signs the underlying subscriber out. Handles are released even
    /// if the thread doesn't exit within the timeout, so shutdown never
    /// blocks indefinitely on a stuck worker.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_with_timeout();
    }

    fn join_with_timeout(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        // std::thread has no bounded join; poll `is_finished` instead, which
        // gives the same "wait up to N, then move on" behavior the rest of
        // the bus uses for backoff.
        let started = std::time::Instant::now();
        while !handle.is_finished() && started.elapsed() < self.join_timeout {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }
}

impl Drop for ClientWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_with_timeout();
    }
}

fn snapshot(ring: &VecDeque<Vec<u8>>, concat: bool) -> Vec<u8> {
    if !concat {
        return ring.back().cloned().unwrap_or_default();
    }
    ring.iter().flatten().copied().collect()
}

fn run(
    subscriber: Subscriber,
    ring: Arc<Mutex<VecDeque<Vec<u8>>>>,
    gate: Arc<UpdateGate>,
    stop: Arc<AtomicBool>,
    ring_len: usize,
) {
    while !stop.load(Ordering::SeqCst) {
        match subscriber.try_recv() {
            Ok(Some((frame, _timestamp))) => {
                let mut guard = ring.lock().unwrap();
                guard.push_back(frame);
                while guard.len() > ring_len {
                    guard.pop_front();
                }
                drop(guard);

                let (lock, cvar) = &*gate;
                let mut available = lock.lock().unwrap();
                *available = true;
                cvar.notify_one();
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                tracing::warn!(error = %e, "subscriber worker exiting after read failure");
                break;
            }
        }
    }
    subscriber.close();
    // Wake any caller blocked in `latest_blocking` so shutdown never leaves
    // it waiting on a signal the worker can no longer produce.
    let (lock, cvar) = &*gate;
    let mut available = lock.lock().unwrap();
    *available = true;
    cvar.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_gate() -> Arc<UpdateGate> {
        Arc::new((Mutex::new(false), Condvar::new()))
    }

    fn stopped_worker(
        ring: VecDeque<Vec<u8>>,
        frame_bytes: usize,
        ring_len: usize,
        concat: bool,
    ) -> ClientWorker {
        ClientWorker {
            ring: Arc::new(Mutex::new(ring)),
            gate: idle_gate(),
            stop: Arc::new(AtomicBool::new(true)),
            handle: None,
            frame_bytes,
            ring_len,
            concat,
            join_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn latest_without_concat_returns_zeroed_frame_before_any_publish() {
        let ring = VecDeque::from(vec![vec![0u8; 4]; 3]);
        let worker = stopped_worker(ring, 4, 3, false);
        assert_eq!(worker.latest(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn latest_with_concat_joins_the_full_ring_oldest_first() {
        let ring = VecDeque::from(vec![vec![1u8], vec![2u8], vec![3u8]]);
        let worker = stopped_worker(ring, 1, 3, true);
        assert_eq!(worker.latest(), vec![1, 2, 3]);
    }

    #[test]
    fn latest_with_concat_always_returns_ring_len_even_before_the_ring_fills() {
        // Per §9: the ring is pre-filled with zeroed frames at construction,
        // so a concatenated latest() always has a fixed leading dimension.
        let ring = VecDeque::from(vec![vec![0u8], vec![0u8], vec![7u8]]);
        let worker = stopped_worker(ring, 1, 3, true);
        assert_eq!(worker.latest(), vec![0, 0, 7]);
    }

    #[test]
    fn latest_blocking_wakes_exactly_once_per_signaled_update() {
        let ring = VecDeque::from(vec![vec![0u8], vec![0u8]]);
        let worker = stopped_worker(ring, 1, 2, false);
        let ring_handle = Arc::clone(&worker.ring);
        let gate_handle = Arc::clone(&worker.gate);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ring_handle.lock().unwrap().push_back(vec![9u8]);
            let (lock, cvar) = &*gate_handle;
            *lock.lock().unwrap() = true;
            cvar.notify_one();
        });

        assert_eq!(worker.latest_blocking(), vec![9]);
        producer.join().unwrap();
    }
}
