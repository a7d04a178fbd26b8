//! Publisher façade: owns a topic's shared-memory regions and subscriber
//! registry, and runs the control-channel listener that applies
//! signin/signout as they arrive (§4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::BusConfig;
use crate::control::{self, Command, ControlBackend, ControlMessage, ControlReceiver};
use crate::error::Result;
use crate::region::TopicRegions;
use crate::registry::SubscriberRegistry;
use crate::topic::TopicDescriptor;

/// How often the listener thread's bounded receive wakes up to check
/// `running` when no control message is pending.
const LISTENER_POLL: Duration = Duration::from_millis(200);

pub struct Publisher {
    topic: TopicDescriptor,
    regions: TopicRegions,
    registry: Arc<SubscriberRegistry>,
    config: BusConfig,
    control_backend: ControlBackend,
    running: Arc<AtomicBool>,
    listener: thread::JoinHandle<()>,
}

impl Publisher {
    /// Creates every named resource for `topic` and starts listening for
    /// subscriber signin/signout.
    pub fn new(topic: TopicDescriptor, config: BusConfig) -> Result<Self> {
        let regions = TopicRegions::create_owner(&topic.name, &topic.shape, topic.dtype)?;
        let registry = Arc::new(SubscriberRegistry::new(topic.name.clone()));
        let control_backend = control::resolve_backend(config.control_backend);
        let running = Arc::new(AtomicBool::new(true));
        let listener = spawn_control_listener(
            topic.name.clone(),
            Arc::clone(&registry),
            control_backend,
            Arc::clone(&running),
        )?;
        tracing::info!(topic = %topic.name, ?control_backend, "publisher ready");
        Ok(Self {
            topic,
            regions,
            registry,
            config,
            control_backend,
            running,
            listener,
        })
    }

    /// Writes a new frame and wakes every currently registered subscriber.
    pub fn publish(&self, payload: &[u8], timestamp: u64) -> Result<()> {
        self.regions
            .publish(payload, timestamp, self.config.writer_priority)?;
        self.registry.fanout_signal();
        Ok(())
    }

    pub fn frame_bytes(&self) -> usize {
        self.regions.frame_bytes()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Tears down every named resource this publisher owns: flips the
    /// running flag so the listener thread exits on its next bounded
    /// receive, joins it, then unlinks every per-subscriber wake semaphore,
    /// the control channel, and the four region resources, in that order.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.listener.join();
        if self.control_backend == ControlBackend::PosixMq {
            unlink_posix_mq(&self.topic.name);
        }
        self.registry.shutdown();
        self.regions.shutdown(&self.topic.name);
    }
}

fn spawn_control_listener(
    topic: String,
    registry: Arc<SubscriberRegistry>,
    backend: ControlBackend,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let mut receiver: Box<dyn ControlReceiver> = bind_receiver(&topic, backend)?;
    Ok(thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(LISTENER_POLL) {
                Ok(Some(msg)) => apply(&registry, msg),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(topic, error = %e, "control channel closed, listener exiting");
                    return;
                }
            }
        }
    }))
}

fn apply(registry: &SubscriberRegistry, msg: ControlMessage) {
    match msg.command {
        Command::Signin => {
            if let Err(e) = registry.signin(&msg.r_id) {
                tracing::warn!(subscriber_id = %msg.r_id, error = %e, "signin failed");
            }
        }
        Command::Signout => registry.signout(&msg.r_id),
    }
}

fn bind_receiver(topic: &str, backend: ControlBackend) -> Result<Box<dyn ControlReceiver>> {
    match backend {
        ControlBackend::PosixMq => bind_posix_mq(topic),
        ControlBackend::TcpLoopback => {
            Ok(Box::new(control::tcp_loopback::TcpLoopbackServer::bind(topic)?))
        }
    }
}

#[cfg(target_os = "linux")]
fn bind_posix_mq(topic: &str) -> Result<Box<dyn ControlReceiver>> {
    Ok(Box::new(control::posix_mq::PosixMqServer::bind(topic)?))
}

#[cfg(not(target_os = "linux"))]
fn bind_posix_mq(_topic: &str) -> Result<Box<dyn ControlReceiver>> {
    Err(crate::error::FrameBusError::ChannelClosed(
        "POSIX message queues are not available on this platform".into(),
    ))
}

#[cfg(target_os = "linux")]
fn unlink_posix_mq(topic: &str) {
    control::posix_mq::unlink(topic);
}

#[cfg(not(target_os = "linux"))]
fn unlink_posix_mq(_topic: &str) {}
