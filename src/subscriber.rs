//! Subscriber façade: attaches to an existing topic, signs in over the
//! control channel, and reads frames under the reader/writer protocol
//! (§4.5).

use uuid::Uuid;

use crate::config::BusConfig;
use crate::control::{self, Command, ControlBackend, ControlMessage, ControlSender};
use crate::dtype::DType;
use crate::error::Result;
use crate::region::TopicRegions;
use crate::semaphore::NamedSemaphore;
use crate::topic::names;

pub struct Subscriber {
    topic: String,
    subscriber_id: String,
    regions: TopicRegions,
    wake_sem: NamedSemaphore,
    writer_priority: bool,
    control_backend: ControlBackend,
}

impl Subscriber {
    /// Attaches to `topic`, waiting (per `config.join_backoff`) for its
    /// regions to appear if the publisher hasn't started yet, then signs in.
    pub fn connect(topic: &str, config: &BusConfig) -> Result<Self> {
        let subscriber_id = Uuid::new_v4().to_string();
        let regions = TopicRegions::open_subscriber(topic, &config.join_backoff)?;
        let control_backend = control::resolve_backend(config.control_backend);

        send_control(
            topic,
            control_backend,
            ControlMessage {
                r_id: subscriber_id.clone(),
                command: Command::Signin,
            },
        )?;

        let wake_sem = NamedSemaphore::open_with_backoff(
            &names::wake_sem(topic, &subscriber_id),
            &config.join_backoff,
        )?;

        tracing::info!(topic, subscriber_id = %subscriber_id, "subscriber connected");
        Ok(Self {
            topic: topic.to_string(),
            subscriber_id,
            regions,
            wake_sem,
            writer_priority: config.writer_priority,
            control_backend,
        })
    }

    pub fn frame_bytes(&self) -> usize {
        self.regions.frame_bytes()
    }

    pub fn metadata(&self) -> Result<(Vec<usize>, DType)> {
        self.regions.read_metadata()
    }

    /// Blocks until the publisher signals a new frame, then reads it.
    pub fn recv(&self) -> Result<(Vec<u8>, u64)> {
        self.wake_sem.wait()?;
        self.read_current_frame()
    }

    /// Non-blocking: returns `Ok(None)` if no wake signal is currently
    /// pending.
    pub fn try_recv(&self) -> Result<Option<(Vec<u8>, u64)>> {
        if !self.wake_sem.try_wait()? {
            return Ok(None);
        }
        self.read_current_frame().map(Some)
    }

    fn read_current_frame(&self) -> Result<(Vec<u8>, u64)> {
        self.regions.acquire_read(self.writer_priority)?;
        let mut buf = vec![0u8; self.regions.frame_bytes()];
        let timestamp = self.regions.read_frame_into(&mut buf);
        self.regions.release_read()?;
        Ok((buf, timestamp))
    }

    /// Signs out, releasing this subscriber's slot in the publisher's
    /// registry. Best-effort: the control channel may already be gone if
    /// the publisher shut down first.
    pub fn close(self) {
        if let Err(e) = send_control(
            &self.topic,
            self.control_backend,
            ControlMessage {
                r_id: self.subscriber_id.clone(),
                command: Command::Signout,
            },
        ) {
            tracing::warn!(topic = %self.topic, subscriber_id = %self.subscriber_id, error = %e, "signout failed");
        }
    }
}

fn send_control(topic: &str, backend: ControlBackend, msg: ControlMessage) -> Result<()> {
    let mut sender = connect_sender(topic, backend)?;
    sender.send(&msg)
}

fn connect_sender(topic: &str, backend: ControlBackend) -> Result<Box<dyn ControlSender>> {
    match backend {
        ControlBackend::PosixMq => connect_posix_mq(topic),
        ControlBackend::TcpLoopback => Ok(Box::new(
            control::tcp_loopback::TcpLoopbackClient::connect(topic)?,
        )),
    }
}

#[cfg(target_os = "linux")]
fn connect_posix_mq(topic: &str) -> Result<Box<dyn ControlSender>> {
    Ok(Box::new(control::posix_mq::PosixMqClient::connect(topic)?))
}

#[cfg(not(target_os = "linux"))]
fn connect_posix_mq(_topic: &str) -> Result<Box<dyn ControlSender>> {
    Err(crate::error::FrameBusError::ChannelClosed(
        "POSIX message queues are not available on this platform".into(),
    ))
}
