//! Zero-copy, multi-producer*-free, multi-consumer frame bus for
//! co-located sensor processes: one publisher per topic, any number of
//! subscribers, coordinated entirely through POSIX shared memory and named
//! semaphores.
//!
//! *Exactly one publisher owns a topic's regions at a time — see the
//! design notes in `DESIGN.md` for why this is a deliberate single-writer
//! restriction rather than an oversight.

#[cfg(not(unix))]
compile_error!("framebus relies on POSIX shared memory, semaphores, and (on Linux) message queues, and only builds on unix targets");

pub mod config;
pub mod control;
pub mod dtype;
pub mod error;
pub mod metadata;
pub mod publisher;
pub mod region;
pub mod registry;
pub mod semaphore;
pub mod shm;
pub mod subscriber;
pub mod topic;
pub mod worker;

pub use config::{BackoffSchedule, BusConfig};
pub use dtype::DType;
pub use error::{FrameBusError, Result};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use topic::TopicDescriptor;
pub use worker::ClientWorker;
