//! Topic identity and the naming scheme for the POSIX resources backing it.

use crate::dtype::DType;

#[derive(Debug, Clone)]
pub struct TopicDescriptor {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TopicDescriptor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// Total payload size in bytes: the product of `shape` times the dtype's
    /// element size.
    pub fn frame_bytes(&self) -> usize {
        self.shape.iter().product::<usize>() * self.dtype.element_size()
    }
}

/// Every named kernel resource a topic touches, gathered in one place so
/// publisher, subscriber, and registry code never hand-assemble a name.
pub mod names {
    pub fn frame(topic: &str) -> String {
        format!("/ram-{topic}")
    }

    pub fn timestamp(topic: &str) -> String {
        format!("/stm-{topic}")
    }

    pub fn counter(topic: &str) -> String {
        format!("/cnt-{topic}")
    }

    pub fn metadata(topic: &str) -> String {
        format!("/mat-{topic}")
    }

    pub fn frame_sem(topic: &str) -> String {
        format!("/ram-sem-{topic}")
    }

    pub fn timestamp_sem(topic: &str) -> String {
        format!("/stm-sem-{topic}")
    }

    pub fn counter_sem(topic: &str) -> String {
        format!("/cnt-sem-{topic}")
    }

    pub fn metadata_sem(topic: &str) -> String {
        format!("/mat-sem-{topic}")
    }

    pub fn wake_sem(topic: &str, subscriber_id: &str) -> String {
        format!("/sem-{topic}-{subscriber_id}")
    }

    pub fn control_queue(topic: &str) -> String {
        format!("/{topic}")
    }
}
