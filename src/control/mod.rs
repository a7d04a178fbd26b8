//! Control channel: how a subscriber tells a publisher's process "I'm here,
//! wake me" (`signin`) and "I'm leaving" (`signout`). Two backends exist
//! because POSIX message queues aren't available everywhere a publisher and
//! its subscribers might run.

pub mod posix_mq;
pub mod tcp_loopback;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Signin,
    Signout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub r_id: String,
    pub command: Command,
}

/// The subscriber side: sends signin/signout requests.
pub trait ControlSender: Send {
    fn send(&mut self, msg: &ControlMessage) -> Result<()>;
}

/// The publisher side: waits for the next incoming request, but no longer
/// than `timeout`. Bounded waits, rather than an unbounded `recv`, are what
/// let the listener thread notice the publisher's running flag going false
/// and exit instead of blocking forever on a channel nobody will write to
/// again.
pub trait ControlReceiver: Send {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ControlMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBackend {
    PosixMq,
    TcpLoopback,
}

/// Picks the backend available on this platform: POSIX message queues on
/// Linux, a loopback TCP socket everywhere else (notably macOS, where
/// `mq_open` doesn't exist).
pub fn probe_backend() -> ControlBackend {
    if cfg!(target_os = "linux") {
        ControlBackend::PosixMq
    } else {
        ControlBackend::TcpLoopback
    }
}

/// Resolves the backend to use: an explicit `BusConfig::control_backend`
/// override wins, otherwise falls back to the platform capability probe.
pub fn resolve_backend(override_backend: Option<ControlBackend>) -> ControlBackend {
    override_backend.unwrap_or_else(probe_backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_as_lowercase_json() {
        let msg = ControlMessage {
            r_id: "sub-1".to_string(),
            command: Command::Signin,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"signin\""));
        assert!(json.contains("\"sub-1\""));

        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.command, Command::Signin));
        assert_eq!(back.r_id, "sub-1");
    }

    #[test]
    fn probe_backend_picks_a_platform_appropriate_backend() {
        let backend = probe_backend();
        if cfg!(target_os = "linux") {
            assert_eq!(backend, ControlBackend::PosixMq);
        } else {
            assert_eq!(backend, ControlBackend::TcpLoopback);
        }
    }

    #[test]
    fn resolve_backend_prefers_the_explicit_override() {
        assert_eq!(
            resolve_backend(Some(ControlBackend::TcpLoopback)),
            ControlBackend::TcpLoopback
        );
        assert_eq!(resolve_backend(None), probe_backend());
    }
}
