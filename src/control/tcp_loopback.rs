//! Loopback TCP fallback for platforms without POSIX message queues
//! (notably macOS). Each topic gets a deterministic port derived from its
//! name so publisher and subscribers agree on where to connect without a
//! separate discovery step.
//!
//! Framing matches the channel's actual traffic pattern: small, low-rate,
//! newline-free JSON frames. One socket read is treated as one message —
//! there is no length prefix or delimiter, so a read that returns multiple
//! coalesced writes or a partial write is not handled here, mirroring the
//! channel's real usage (signin/signout requests arrive one at a time, well
//! spaced).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

use crate::error::{FrameBusError, Result};

use super::{ControlMessage, ControlReceiver, ControlSender};

const BASE_PORT: u16 = 47_600;
const READ_BUF_SIZE: usize = 4096;

/// FNV-1a over the topic name, reduced into a 1000-wide port range above
/// `BASE_PORT`.
pub fn port_for_topic(topic: &str) -> u16 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in topic.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    BASE_PORT + (hash % 1000) as u16
}

pub struct TcpLoopbackServer {
    _listener_handle: thread::JoinHandle<()>,
    inbox: mpsc::Receiver<ControlMessage>,
}

impl TcpLoopbackServer {
    pub fn bind(topic: &str) -> Result<Self> {
        let port = port_for_topic(topic);
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let tx = tx.clone();
                thread::spawn(move || read_messages(stream, tx));
            }
        });

        Ok(Self {
            _listener_handle: handle,
            inbox: rx,
        })
    }
}

impl ControlReceiver for TcpLoopbackServer {
    fn recv_timeout(&mut self, timeout: std::time::Duration) -> Result<Option<ControlMessage>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FrameBusError::ChannelClosed(
                "control listener thread exited".into(),
            )),
        }
    }
}

fn read_messages(mut stream: TcpStream, tx: mpsc::Sender<ControlMessage>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "control connection read failed");
                return;
            }
        };
        match serde_json::from_slice::<ControlMessage>(&buf[..n]) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed control message");
            }
        }
    }
}

pub struct TcpLoopbackClient {
    stream: TcpStream,
}

impl TcpLoopbackClient {
    pub fn connect(topic: &str) -> Result<Self> {
        let port = port_for_topic(topic);
        let stream = TcpStream::connect(("127.0.0.1", port))?;
        Ok(Self { stream })
    }
}

impl ControlSender for TcpLoopbackClient {
    fn send(&mut self, msg: &ControlMessage) -> Result<()> {
        let payload = serde_json::to_vec(msg)?;
        self.stream.write_all(&payload)?;
        Ok(())
    }
}
