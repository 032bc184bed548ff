//! Connection lifecycle, independent of any socket.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──opened──► Open ──joined──► Joined
//!       ▲                       │                    │                │
//!       │                       └──────failed────────┴────────────────┤
//!       │                                                             ▼
//!    closed                          Reconnecting{attempt} ◄── backoff allows
//!                                           │
//!                                           └── backoff exhausted ──► Error
//! ```
//!
//! The transport task owns one [`ConnectionMachine`] and asks it what to do
//! after every socket event, so the retry logic is testable without I/O.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::protocol::ClientMessage;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket is up; the join has been sent but not acknowledged.
    Open,
    Joined,
    Reconnecting { attempt: u32 },
    /// Gave up, or the relay refused the room.
    Error,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Joined)
    }
}

/// What to do after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    backoff: Arc<dyn BackoffPolicy>,
}

impl ConnectionMachine {
    pub fn new(backoff: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start a fresh dial. Returns `false` if a connection is already up or
    /// being retried.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.state = ConnectionState::Connecting;
                self.attempt = 0;
                true
            }
            _ => false,
        }
    }

    /// The socket opened. Returns whether this recovered from a drop.
    pub fn opened(&mut self) -> bool {
        let reconnected = matches!(self.state, ConnectionState::Reconnecting { .. });
        self.state = ConnectionState::Open;
        self.attempt = 0;
        reconnected
    }

    pub fn joined(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Joined;
        } else {
            log::warn!("join acknowledged in state {:?}", self.state);
        }
    }

    /// The dial failed or an open socket dropped.
    pub fn failed(&mut self) -> RetryDecision {
        self.attempt += 1;
        match self.backoff.delay(self.attempt) {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting { attempt: self.attempt };
                RetryDecision::Retry { attempt: self.attempt, delay }
            }
            None => {
                let attempts = self.attempt - 1;
                self.state = ConnectionState::Error;
                self.attempt = 0;
                RetryDecision::GiveUp { attempts }
            }
        }
    }

    /// The relay refused the room. Not retried.
    pub fn rejected(&mut self) {
        self.state = ConnectionState::Error;
        self.attempt = 0;
    }

    /// Deliberate close.
    pub fn closed(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;
    }
}

/// Outbound messages held while the socket is down, replayed in order on
/// reconnect.
pub struct OutboundQueue {
    queue: VecDeque<ClientMessage>,
    max_size: usize,
}

impl OutboundQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Returns `false` (and drops the message) when full.
    pub fn enqueue(&mut self, msg: ClientMessage) -> bool {
        if self.queue.len() >= self.max_size {
            log::warn!("outbound queue full ({}), dropping {}", self.max_size, msg.kind());
            return false;
        }
        self.queue.push_back(msg);
        true
    }

    pub fn drain(&mut self) -> Vec<ClientMessage> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
