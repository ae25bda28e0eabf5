//! Outbound message queue.
//!
//! One queue per connection, many producers, exactly one consumer (the
//! sender execution). The consumer drains everything queued so far in a
//! single operation, which bounds lock acquisitions and write syscalls
//! under burst load — the difference between this and a one-at-a-time
//! channel is most of the engine's throughput story.

use std::collections::VecDeque;
use std::sync::Mutex;

use parlor_proto::Message;
use thiserror::Error;
use tokio::sync::Notify;

/// Returned by `put` once the queue has been closed, so a send on a dead
/// connection is detectable without a panic or a vague I/O error.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("outbound queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Message>,
    closed: bool,
}

/// Monitor-style batch queue decoupling producers from the sender execution.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message; returns the queue depth after the insert.
    pub fn put(&self, message: Message) -> Result<usize, QueueClosed> {
        let depth = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if state.closed {
                return Err(QueueClosed);
            }
            state.items.push_back(message);
            state.items.len()
        };
        self.ready.notify_one();
        Ok(depth)
    }

    /// Block until at least one message is queued, then remove and return
    /// everything, preserving submission order. `None` means the queue was
    /// closed and the consumer should exit.
    pub async fn drain_all(&self) -> Option<Vec<Message>> {
        loop {
            let ready = self.ready.notified();
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if !state.items.is_empty() {
                    return Some(state.items.drain(..).collect());
                }
                if state.closed {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Discard pending items and wake the consumer so it can exit promptly.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.closed = true;
            state.items.clear();
        }
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("queue lock poisoned").closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
