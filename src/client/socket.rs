//! Outbound message queue for a socket that may not be open yet.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{HmrError, Result};
use crate::protocol::HmrMessage;

/// Where serialized frames go once the socket is open.
pub trait SocketSink: Send + Sync {
    fn send_text(&self, text: String) -> Result<()>;
}

impl SocketSink for mpsc::UnboundedSender<String> {
    fn send_text(&self, text: String) -> Result<()> {
        self.send(text).map_err(|_| HmrError::TransportClosed)
    }
}

#[derive(Default)]
struct SocketState {
    open: bool,
    queue: VecDeque<HmrMessage>,
}

/// Messages sent before the socket opens are queued and flushed, in order,
/// ahead of anything sent afterwards.
pub struct HmrSocket {
    sink: Box<dyn SocketSink>,
    state: Mutex<SocketState>,
}

impl HmrSocket {
    pub fn new(sink: impl SocketSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            state: Mutex::new(SocketState::default()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Send now if open with nothing still queued, otherwise queue behind
    /// the earlier messages. A failed send leaves the message queued for
    /// the next open event.
    pub fn send(&self, message: HmrMessage) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open || !state.queue.is_empty() {
            debug!(kind = message.kind(), queued = state.queue.len(), "queueing message");
            state.queue.push_back(message);
            return Ok(());
        }
        if let Err(e) = self.sink.send_text(message.to_json()?) {
            state.queue.push_back(message);
            return Err(e);
        }
        Ok(())
    }

    /// Open event. Flushes the queue and returns how many frames were sent.
    ///
    /// On a failed send the failed message and everything after it stay
    /// queued, and later sends queue behind them until the next open event
    /// drains the queue.
    pub fn on_open(&self) -> Result<usize> {
        let mut state = self.state.lock();
        state.open = true;

        let mut flushed = 0;
        while let Some(message) = state.queue.pop_front() {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    state.queue.push_front(message);
                    return Err(e);
                }
            };
            if let Err(e) = self.sink.send_text(text) {
                state.queue.push_front(message);
                return Err(e);
            }
            flushed += 1;
        }
        Ok(flushed)
    }

    pub fn on_close(&self) {
        self.state.lock().open = false;
    }
}
