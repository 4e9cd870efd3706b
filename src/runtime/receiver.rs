//! Channel receiver with a putback buffer
//!
//! Wraps a `crossbeam_channel::Receiver<ChannelMessage<T>>` with a
//! caller-owned putback buffer, so decoders can peek ahead in a stream
//! and return items they are not ready to consume. End-of-stream state is
//! cached in the owning port: once seen, every later call returns
//! `WorkError::Shutdown` immediately.

use crossbeam_channel::Receiver as CrossbeamReceiver;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// Borrowed view over one input channel.
///
/// The buffer and the end-of-stream flag live in the owning node/port and
/// persist across `work()` calls; the `Receiver` itself is rebuilt on each
/// call from `InputPort::get()`.
pub struct Receiver<'a, T> {
    receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
    buffer: &'a mut VecDeque<T>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: &'a AtomicBool,
}

impl<'a, T> Receiver<'a, T> {
    pub fn new(
        receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
        buffer: &'a mut VecDeque<T>,
        watchdog_handle: WatchdogHandle,
        eos: &'a AtomicBool,
    ) -> Self {
        Self {
            receiver,
            buffer,
            watchdog_handle: Some(watchdog_handle),
            eos,
        }
    }

    fn mark_eos(&self) -> WorkError {
        self.eos.store(true, Ordering::Relaxed);
        WorkError::Shutdown
    }

    /// Blocking receive: putback buffer first, then the channel. Items
    /// put back after end-of-stream are still returned.
    pub fn recv(&mut self) -> WorkResult<T> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        if self.eos.load(Ordering::Relaxed) {
            return Err(WorkError::Shutdown);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.receiver.recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) | Err(_) => Err(self.mark_eos()),
        }
    }

    /// Look at the next item without consuming it, blocking to fill the
    /// buffer if needed.
    pub fn peek(&mut self) -> WorkResult<&T> {
        if self.buffer.is_empty() && self.eos.load(Ordering::Relaxed) {
            return Err(WorkError::Shutdown);
        }
        if self.buffer.is_empty() {
            let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
            match self.receiver.recv() {
                Ok(ChannelMessage::Sample(item)) => self.buffer.push_back(item),
                Ok(ChannelMessage::EndOfStream) | Err(_) => return Err(self.mark_eos()),
            }
        }
        // Just filled above.
        Ok(self.buffer.front().unwrap())
    }

    /// Receive with a timeout; buffered items return immediately.
    pub fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<T, crossbeam_channel::RecvTimeoutError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        if self.eos.load(Ordering::Relaxed) {
            return Err(crossbeam_channel::RecvTimeoutError::Disconnected);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.receiver.recv_timeout(timeout) {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos.store(true, Ordering::Relaxed);
                Err(crossbeam_channel::RecvTimeoutError::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Return an item so the next `recv()`/`peek()` yields it first.
    pub fn put_back(&mut self, item: T) {
        self.buffer.push_front(item);
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }
}
