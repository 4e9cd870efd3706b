//! Broadcast sender with watchdog monitoring

use crossbeam_channel::{SendError, Sender as CrossbeamSender};

use super::watchdog::{OperationGuard, WatchdogHandle};

/// Wrapper for everything flowing through a channel, so sources can tell
/// consumers explicitly that no more data follows. Nodes never see this
/// enum: `Sender::send()` wraps values and `Receiver::recv()` unwraps
/// them.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    /// A data sample.
    Sample(T),
    /// No more data will be sent on this channel.
    EndOfStream,
}

/// Fan-out sender: one `send()` delivers to every connected destination
/// in turn. An unconnected sender (no destinations) swallows sends, so
/// nodes can emit unconditionally on optional outputs.
pub struct Sender<T> {
    destinations: Vec<CrossbeamSender<ChannelMessage<T>>>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<T: Clone> Sender<T> {
    pub fn new(destinations: Vec<CrossbeamSender<ChannelMessage<T>>>) -> Self {
        Self {
            destinations,
            watchdog_handle: None,
        }
    }

    pub fn with_watchdog(&self, watchdog_handle: WatchdogHandle) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: Some(watchdog_handle),
        }
    }

    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }

    /// Send a value to every destination. Fails only when no destination
    /// accepted the value; a partial delivery (some receiver already gone)
    /// succeeds.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);

        let mut any_success = false;
        let mut last_error = None;
        for dest in &self.destinations {
            match dest.send(ChannelMessage::Sample(value.clone())) {
                Ok(()) => any_success = true,
                Err(SendError(msg)) => {
                    if let ChannelMessage::Sample(v) = msg {
                        last_error = Some(SendError(v));
                    }
                }
            }
        }

        if !any_success && let Some(e) = last_error {
            return Err(e);
        }
        Ok(())
    }

    /// Signal end-of-stream to every destination. Downstream receivers
    /// return `WorkError::Shutdown` from then on. Call before dropping a
    /// source's outputs.
    pub fn close(&self) {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        for dest in &self.destinations {
            let _ = dest.send(ChannelMessage::EndOfStream);
        }
    }
}

impl<T: Clone> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_broadcast_reaches_all_destinations() {
        let (tx1, rx1) = bounded::<ChannelMessage<u32>>(4);
        let (tx2, rx2) = bounded::<ChannelMessage<u32>>(4);
        let sender = Sender::new(vec![tx1, tx2]);

        sender.send(7).unwrap();
        assert!(matches!(rx1.recv().unwrap(), ChannelMessage::Sample(7)));
        assert!(matches!(rx2.recv().unwrap(), ChannelMessage::Sample(7)));
    }

    #[test]
    fn test_unconnected_send_is_ok() {
        let sender: Sender<u32> = Sender::new(vec![]);
        assert!(!sender.is_connected());
        assert!(sender.send(1).is_ok());
    }

    #[test]
    fn test_close_delivers_end_of_stream() {
        let (tx, rx) = bounded::<ChannelMessage<u32>>(4);
        let sender = Sender::new(vec![tx]);
        sender.close();
        assert!(matches!(rx.recv().unwrap(), ChannelMessage::EndOfStream));
    }
}
