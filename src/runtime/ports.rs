//! Typed port wrappers and port schemas
//!
//! Nodes receive their channels as type-erased [`InputPort`]s and
//! [`OutputPort`]s; `get::<T>()` recovers the typed endpoint, wired to the
//! pipeline watchdog. Port schemas give the pipeline builder the names and
//! types it needs for connection checking.

use std::any::TypeId;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicBool;

use crossbeam_channel::Receiver as CrossbeamReceiver;

pub use super::pipeline::Pipeline;
pub use super::receiver::Receiver;
pub use super::sender::Sender;
pub use super::type_registry::register_type;
pub use super::watchdog::{Watchdog, WatchdogHandle};

use super::sender::ChannelMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Metadata describing one port of a node.
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub index: usize,
    pub direction: PortDirection,
}

impl PortSchema {
    pub fn new<T: 'static>(name: impl Into<String>, index: usize, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            index,
            direction,
        }
    }
}

/// Type-erased input endpoint. Owns the sticky end-of-stream flag so it
/// survives across `work()` calls; the putback buffer is owned by the
/// node, which knows its own lookahead needs.
pub struct InputPort {
    channel: Box<dyn std::any::Any + Send>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: AtomicBool,
}

impl InputPort {
    /// For internal use by the pipeline builder; a watchdog must be
    /// attached before the port is handed to a node.
    pub(crate) fn from_type_erased(channel: Box<dyn std::any::Any + Send>) -> Self {
        Self {
            channel,
            watchdog_handle: None,
            eos: AtomicBool::new(false),
        }
    }

    /// Direct construction for tests and hand-wired graphs.
    pub fn new_with_watchdog<T: Send + 'static>(
        receiver: CrossbeamReceiver<ChannelMessage<T>>,
        watchdog: &Watchdog,
        node_name: &str,
        port_name: &str,
    ) -> Self {
        Self {
            channel: Box::new(receiver),
            watchdog_handle: Some(watchdog.register_port(node_name, "recv", port_name)),
            eos: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_watchdog(
        mut self,
        watchdog: Watchdog,
        node_name: String,
        port_name: String,
    ) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(&node_name, "recv", &port_name));
        self
    }

    /// Borrow a typed receiver over this port. Returns `None` when the
    /// port is unconnected or carries a different type.
    ///
    /// # Panics
    /// Panics if no watchdog was attached; the pipeline always attaches
    /// one.
    pub fn get<'a, T: Send + 'static>(
        &'a self,
        buffer: &'a mut VecDeque<T>,
    ) -> Option<Receiver<'a, T>> {
        let receiver = self
            .channel
            .downcast_ref::<CrossbeamReceiver<ChannelMessage<T>>>()?;
        let watchdog = self
            .watchdog_handle
            .as_ref()
            .expect("InputPort::get() called before watchdog attached");
        Some(Receiver::new(receiver, buffer, watchdog.clone(), &self.eos))
    }
}

/// Type-erased output endpoint wrapping a broadcast [`Sender`].
pub struct OutputPort {
    channel: Box<dyn std::any::Any + Send>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl OutputPort {
    pub(crate) fn from_type_erased(channel: Box<dyn std::any::Any + Send>) -> Self {
        Self {
            channel,
            watchdog_handle: None,
        }
    }

    /// Direct construction for tests and hand-wired graphs.
    pub fn new_with_watchdog<T: Send + Clone + 'static>(
        sender: Sender<T>,
        watchdog: &Watchdog,
        node_name: &str,
        port_name: &str,
    ) -> Self {
        Self {
            channel: Box::new(sender),
            watchdog_handle: Some(watchdog.register_port(node_name, "send", port_name)),
        }
    }

    pub(crate) fn with_watchdog(
        mut self,
        watchdog: Watchdog,
        node_name: String,
        port_name: String,
    ) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(&node_name, "send", &port_name));
        self
    }

    /// Clone out a typed sender for this port. Returns `None` when the
    /// port is unconnected or carries a different type; nodes treat that
    /// as "output not wired" and skip sending.
    ///
    /// # Panics
    /// Panics if no watchdog was attached; the pipeline always attaches
    /// one.
    pub fn get<T: Send + Clone + 'static>(&self) -> Option<Sender<T>> {
        let sender = self.channel.downcast_ref::<Sender<T>>()?;
        let watchdog = self
            .watchdog_handle
            .as_ref()
            .expect("OutputPort::get() called before watchdog attached");
        Some(sender.with_watchdog(watchdog.clone()))
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputPort")
    }
}
