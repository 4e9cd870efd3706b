//! Runtime error types

use crossbeam_channel::{RecvError, SendError};
use std::any::TypeId;

/// Failures while assembling a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("type mismatch: {from_node}.{from_port} ({from_type:?}) -> {to_node}.{to_port} ({to_type:?})")]
    TypeMismatch {
        from_node: String,
        from_port: String,
        from_type: TypeId,
        to_node: String,
        to_port: String,
        to_type: TypeId,
    },

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("port '{port}' not found on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("input port '{port}' on node '{node}' is already connected")]
    DuplicateConnection { node: String, port: String },

    #[error("type {0:?} not registered; call register_type::<T>() before building")]
    TypeNotRegistered(TypeId),
}

/// Failures inside a node's work function.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("failed to receive from input channel: {0}")]
    RecvError(#[from] RecvError),

    #[error("failed to send to output channel: {0}")]
    SendError(String),

    #[error("node error: {0}")]
    NodeError(String),

    #[error("shutdown signal received")]
    Shutdown,
}

impl<T> From<SendError<T>> for WorkError {
    fn from(e: SendError<T>) -> Self {
        WorkError::SendError(format!("{}", e))
    }
}

/// Result type for work functions.
pub type WorkResult<T = ()> = Result<T, WorkError>;
