//! Error types for each layer of the node.

use thiserror::Error;

use crate::protocol::STATUS_FAILED;
use crate::types::ProcessId;

/// Failures while framing or exchanging a [`crate::protocol::Message`].
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u64),
    #[error("unexpected reply from {0}")]
    UnexpectedReply(String),
}

/// Failures of a migratable process or its construction.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("unknown process kind '{0}'")]
    UnknownKind(String),
    #[error("invalid arguments, usage: {0}")]
    InvalidArguments(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("process did not reach a safe point in time")]
    SuspendTimedOut,
    #[error("process has already finished")]
    Finished,
}

/// Outcome of a process manager operation that did not succeed.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),
    #[error("host '{0}' not found")]
    HostNotFound(String),
    #[error("{0}: command failed")]
    RemoteFailed(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ManagerError {
    /// Wire status for this failure.  The cause never leaves the node.
    pub fn status(&self) -> i32 {
        STATUS_FAILED
    }
}
