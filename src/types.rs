//! Data structures shared between the process layer and the wire.
//!
//! These types are serialised using [`serde`](https://serde.rs/) and
//! carried inside [`crate::protocol::Message`] frames.  A process never
//! crosses the wire as itself; it is flattened into a [`ProcessImage`]
//! and rebuilt on the receiving node through the workload registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node-local process identifier.
pub type ProcessId = u64;

/// The durable part of a transactional stream.
///
/// File handles are deliberately absent: the receiving node reopens the
/// file lazily and seeks to `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    /// Role of the stream inside its workload, e.g. `input` or `output`.
    pub name: String,
    pub path: String,
    pub offset: u64,
    pub migrated: bool,
}

/// Full serialised state of a suspended process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessImage {
    /// Workload kind, used to look up the constructor on arrival.
    pub kind: String,
    pub id: ProcessId,
    /// Launch arguments; the last element is the process identifier.
    pub args: Vec<String>,
    pub streams: Vec<StreamCursor>,
}

/// Display form of a registered process, as returned by `ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub kind: String,
    pub id: ProcessId,
    pub args: Vec<String>,
}

impl fmt::Display for ProcessSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(PID: {}) - ", self.kind, self.id)?;
        let last = self.args.len().saturating_sub(1);
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if i == last {
                write!(f, "(Old pid: {})", arg)?;
            } else {
                f.write_str(arg)?;
            }
        }
        Ok(())
    }
}
