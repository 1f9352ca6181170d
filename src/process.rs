//! Migratable processes and their control handles.
//!
//! A [`MigratableProcess`] is a [`Workload`] plus identity and a control
//! channel.  Its execution task runs one unit of work at a time and,
//! between units, waits on the channel for at most its pacing interval.
//! That gap is the safe point: a suspend request is answered there by
//! closing every stream and handing the parked process itself back to
//! the requester through a oneshot channel.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};

use crate::error::ProcessError;
use crate::types::{ProcessId, ProcessImage, ProcessSnapshot};
use crate::workloads::{Step, Workload, WorkloadRegistry};

/// Told once when a process stops running on this node, whether it
/// finished, was killed or is about to migrate out.
pub trait CompletionListener: Send + Sync {
    fn notify_of_thread_completion(&self, process: &mut MigratableProcess);
}

/// Requests delivered to a running process at its next safe point.
pub enum Signal {
    Suspend(oneshot::Sender<MigratableProcess>),
    Stop,
}

enum SafePoint {
    Continue,
    Stop,
    Suspend(oneshot::Sender<MigratableProcess>),
}

pub struct MigratableProcess {
    id: ProcessId,
    kind: String,
    /// Launch arguments; the last element is an identifier.
    args: Vec<String>,
    workload: Box<dyn Workload>,
    pace: Duration,
    control: mpsc::UnboundedReceiver<Signal>,
    listener: Option<Arc<dyn CompletionListener>>,
}

/// Registry-side view of a process: enough to list it and to signal it.
pub struct ProcessHandle {
    id: ProcessId,
    kind: String,
    args: Vec<String>,
    control: mpsc::UnboundedSender<Signal>,
}

impl MigratableProcess {
    /// Builds a process of `kind` from `argv`, whose last element is the
    /// identifier assigned by the launching node.
    pub fn launch(
        registry: &WorkloadRegistry,
        kind: &str,
        argv: Vec<String>,
    ) -> Result<(Self, ProcessHandle), ProcessError> {
        let (id, params) = match argv.split_last() {
            Some((id, params)) => (id, params),
            None => return Err(ProcessError::InvalidArguments("missing process id".into())),
        };
        let id: ProcessId = id
            .parse()
            .map_err(|_| ProcessError::InvalidArguments(format!("bad process id '{}'", id)))?;
        let workload = registry.construct(kind, params)?;
        Ok(Self::assemble(id, kind.to_string(), argv, workload))
    }

    /// Rebuilds a process that arrived from another node under a fresh
    /// local `id`.  The previous identifier becomes the trailing argument.
    pub fn from_image(
        registry: &WorkloadRegistry,
        image: ProcessImage,
        id: ProcessId,
    ) -> Result<(Self, ProcessHandle), ProcessError> {
        let ProcessImage {
            kind,
            id: previous,
            mut args,
            streams,
        } = image;
        let params = args.split_last().map(|(_, params)| params).unwrap_or(&[]);
        let mut workload = registry.construct(&kind, params)?;
        workload.restore(&streams);

        match args.last_mut() {
            Some(last) => *last = previous.to_string(),
            None => args.push(previous.to_string()),
        }
        Ok(Self::assemble(id, kind, args, workload))
    }

    fn assemble(
        id: ProcessId,
        kind: String,
        args: Vec<String>,
        workload: Box<dyn Workload>,
    ) -> (Self, ProcessHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ProcessHandle {
            id,
            kind: kind.clone(),
            args: args.clone(),
            control: tx,
        };
        let pace = workload.pace();
        let process = Self {
            id,
            kind,
            args,
            workload,
            pace,
            control: rx,
            listener: None,
        };
        (process, handle)
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn set_pace(&mut self, pace: Duration) {
        self.pace = pace;
    }

    /// Attaches `listener`, replacing any previous one.
    pub fn add_listener(&mut self, listener: Arc<dyn CompletionListener>) {
        self.listener = Some(listener);
    }

    pub fn remove_listener(&mut self) {
        self.listener = None;
    }

    /// Notifies the attached listener, if any.
    pub fn signal_listeners(&mut self) {
        if let Some(listener) = self.listener.clone() {
            listener.notify_of_thread_completion(self);
        }
    }

    pub fn migration_pre_process(&mut self) {
        self.workload.migration_pre_process();
    }

    /// Flattens a parked process for transfer.
    pub fn into_image(self) -> ProcessImage {
        ProcessImage {
            streams: self.workload.cursors(),
            kind: self.kind,
            id: self.id,
            args: self.args,
        }
    }

    async fn safe_point(&mut self) -> SafePoint {
        match tokio::time::timeout(self.pace, self.control.recv()).await {
            Err(_) => SafePoint::Continue,
            Ok(Some(Signal::Suspend(ack))) => SafePoint::Suspend(ack),
            Ok(Some(Signal::Stop)) => SafePoint::Stop,
            // Every handle is gone, nobody can reach us any more.
            Ok(None) => SafePoint::Stop,
        }
    }

    /// Executes the workload until it finishes, is stopped or is parked.
    pub async fn run(self) {
        let mut process = self;
        debug!("process [{}] running {}", process.id, process.workload.kind());

        loop {
            match process.workload.step().await {
                Ok(Step::Continue) => {}
                Ok(Step::Finished) => break,
                Err(e) => {
                    error!("{}({}): {}", process.kind, process.id, e);
                    break;
                }
            }

            match process.safe_point().await {
                SafePoint::Continue => {}
                SafePoint::Stop => break,
                SafePoint::Suspend(ack) => {
                    process.workload.close();
                    let id = process.id;
                    match ack.send(process) {
                        Ok(()) => return,
                        Err(returned) => {
                            // The requester gave up waiting; keep going.
                            warn!("suspend of process [{}] abandoned, resuming", id);
                            process = returned;
                        }
                    }
                }
            }
        }

        process.workload.close();
        process.signal_listeners();
    }
}

impl ProcessHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            kind: self.kind.clone(),
            id: self.id,
            args: self.args.clone(),
        }
    }

    /// Requests termination at the next safe point and returns at once.
    pub fn stop(&self) {
        if self.control.send(Signal::Stop).is_err() {
            debug!("stop for process [{}] after it finished", self.id);
        }
    }

    /// Requests a pause at the next safe point and waits for the process
    /// to park, for at most `timeout` when one is given.
    pub async fn suspend(
        &self,
        timeout: Option<Duration>,
    ) -> Result<MigratableProcess, ProcessError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Signal::Suspend(tx))
            .map_err(|_| ProcessError::Finished)?;

        let parked = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| ProcessError::SuspendTimedOut)?,
            None => rx.await,
        };
        parked.map_err(|_| ProcessError::Finished)
    }
}
