//! Per-node process manager.
//!
//! Owns the registry of processes running on this node, the identifier
//! counter and the host table.  One [`ProcessManager`] is shared behind
//! an `Arc` by the listener, the shell and every process it starts, which
//! report back through [`CompletionListener`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use log::{error, info, warn};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{ManagerError, ProcessError, WireError};
use crate::process::{CompletionListener, MigratableProcess, ProcessHandle};
use crate::protocol::{self, Message, STATUS_OK};
use crate::types::{ProcessId, ProcessImage, ProcessSnapshot};
use crate::workloads::WorkloadRegistry;

pub struct ProcessManager {
    host_name: String,
    /// Port peers listen on when a host entry names none.
    port: u16,
    workloads: WorkloadRegistry,
    processes: DashMap<ProcessId, ProcessHandle>,
    next_id: AtomicU64,
    hosts: RwLock<Vec<String>>,
    pace: Option<Duration>,
    suspend_timeout: Option<Duration>,
}

impl ProcessManager {
    pub fn new(host_name: impl Into<String>, port: u16, workloads: WorkloadRegistry) -> Self {
        let host_name = host_name.into();
        Self {
            hosts: RwLock::new(vec![host_name.clone()]),
            host_name,
            port,
            workloads,
            processes: DashMap::new(),
            next_id: AtomicU64::new(0),
            pace: None,
            suspend_timeout: None,
        }
    }

    pub fn from_config(cfg: &Config, workloads: WorkloadRegistry) -> Self {
        let mut hosts = vec![cfg.host_name.clone()];
        for host in &cfg.hosts {
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
        Self {
            hosts: RwLock::new(hosts),
            pace: cfg.pace(),
            suspend_timeout: cfg.suspend_timeout(),
            ..Self::new(cfg.host_name.clone(), cfg.port, workloads)
        }
    }

    /// Replaces every workload's own throttle.
    #[cfg(test)]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn workloads(&self) -> &WorkloadRegistry {
        &self.workloads
    }

    pub fn generate_process_id(&self) -> ProcessId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[cfg(test)]
    pub fn contains(&self, id: ProcessId) -> bool {
        self.processes.contains_key(&id)
    }

    /// Starts a new local process of `kind`.
    pub fn launch(self: &Arc<Self>, kind: &str, args: &[String]) -> Result<ProcessId, ManagerError> {
        let mut argv = args.to_vec();
        argv.push(self.generate_process_id().to_string());
        let (process, handle) = MigratableProcess::launch(&self.workloads, kind, argv)?;
        let id = process.id();
        self.start(process, handle);
        info!("launched {} as process [{}]", kind, id);
        Ok(id)
    }

    /// Restarts a process that migrated here under a fresh identifier.
    pub fn adopt(self: &Arc<Self>, image: ProcessImage) -> Result<ProcessId, ManagerError> {
        let previous = image.id;
        let id = self.generate_process_id();
        let (process, handle) = MigratableProcess::from_image(&self.workloads, image, id)?;
        self.start(process, handle);
        info!("restarted migrated process [{}] as [{}]", previous, id);
        Ok(id)
    }

    fn start(self: &Arc<Self>, mut process: MigratableProcess, handle: ProcessHandle) {
        if let Some(pace) = self.pace {
            process.set_pace(pace);
        }
        self.processes.insert(handle.id(), handle);
        let listener: Arc<dyn CompletionListener> = self.clone();
        process.add_listener(listener);
        tokio::spawn(process.run());
    }

    /// Suspends a local process and ships it to `destination`.
    ///
    /// The process leaves the registry before it is suspended.  A
    /// transport failure after that point loses it.
    pub async fn migrate(&self, id: ProcessId, destination: &str) -> Result<(), ManagerError> {
        let (_, handle) = self.processes.remove(&id).ok_or_else(|| {
            warn!("migrate: process [{}] not found", id);
            ManagerError::ProcessNotFound(id)
        })?;

        let mut parked = match handle.suspend(self.suspend_timeout).await {
            Ok(parked) => parked,
            Err(ProcessError::SuspendTimedOut) => {
                warn!("process [{}] did not reach a safe point, migration aborted", id);
                self.processes.insert(id, handle);
                return Err(ProcessError::SuspendTimedOut.into());
            }
            Err(e) => return Err(e.into()),
        };

        parked.migration_pre_process();
        parked.signal_listeners();
        let image = parked.into_image();

        protocol::transfer(destination, self.port, image)
            .await
            .map_err(|e| {
                error!("process [{}] lost in transfer to {}: {}", id, destination, e);
                e
            })?;
        info!("process [{}] migrated to {}", id, destination);
        Ok(())
    }

    /// Requests termination of a local process.
    pub fn kill(&self, id: ProcessId) -> Result<(), ManagerError> {
        let (_, handle) = self.processes.remove(&id).ok_or_else(|| {
            warn!("kill: process [{}] not found", id);
            ManagerError::ProcessNotFound(id)
        })?;
        handle.stop();
        Ok(())
    }

    pub fn list_processes(&self) -> Vec<ProcessSnapshot> {
        let mut list: Vec<ProcessSnapshot> = self
            .processes
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        list.sort_by_key(|snap| snap.id);
        list
    }

    pub async fn hosts(&self) -> Vec<String> {
        self.hosts.read().await.clone()
    }

    /// Merges `hosts` into the host table, skipping known names.
    pub async fn add_hosts(&self, hosts: &[String]) {
        let mut table = self.hosts.write().await;
        for host in hosts {
            if !table.contains(host) {
                table.push(host.clone());
            }
        }
    }

    /// Removes `host` from the table.  Removing ourselves shrinks the
    /// table to just this node.
    pub async fn remove_host(&self, host: &str) -> Result<(), ManagerError> {
        let mut table = self.hosts.write().await;
        if host == self.host_name {
            table.clear();
            table.push(self.host_name.clone());
            return Ok(());
        }
        match table.iter().position(|h| h == host) {
            Some(idx) => {
                table.remove(idx);
                Ok(())
            }
            None => Err(ManagerError::HostNotFound(host.to_string())),
        }
    }

    async fn relay(&self, host: &str, msg: &Message) -> Result<(), ManagerError> {
        match protocol::request(host, self.port, msg).await? {
            Message::Response { status } if status == STATUS_OK => Ok(()),
            _ => Err(ManagerError::RemoteFailed(host.to_string())),
        }
    }

    /// Migrates process `id` from `from` to `to`, wherever `from` is.
    pub async fn migrate_from(&self, id: ProcessId, from: &str, to: &str) -> Result<(), ManagerError> {
        if from == self.host_name {
            return self.migrate(id, to).await;
        }
        let msg = Message::Migrate {
            id,
            destination: to.to_string(),
        };
        self.relay(from, &msg).await
    }

    pub async fn kill_on(&self, id: ProcessId, host: &str) -> Result<(), ManagerError> {
        if host == self.host_name {
            return self.kill(id);
        }
        self.relay(host, &Message::Kill { id }).await
    }

    /// Adds `host` and pushes the resulting table to every member.
    ///
    /// Returns the members that could not be updated.
    pub async fn broadcast_add_host(&self, host: &str) -> Vec<(String, ManagerError)> {
        self.add_hosts(&[host.to_string()]).await;
        let table = self.hosts().await;
        let msg = Message::AddHost {
            hosts: table.clone(),
        };
        self.fan_out(table, &msg).await
    }

    /// Tells every other member to drop `host`, then drops it locally.
    pub async fn broadcast_remove_host(&self, host: &str) -> Vec<(String, ManagerError)> {
        let peers: Vec<String> = self
            .hosts()
            .await
            .into_iter()
            .filter(|h| *h != self.host_name)
            .collect();
        let msg = Message::RemoveHost {
            host: host.to_string(),
        };
        let mut failures = self.fan_out(peers, &msg).await;
        if let Err(e) = self.remove_host(host).await {
            failures.push((self.host_name.clone(), e));
        }
        failures
    }

    async fn fan_out(&self, targets: Vec<String>, msg: &Message) -> Vec<(String, ManagerError)> {
        let replies = join_all(targets.iter().map(|host| self.relay(host, msg))).await;
        targets
            .into_iter()
            .zip(replies)
            .filter_map(|(host, reply)| reply.err().map(|e| (host, e)))
            .collect()
    }

    /// Collects the process lists of every member of the host table.
    pub async fn cluster_processes(&self) -> Vec<(String, Result<Vec<ProcessSnapshot>, WireError>)> {
        let hosts = self.hosts().await;
        let replies = join_all(hosts.iter().map(|host| self.remote_processes(host))).await;
        hosts.into_iter().zip(replies).collect()
    }

    async fn remote_processes(&self, host: &str) -> Result<Vec<ProcessSnapshot>, WireError> {
        match protocol::request(host, self.port, &Message::ListProcesses).await? {
            Message::ProcessList { processes, .. } => Ok(processes),
            _ => Err(WireError::UnexpectedReply(host.to_string())),
        }
    }
}

impl CompletionListener for ProcessManager {
    fn notify_of_thread_completion(&self, process: &mut MigratableProcess) {
        info!(
            "processing of process [{}] on this node has finished",
            process.id()
        );
        process.remove_listener();
        self.processes.remove(&process.id());
    }
}
