//! Listener subsystem.
//!
//! Binds the node's well-known port and answers exactly one
//! [`Message`] per connection:
//!
//! * **Transfer**: a migrated process.  It is restarted here under a
//!   fresh identifier and the connection is closed without a reply.
//! * **Migrate / Kill / AddHost / RemoveHost**: forwarded to the
//!   [`ProcessManager`], the outcome goes back as a status code.
//! * **ListProcesses**: answered with a snapshot of the local registry.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::error::{ManagerError, WireError};
use crate::manager::ProcessManager;
use crate::protocol::{read_message, write_message, Message, STATUS_FAILED, STATUS_OK};

/// Binds and serves until accepting fails.
pub async fn run_server(bind_addr: SocketAddr, manager: Arc<ProcessManager>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Could not bind {}: {}", bind_addr, e))?;
    serve(listener, manager).await
}

/// Accept loop over an already bound listener.
///
/// Accept errors are fatal.  Each connection is handled on its own task so
/// that a node can migrate a process to itself while a request is open.
pub async fn serve(listener: TcpListener, manager: Arc<ProcessManager>) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow::anyhow!("Socket accept error: {}", e))?;
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, manager).await {
                warn!("Connection from {} abandoned: {}", peer, e);
            }
        });
    }
}

fn status_of(outcome: Result<(), ManagerError>) -> Message {
    match outcome {
        Ok(()) => Message::status(STATUS_OK),
        Err(e) => {
            warn!("Request failed: {}", e);
            Message::status(e.status())
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    manager: Arc<ProcessManager>,
) -> Result<(), WireError> {
    let reply = match read_message(&mut stream).await? {
        Message::Transfer(image) => {
            info!("Restarting migrated process.");
            if let Err(e) = manager.adopt(image) {
                error!("Could not restart migrated process: {}", e);
            }
            return Ok(());
        }
        Message::Migrate { id, destination } => status_of(manager.migrate(id, &destination).await),
        Message::Kill { id } => status_of(manager.kill(id)),
        Message::AddHost { hosts } => {
            manager.add_hosts(&hosts).await;
            Message::status(STATUS_OK)
        }
        Message::RemoveHost { host } => status_of(manager.remove_host(&host).await),
        Message::ListProcesses => Message::ProcessList {
            status: STATUS_OK,
            processes: manager.list_processes(),
        },
        Message::Response { .. } | Message::ProcessList { .. } => {
            warn!("Received a reply where a request was expected");
            Message::status(STATUS_FAILED)
        }
    };

    write_message(&mut stream, &reply).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request;
    use crate::workloads::WorkloadRegistry;
    use std::time::Duration;
    use tempfile::TempDir;

    /// A node listening on an ephemeral loopback port, named after it.
    async fn spawn_node(pace: Duration) -> Arc<ProcessManager> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let name = listener.local_addr().unwrap().to_string();
        let manager = Arc::new(
            ProcessManager::new(name, 0, WorkloadRegistry::with_defaults()).with_pace(pace),
        );
        tokio::spawn(serve(listener, Arc::clone(&manager)));
        manager
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..300 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    fn path(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn copy_migrated_after_first_byte_resumes_at_offset_one() {
        let dir = TempDir::new().unwrap();
        std::fs::write(path(&dir, "in"), b"AB").unwrap();
        let a = spawn_node(Duration::from_millis(200)).await;
        let b = spawn_node(Duration::from_millis(200)).await;

        let id = a
            .launch("CopyFileProcess", &[path(&dir, "in"), path(&dir, "out")])
            .unwrap();
        // First byte is copied right away, the second only after the pace.
        eventually("first byte", || {
            std::fs::read(path(&dir, "out")).map(|bytes| bytes.len()).unwrap_or(0) == 1
        })
        .await;

        a.migrate(id, b.host_name()).await.unwrap();
        assert!(!a.contains(id));

        eventually("arrival on b", || b.list_processes().len() == 1).await;
        let arrived = b.list_processes().remove(0);
        assert_eq!(arrived.kind, "CopyFileProcess");
        assert_eq!(arrived.args.last().unwrap(), &id.to_string());

        let new_id = arrived.id;
        eventually("completion on b", || !b.contains(new_id)).await;
        assert_eq!(std::fs::read(path(&dir, "out")).unwrap(), b"AB");
    }

    #[tokio::test]
    async fn migrated_grep_matches_a_single_node_run() {
        let dir = TempDir::new().unwrap();
        let text: String = (0..20)
            .map(|i| if i % 3 == 0 { format!("keep {}\n", i) } else { format!("drop {}\n", i) })
            .collect();
        std::fs::write(path(&dir, "in"), &text).unwrap();

        let single = spawn_node(Duration::ZERO).await;
        let id = single
            .launch("GrepProcess", &["keep".into(), path(&dir, "in"), path(&dir, "expected")])
            .unwrap();
        eventually("single-node grep", || !single.contains(id)).await;

        let a = spawn_node(Duration::from_millis(10)).await;
        let b = spawn_node(Duration::from_millis(10)).await;
        let id = a
            .launch("GrepProcess", &["keep".into(), path(&dir, "in"), path(&dir, "out")])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        a.migrate(id, b.host_name()).await.unwrap();
        eventually("arrival on b", || !b.list_processes().is_empty()).await;
        eventually("completion on b", || b.list_processes().is_empty()).await;

        assert_eq!(
            std::fs::read_to_string(path(&dir, "out")).unwrap(),
            std::fs::read_to_string(path(&dir, "expected")).unwrap()
        );
    }

    #[tokio::test]
    async fn relayed_requests_reach_the_owning_node() {
        let dir = TempDir::new().unwrap();
        std::fs::write(path(&dir, "in"), vec![b'x'; 200]).unwrap();
        let a = spawn_node(Duration::from_millis(20)).await;
        let b = spawn_node(Duration::from_millis(20)).await;
        let c = spawn_node(Duration::from_millis(20)).await;

        let id = a
            .launch("CopyFileProcess", &[path(&dir, "in"), path(&dir, "out")])
            .unwrap();

        // c asks a to send its process to b.
        c.migrate_from(id, a.host_name(), b.host_name()).await.unwrap();
        assert!(!a.contains(id));
        eventually("arrival on b", || b.list_processes().len() == 1).await;

        let moved = b.list_processes()[0].id;
        c.kill_on(moved, b.host_name()).await.unwrap();
        assert!(!b.contains(moved));

        // Unknown ids fail remotely and leave both registries alone.
        assert!(matches!(
            c.kill_on(999, a.host_name()).await,
            Err(ManagerError::RemoteFailed(_))
        ));
        assert!(matches!(
            c.migrate_from(999, a.host_name(), b.host_name()).await,
            Err(ManagerError::RemoteFailed(_))
        ));
    }

    #[tokio::test]
    async fn list_processes_is_answered_with_a_snapshot() {
        let dir = TempDir::new().unwrap();
        std::fs::write(path(&dir, "in"), vec![b'x'; 100]).unwrap();
        let a = spawn_node(Duration::from_millis(50)).await;
        let id = a
            .launch("CopyFileProcess", &[path(&dir, "in"), path(&dir, "out")])
            .unwrap();

        match request(a.host_name(), 0, &Message::ListProcesses).await.unwrap() {
            Message::ProcessList { status, processes } => {
                assert_eq!(status, STATUS_OK);
                assert_eq!(processes.len(), 1);
                assert_eq!(processes[0].id, id);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        a.kill(id).unwrap();
    }

    #[tokio::test]
    async fn host_table_edits_are_broadcast() {
        let a = spawn_node(Duration::ZERO).await;
        let b = spawn_node(Duration::ZERO).await;
        let c = spawn_node(Duration::ZERO).await;

        assert!(a.broadcast_add_host(b.host_name()).await.is_empty());
        assert!(a.broadcast_add_host(c.host_name()).await.is_empty());
        let expected = vec![
            a.host_name().to_string(),
            b.host_name().to_string(),
            c.host_name().to_string(),
        ];
        assert_eq!(a.hosts().await, expected);

        // Peers merge in arrival order; only membership has to agree.
        let mut sorted = expected.clone();
        sorted.sort();
        for peer in [&b, &c] {
            let mut seen = peer.hosts().await;
            seen.sort();
            assert_eq!(seen, sorted);
        }

        assert!(a.broadcast_remove_host(c.host_name()).await.is_empty());
        assert_eq!(a.hosts().await, expected[..2].to_vec());
        assert!(!b.hosts().await.contains(&c.host_name().to_string()));
        // c dropped itself and now only knows itself.
        assert_eq!(c.hosts().await, vec![c.host_name().to_string()]);
    }

    #[tokio::test]
    async fn removing_an_unknown_host_is_reported_as_failure() {
        let a = spawn_node(Duration::ZERO).await;
        let reply = request(
            a.host_name(),
            0,
            &Message::RemoveHost {
                host: "nowhere".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(reply, Message::status(STATUS_FAILED));
    }

    #[tokio::test]
    async fn unreachable_hosts_show_up_in_cluster_listing() {
        let a = spawn_node(Duration::ZERO).await;
        // Grab a free port and close it again so nothing listens there.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_name = dead.local_addr().unwrap().to_string();
        drop(dead);
        a.add_hosts(&[dead_name.clone()]).await;

        let listing = a.cluster_processes().await;
        assert_eq!(listing.len(), 2);
        assert!(listing[0].1.as_ref().unwrap().is_empty());
        assert_eq!(listing[1].0, dead_name);
        assert!(listing[1].1.is_err());
    }
}
