//! Operator command line.
//!
//! Turns typed lines into [`Command`]s and runs them against the local
//! [`ProcessManager`], relaying to other nodes where the command names
//! one.  Everything printed here is meant for the operator; diagnostics
//! go through `log`.

use std::io::Write;
use std::sync::Arc;

use log::debug;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{ManagerError, ProcessError, WireError};
use crate::manager::ProcessManager;
use crate::types::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Launch { kind: String, args: Vec<String> },
    Ps,
    Migrate { id: ProcessId, from: String, to: String },
    Kill { id: ProcessId, from: String },
    AddHost(String),
    RemoveHost(String),
    ListHosts,
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid processID specified. Type help to see the format of the {0} command.")]
    InvalidId(&'static str),
    #[error("Invalid {0} command. Type help to see the format of the {0} command.")]
    Usage(&'static str),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, rest)) = words.split_first() else {
            return Ok(Command::Empty);
        };

        let parse_id = |cmd: &'static str, word: &str| {
            word.parse::<ProcessId>().map_err(|_| ParseError::InvalidId(cmd))
        };

        match (head, rest) {
            ("quit", _) => Ok(Command::Quit),
            ("help", _) => Ok(Command::Help),
            ("ps", _) => Ok(Command::Ps),
            ("listhosts", _) => Ok(Command::ListHosts),
            ("migrate", [id, from, to]) => Ok(Command::Migrate {
                id: parse_id("migrate", *id)?,
                from: from.to_string(),
                to: to.to_string(),
            }),
            ("migrate", _) => Err(ParseError::Usage("migrate")),
            ("kill", [id, from]) => Ok(Command::Kill {
                id: parse_id("kill", *id)?,
                from: from.to_string(),
            }),
            ("kill", _) => Err(ParseError::Usage("kill")),
            ("addhost", [host]) => Ok(Command::AddHost(host.to_string())),
            ("addhost", _) => Err(ParseError::Usage("addhost")),
            ("removehost", [host]) => Ok(Command::RemoveHost(host.to_string())),
            ("removehost", _) => Err(ParseError::Usage("removehost")),
            (kind, args) => Ok(Command::Launch {
                kind: kind.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

fn prompt() {
    print!("$$ ");
    let _ = std::io::stdout().flush();
}

fn report_failure(host: &str, err: &ManagerError) {
    match err {
        ManagerError::Wire(WireError::Io(_)) => {
            println!("Could not reach {}. Perhaps {} is down.", host, host)
        }
        ManagerError::RemoteFailed(_) => println!("{}: Command failed.", host),
        other => println!("{}: {}", host, other),
    }
}

fn print_help(manager: &ProcessManager) {
    println!("Commands:");
    println!("<processname> [arg0] [arg1] ... - Start the specified process with the given arguments.");
    println!("    Known processes: {}", manager.workloads().kinds().join(", "));
    println!();
    println!("ps - Displays a list of running processes on all nodes of the cluster");
    println!("Synopsis: ps");
    println!();
    println!("migrate - Migrate a process specified by processID from one machine in the cluster to other");
    println!("Synopsis: migrate processID fromHost toHost");
    println!();
    println!("kill - Kill the desired process from a particular host.");
    println!("Synopsis: kill processID fromHost");
    println!();
    println!("addhost - Add a host to the cluster.");
    println!("Synopsis: addhost hostName");
    println!();
    println!("removehost - Remove a host from the cluster.");
    println!("Synopsis: removehost hostName");
    println!();
    println!("listhosts - List all hosts in the cluster.");
    println!("Synopsis: listhosts");
    println!();
    println!("quit - Terminate the node");
    println!("Synopsis: quit");
    println!();
    println!("Note that process names are case-sensitive.");
}

/// Runs one command.  Returns `false` once the operator asked to quit.
pub async fn execute(manager: &Arc<ProcessManager>, command: Command) -> bool {
    match command {
        Command::Empty => {}
        Command::Quit => return false,
        Command::Help => print_help(manager),
        Command::Launch { kind, args } => match manager.launch(&kind, &args) {
            Ok(id) => debug!("started {} as [{}]", kind, id),
            Err(ManagerError::Process(ProcessError::UnknownKind(_))) => {
                println!("You have entered an invalid command. Please type 'help' for more information.")
            }
            Err(ManagerError::Process(ProcessError::InvalidArguments(usage))) => {
                println!("The process rejected its arguments. Synopsis: {}", usage)
            }
            Err(e) => println!("Could not start {}: {}", kind, e),
        },
        Command::Ps => {
            for (host, listing) in manager.cluster_processes().await {
                match listing {
                    Ok(processes) if processes.is_empty() => {
                        println!("{} - no processes running", host)
                    }
                    Ok(processes) => {
                        println!("{} - has following processes running", host);
                        for process in processes {
                            println!("{}", process);
                        }
                    }
                    Err(_) => println!("Could not reach {}. Perhaps {} is down.", host, host),
                }
            }
        }
        Command::Migrate { id, from, to } => {
            if let Err(e) = manager.migrate_from(id, &from, &to).await {
                // A local migration can only fail to reach the destination.
                let peer = if from == manager.host_name() { &to } else { &from };
                match e {
                    ManagerError::ProcessNotFound(_) => println!(
                        "The process specified was not found. Type ps to see a list of all running processes."
                    ),
                    other => report_failure(peer, &other),
                }
            }
        }
        Command::Kill { id, from } => {
            if let Err(e) = manager.kill_on(id, &from).await {
                match e {
                    ManagerError::ProcessNotFound(_) => println!(
                        "The process specified was not found. Type ps to see a list of all running processes."
                    ),
                    other => report_failure(&from, &other),
                }
            }
        }
        Command::AddHost(host) => {
            for (peer, err) in manager.broadcast_add_host(&host).await {
                report_failure(&peer, &err);
            }
        }
        Command::RemoveHost(host) => {
            for (peer, err) in manager.broadcast_remove_host(&host).await {
                match err {
                    ManagerError::HostNotFound(_) => println!("Host not found!"),
                    other => report_failure(&peer, &other),
                }
            }
        }
        Command::ListHosts => {
            println!("The cluster has the following hosts:");
            for host in manager.hosts().await {
                println!("{}", host);
            }
        }
    }
    true
}

/// Reads commands from `input` until `quit` or end of input.
pub async fn run_shell<R>(input: R, manager: Arc<ProcessManager>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match Command::parse(&line) {
            Ok(command) => {
                if !execute(&manager, command).await {
                    break;
                }
            }
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workloads::WorkloadRegistry;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn parses_control_commands() {
        assert_eq!(Command::parse("  "), Ok(Command::Empty));
        assert_eq!(Command::parse("ps"), Ok(Command::Ps));
        assert_eq!(
            Command::parse("migrate 3 node-a node-b"),
            Ok(Command::Migrate {
                id: 3,
                from: "node-a".into(),
                to: "node-b".into()
            })
        );
        assert_eq!(
            Command::parse("kill 4 node-a"),
            Ok(Command::Kill {
                id: 4,
                from: "node-a".into()
            })
        );
        assert_eq!(
            Command::parse("addhost node-c"),
            Ok(Command::AddHost("node-c".into()))
        );
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn anything_else_is_a_launch_request() {
        assert_eq!(
            Command::parse("CopyFileProcess in.txt out.txt"),
            Ok(Command::Launch {
                kind: "CopyFileProcess".into(),
                args: vec!["in.txt".into(), "out.txt".into()]
            })
        );
    }

    #[test]
    fn malformed_commands_are_rejected() {
        assert_eq!(
            Command::parse("migrate x node-a node-b"),
            Err(ParseError::InvalidId("migrate"))
        );
        assert_eq!(Command::parse("kill 1"), Err(ParseError::Usage("kill")));
        assert_eq!(
            Command::parse("removehost"),
            Err(ParseError::Usage("removehost"))
        );
    }

    #[tokio::test]
    async fn scripted_session_drives_the_manager() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        std::fs::write(&input, vec![b'x'; 100]).unwrap();
        let manager = Arc::new(
            ProcessManager::new("node-a", 0, WorkloadRegistry::with_defaults())
                .with_pace(Duration::from_millis(50)),
        );

        let script = format!(
            "CopyFileProcess {} {}\nNoSuchProcess\nkill 1 node-a\nremovehost node-a\nquit\nCopyFileProcess a b\n",
            input.display(),
            dir.path().join("out").display()
        );
        run_shell(script.as_bytes(), Arc::clone(&manager)).await.unwrap();

        // The copy would still be running had the kill not reached it.
        assert!(manager.list_processes().is_empty());
        assert_eq!(manager.hosts().await, vec!["node-a".to_string()]);
    }
}
