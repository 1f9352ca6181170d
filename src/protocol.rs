//! Inter-node wire protocol.
//!
//! Exactly one [`Message`] travels in each direction per connection: a
//! request, then a reply.  A [`Message::Transfer`] is the exception and
//! is never answered.  Every frame is a big-endian `u64` length followed
//! by a JSON payload.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::WireError;
use crate::types::{ProcessId, ProcessImage, ProcessSnapshot};

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAILED: i32 = -1;

/// Largest payload a node accepts in a single frame.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    /// Merge these names into the receiver's host table.
    AddHost { hosts: Vec<String> },
    RemoveHost { host: String },
    /// Ask the receiver to migrate one of its processes to `destination`.
    Migrate { id: ProcessId, destination: String },
    Kill { id: ProcessId },
    ListProcesses,
    Response { status: i32 },
    ProcessList {
        status: i32,
        processes: Vec<ProcessSnapshot>,
    },
    /// A suspended process on its way to a new node.
    Transfer(ProcessImage),
}

impl Message {
    pub fn status(status: i32) -> Self {
        Message::Response { status }
    }
}

pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg)?;
    writer.write_u64(payload.len() as u64).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u64().await?;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Turns a host table entry into a dialable address.
///
/// `name:port` and socket addresses are used as is; a bare name or IP
/// literal gets `default_port`.  IPv6 literals may be bracketed.
pub fn address_of(host: &str, default_port: u16) -> String {
    if host.parse::<SocketAddr>().is_ok() {
        return host.to_string();
    }
    let literal = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => host.to_string(),
        _ => format!("{}:{}", host, default_port),
    }
}

/// Sends one request to `host` and waits for its single reply.
pub async fn request(host: &str, default_port: u16, msg: &Message) -> Result<Message, WireError> {
    let mut stream = TcpStream::connect(address_of(host, default_port)).await?;
    write_message(&mut stream, msg).await?;
    let reply = read_message(&mut stream).await?;
    match reply {
        Message::Response { .. } | Message::ProcessList { .. } => Ok(reply),
        _ => Err(WireError::UnexpectedReply(host.to_string())),
    }
}

/// Ships a suspended process to `host`.  No reply is expected.
pub async fn transfer(host: &str, default_port: u16, image: ProcessImage) -> Result<(), WireError> {
    let mut stream = TcpStream::connect(address_of(host, default_port)).await?;
    write_message(&mut stream, &Message::Transfer(image)).await?;
    stream.shutdown().await?;
    Ok(())
}
