//! Transactional file streams.
//!
//! A stream remembers the byte offset just past the last unit it moved
//! and nothing else.  The open handle is a cache: it is (re)opened and
//! seeked to the stored offset whenever none is open or the stream was
//! flagged as migrated, which lets a process pick up its I/O on another
//! node with a fresh handle.

use std::io::{self, SeekFrom};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};

use crate::types::StreamCursor;

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// Resumable reader over a named file.
#[derive(Debug)]
pub struct TransactionalInputStream {
    path: String,
    offset: u64,
    migrated: bool,
    reader: Option<BufReader<File>>,
}

impl TransactionalInputStream {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            migrated: false,
            reader: None,
        }
    }

    pub fn set_migrated(&mut self, migrated: bool) {
        self.migrated = migrated;
    }

    pub fn cursor(&self, name: &str) -> StreamCursor {
        StreamCursor {
            name: name.to_string(),
            path: self.path.clone(),
            offset: self.offset,
            migrated: self.migrated,
        }
    }

    /// Loads a cursor captured on another node.  The next read reopens.
    pub fn restore(&mut self, cursor: &StreamCursor) {
        self.path = cursor.path.clone();
        self.offset = cursor.offset;
        self.migrated = cursor.migrated;
        self.reader = None;
    }

    async fn reader(&mut self) -> io::Result<&mut BufReader<File>> {
        let reader = match self.reader.take() {
            Some(reader) if !self.migrated => reader,
            _ => {
                let mut file = File::open(&self.path).await?;
                file.seek(SeekFrom::Start(self.offset)).await?;
                BufReader::new(file)
            }
        };
        self.migrated = false;
        Ok(self.reader.insert(reader))
    }

    /// Reads one byte.  `Ok(None)` marks end of input.
    pub async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        let n = self.reader().await?.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        self.offset += 1;
        Ok(Some(buf[0]))
    }

    /// Reads one line without its terminator.  `Ok(None)` marks end of input.
    ///
    /// A line ends at `\n`, `\r` or `\r\n`.  The bytes are returned as they
    /// appear in the file.
    pub async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let reader = self.reader().await?;
        let mut line = Vec::new();
        let mut consumed = 0usize;
        let mut after_cr = false;
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            if after_cr {
                if available[0] == b'\n' {
                    reader.consume(1);
                    consumed += 1;
                }
                break;
            }
            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(i) => {
                    let terminator = available[i];
                    line.extend_from_slice(&available[..i]);
                    reader.consume(i + 1);
                    consumed += i + 1;
                    if terminator == b'\n' {
                        break;
                    }
                    after_cr = true;
                }
                None => {
                    let n = available.len();
                    line.extend_from_slice(available);
                    reader.consume(n);
                    consumed += n;
                }
            }
        }
        if consumed == 0 {
            return Ok(None);
        }
        // The offset counts the raw bytes, terminator included.
        self.offset += consumed as u64;
        Ok(Some(line))
    }

    pub fn close(&mut self) {
        self.reader = None;
    }
}

/// Resumable writer over a named file.
#[derive(Debug)]
pub struct TransactionalOutputStream {
    path: String,
    offset: u64,
    migrated: bool,
    writer: Option<File>,
}

impl TransactionalOutputStream {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            migrated: false,
            writer: None,
        }
    }

    pub fn set_migrated(&mut self, migrated: bool) {
        self.migrated = migrated;
    }

    pub fn cursor(&self, name: &str) -> StreamCursor {
        StreamCursor {
            name: name.to_string(),
            path: self.path.clone(),
            offset: self.offset,
            migrated: self.migrated,
        }
    }

    pub fn restore(&mut self, cursor: &StreamCursor) {
        self.path = cursor.path.clone();
        self.offset = cursor.offset;
        self.migrated = cursor.migrated;
        self.writer = None;
    }

    async fn writer(&mut self) -> io::Result<&mut File> {
        let writer = match self.writer.take() {
            Some(writer) if !self.migrated => writer,
            _ => {
                // Never truncate: a resumed process continues at `offset`.
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&self.path)
                    .await?;
                file.seek(SeekFrom::Start(self.offset)).await?;
                file
            }
        };
        self.migrated = false;
        Ok(self.writer.insert(writer))
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self.writer().await?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    pub async fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte]).await
    }

    /// Writes `line` followed by the platform line terminator.
    pub async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + LINE_ENDING.len());
        bytes.extend_from_slice(line);
        bytes.extend_from_slice(LINE_ENDING.as_bytes());
        self.write_all(&bytes).await
    }

    pub fn close(&mut self) {
        self.writer = None;
    }
}
