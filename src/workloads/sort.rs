//! Sorts the characters of every line of a file.

use std::time::Duration;

use async_trait::async_trait;

use super::{cursor_named, Step, Workload};
use crate::error::ProcessError;
use crate::stream::{TransactionalInputStream, TransactionalOutputStream};
use crate::types::StreamCursor;

pub struct SortFileProcess {
    input: TransactionalInputStream,
    output: TransactionalOutputStream,
}

impl SortFileProcess {
    pub const KIND: &'static str = "SortFileProcess";
    const SYNOPSIS: &'static str = "SortFileProcess <inputFile> <outputFile>";

    pub fn construct(args: &[String]) -> Result<Box<dyn Workload>, ProcessError> {
        match args {
            [input, output] => Ok(Box::new(Self {
                input: TransactionalInputStream::new(input.as_str()),
                output: TransactionalOutputStream::new(output.as_str()),
            })),
            _ => Err(ProcessError::InvalidArguments(Self::SYNOPSIS.into())),
        }
    }
}

/// Sorts the characters of a UTF-8 line, or its bytes when it is not UTF-8.
fn sort_chars(line: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(line) {
        Ok(text) => {
            let mut chars: Vec<char> = text.chars().collect();
            chars.sort_unstable();
            chars.into_iter().collect::<String>().into_bytes()
        }
        Err(_) => {
            let mut bytes = line.to_vec();
            bytes.sort_unstable();
            bytes
        }
    }
}

#[async_trait]
impl Workload for SortFileProcess {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn pace(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn step(&mut self) -> Result<Step, ProcessError> {
        let Some(line) = self.input.read_line().await? else {
            return Ok(Step::Finished);
        };
        self.output.write_line(&sort_chars(&line)).await?;
        Ok(Step::Continue)
    }

    fn migration_pre_process(&mut self) {
        self.input.set_migrated(true);
        self.output.set_migrated(true);
    }

    fn close(&mut self) {
        self.input.close();
        self.output.close();
    }

    fn cursors(&self) -> Vec<StreamCursor> {
        vec![self.input.cursor("input"), self.output.cursor("output")]
    }

    fn restore(&mut self, cursors: &[StreamCursor]) {
        if let Some(cursor) = cursor_named(cursors, "input") {
            self.input.restore(cursor);
        }
        if let Some(cursor) = cursor_named(cursors, "output") {
            self.output.restore(cursor);
        }
    }
}
