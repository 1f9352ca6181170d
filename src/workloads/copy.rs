//! Byte-by-byte file copy.

use std::time::Duration;

use async_trait::async_trait;

use super::{cursor_named, Step, Workload};
use crate::error::ProcessError;
use crate::stream::{TransactionalInputStream, TransactionalOutputStream};
use crate::types::StreamCursor;

pub struct CopyFileProcess {
    input: TransactionalInputStream,
    output: TransactionalOutputStream,
}

impl CopyFileProcess {
    pub const KIND: &'static str = "CopyFileProcess";
    const SYNOPSIS: &'static str = "CopyFileProcess <inputFile> <outputFile>";

    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: TransactionalInputStream::new(input),
            output: TransactionalOutputStream::new(output),
        }
    }

    pub fn construct(args: &[String]) -> Result<Box<dyn Workload>, ProcessError> {
        match args {
            [input, output] => Ok(Box::new(Self::new(input.as_str(), output.as_str()))),
            _ => Err(ProcessError::InvalidArguments(Self::SYNOPSIS.into())),
        }
    }
}

#[async_trait]
impl Workload for CopyFileProcess {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn pace(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn step(&mut self) -> Result<Step, ProcessError> {
        match self.input.read_byte().await? {
            Some(byte) => {
                self.output.write_byte(byte).await?;
                Ok(Step::Continue)
            }
            None => Ok(Step::Finished),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn copies_one_byte_per_step() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::write(&input, b"xyz").unwrap();

        let mut copy = CopyFileProcess::new(
            input.to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        );
        assert_eq!(copy.step().await.unwrap(), Step::Continue);
        assert_eq!(std::fs::read(&output).unwrap(), b"x");

        while copy.step().await.unwrap() == Step::Continue {}
        copy.close();
        assert_eq!(std::fs::read(&output).unwrap(), b"xyz");
        assert!(copy.cursors().iter().all(|c| c.offset == 3));
    }
}
