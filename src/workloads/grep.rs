//! Line filter: copies the lines of a file that contain a pattern.

use std::time::Duration;

use async_trait::async_trait;

use super::{cursor_named, Step, Workload};
use crate::error::ProcessError;
use crate::stream::{TransactionalInputStream, TransactionalOutputStream};
use crate::types::StreamCursor;

pub struct GrepProcess {
    query: Vec<u8>,
    input: TransactionalInputStream,
    output: TransactionalOutputStream,
}

impl GrepProcess {
    pub const KIND: &'static str = "GrepProcess";
    const SYNOPSIS: &'static str = "GrepProcess <pattern> <inputFile> <outputFile>";

    pub fn construct(args: &[String]) -> Result<Box<dyn Workload>, ProcessError> {
        match args {
            [query, input, output] => Ok(Box::new(Self {
                query: query.as_bytes().to_vec(),
                input: TransactionalInputStream::new(input.as_str()),
                output: TransactionalOutputStream::new(output.as_str()),
            })),
            _ => Err(ProcessError::InvalidArguments(Self::SYNOPSIS.into())),
        }
    }
}

/// Byte-wise substring test, so lines that are not UTF-8 still match.
fn contains(line: &[u8], query: &[u8]) -> bool {
    query.is_empty() || line.windows(query.len()).any(|window| window == query)
}

#[async_trait]
impl Workload for GrepProcess {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn pace(&self) -> Duration {
        Duration::from_millis(1000)
    }

    async fn step(&mut self) -> Result<Step, ProcessError> {
        let Some(line) = self.input.read_line().await? else {
            return Ok(Step::Finished);
        };
        if contains(&line, &self.query) {
            self.output.write_line(&line).await?;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::LINE_ENDING;
    use tempfile::TempDir;

    #[tokio::test]
    async fn keeps_only_matching_lines() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::write(&input, "apple\nberry\npineapple\n").unwrap();

        let args = vec![
            "apple".to_string(),
            input.to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        ];
        let mut grep = GrepProcess::construct(&args).unwrap();
        while grep.step().await.unwrap() == Step::Continue {}
        grep.close();

        let expected = format!("apple{0}pineapple{0}", LINE_ENDING);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), expected);
    }

    #[test]
    fn empty_pattern_matches_every_line() {
        assert!(contains(b"", b""));
        assert!(contains(b"abc", b""));
        assert!(!contains(b"ab", b"abc"));
    }

    #[tokio::test]
    async fn passes_non_utf8_lines_through_unchanged() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::write(&input, b"caf\xe9 keep\n\xff drop\n").unwrap();

        let args = vec![
            "keep".to_string(),
            input.to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        ];
        let mut grep = GrepProcess::construct(&args).unwrap();
        while grep.step().await.unwrap() == Step::Continue {}
        grep.close();

        let mut expected = b"caf\xe9 keep".to_vec();
        expected.extend_from_slice(LINE_ENDING.as_bytes());
        assert_eq!(std::fs::read(&output).unwrap(), expected);
    }
}
