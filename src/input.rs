//! Sources of operator input for interactive mode.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Where interactive commands come from.
#[async_trait(?Send)]
pub trait OperatorInput {
    /// Next line typed by the operator, or `None` once input is closed.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Lines from standard input.
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl OperatorInput for StdinInput {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

/// A fixed list of lines, for tests and unattended runs.
#[derive(Debug, Default, Clone)]
pub struct QueuedInput {
    lines: VecDeque<String>,
}

impl QueuedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait(?Send)]
impl OperatorInput for QueuedInput {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}
