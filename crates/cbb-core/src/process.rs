//! Process port: run an external command and pull its output line by line.
//!
//! The OS-backed implementation lives in `cbb-process`; tests use in-memory
//! fakes. Both hand out a [`LineStream`], so callers forward lines as soon as
//! they are read and learn about a nonzero exit only after the last line.

use std::{collections::VecDeque, fmt, sync::Arc};

use async_trait::async_trait;

use crate::Result;

/// A concrete command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `prefix program args...` when a prefix is given, otherwise `program args...`.
    pub fn prefixed(prefix: Option<&str>, program: &str, args: &[&str]) -> Self {
        let mut inv = match prefix {
            Some(p) => Self::new(p).arg(program),
            None => Self::new(program),
        };
        inv.args.extend(args.iter().map(|a| a.to_string()));
        inv
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Lazy, single-pass source of output lines.
///
/// `Ok(Some(line))` for each line in order, `Ok(None)` once exhausted. A
/// failing command returns `Err` after its final line; the stream is finished
/// after the first `Ok(None)` or `Err`.
#[async_trait]
pub trait LineStream: Send {
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Starts external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Spawn `invocation` and return its stdout as a line stream.
    ///
    /// Spawn failures (missing binary, permissions) are returned here as
    /// `Error::Io`. There is no timeout: an unresponsive child blocks the
    /// reader until it exits.
    async fn run(&self, invocation: &Invocation) -> Result<Box<dyn LineStream>>;
}

/// Decode one raw output line.
///
/// Invalid UTF-8 does not abort the stream: the line is replaced by a marker
/// wrapping the decode error.
pub fn decode_line(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.trim().to_string(),
        Err(e) => format!("-----{e}-----"),
    }
}

/// Fixed lines, e.g. a registry result or a usage message.
pub struct StaticLines {
    lines: VecDeque<String>,
}

impl StaticLines {
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

#[async_trait]
impl LineStream for StaticLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Wraps an inner stream with leading and trailing lines.
///
/// Trailing lines are only produced after the inner stream finished cleanly; an
/// inner error is passed through and ends the stream.
pub struct FramedLines {
    leading: VecDeque<String>,
    inner: Option<Box<dyn LineStream>>,
    trailing: VecDeque<String>,
}

impl FramedLines {
    pub fn new(inner: Box<dyn LineStream>) -> Self {
        Self {
            leading: VecDeque::new(),
            inner: Some(inner),
            trailing: VecDeque::new(),
        }
    }

    pub fn leading(mut self, line: impl Into<String>) -> Self {
        self.leading.push_back(line.into());
        self
    }

    pub fn trailing(mut self, line: impl Into<String>) -> Self {
        self.trailing.push_back(line.into());
        self
    }
}

#[async_trait]
impl LineStream for FramedLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.leading.pop_front() {
            return Ok(Some(line));
        }

        if let Some(inner) = self.inner.as_mut() {
            match inner.next_line().await {
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => self.inner = None,
                Err(e) => {
                    self.inner = None;
                    self.trailing.clear();
                    return Err(e);
                }
            }
        }

        Ok(self.trailing.pop_front())
    }
}

/// Starts `invocation` on the first pull instead of up front.
///
/// Lets a caller emit its own lines before the command is launched; a spawn
/// failure then surfaces after them, like any other command failure.
pub struct DeferredRun {
    runner: Option<Arc<dyn ProcessRunner>>,
    invocation: Invocation,
    started: Option<Box<dyn LineStream>>,
}

impl DeferredRun {
    pub fn new(runner: Arc<dyn ProcessRunner>, invocation: Invocation) -> Self {
        Self {
            runner: Some(runner),
            invocation,
            started: None,
        }
    }
}

#[async_trait]
impl LineStream for DeferredRun {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(runner) = self.runner.take() {
            self.started = Some(runner.run(&self.invocation).await?);
        }
        match self.started.as_mut() {
            Some(out) => out.next_line().await,
            None => Ok(None),
        }
    }
}

/// Drain a stream into memory. Only for small outputs (tests, status text).
pub async fn collect_lines(stream: &mut dyn LineStream) -> Result<Vec<String>> {
    let mut out = Vec::new();
    while let Some(line) = stream.next_line().await? {
        out.push(line);
    }
    Ok(out)
}
