//! OS process runner (`tokio::process`) for the certbot bot.
//!
//! stdout is read lazily, one line per `next_line()` call, so output reaches the
//! chat while certbot is still running. stderr is drained in the background and
//! only its tail is kept, for the error report on a nonzero exit.

use std::{collections::VecDeque, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    sync::Mutex,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use cbb_core::{
    errors::Error,
    process::{decode_line, Invocation, LineStream, ProcessRunner},
    Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;
/// How long to wait for stderr to close after the child exited. A daemonized
/// grandchild can hold the pipe open indefinitely.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawns real child processes.
#[derive(Clone, Debug, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Box<dyn LineStream>> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            warn!(command = %invocation, "failed to spawn: {e}");
            Error::Io(e)
        })?;
        debug!(command = %invocation, pid = child.id(), "spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External(format!("{} stdout was not captured", invocation.program)))?;

        let stderr_tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));

        // Drain stderr in background to avoid blocking on a full pipe.
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match r.read_until(b'\n', &mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                            tail.lock().await.push_line(line);
                        }
                    }
                }
            })
        });

        Ok(Box::new(ChildLines {
            program: invocation.program.clone(),
            child: Some(child),
            reader: Some(BufReader::new(stdout)),
            buf: Vec::new(),
            stderr_tail,
            stderr_task,
        }))
    }
}

/// Line stream over a running child's stdout.
struct ChildLines {
    program: String,
    child: Option<Child>,
    reader: Option<BufReader<ChildStdout>>,
    buf: Vec<u8>,
    stderr_tail: Arc<Mutex<StderrTail>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ChildLines {
    /// Wait for exit once stdout is exhausted. Only a positive exit code is a
    /// failure; a child killed by a signal has no code and ends cleanly.
    async fn finish(&mut self) -> Result<Option<String>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let status = child.wait().await?;
        if let Some(mut task) = self.stderr_task.take() {
            // Usually stderr closes with the child; wait so the tail is complete.
            if timeout(STDERR_DRAIN_TIMEOUT, &mut task).await.is_err() {
                debug!(program = %self.program, "stderr still open after exit, using partial tail");
                task.abort();
            }
        }

        match status.code() {
            Some(code) if code > 0 => {
                let stderr = self.stderr_tail.lock().await.snapshot();
                warn!(program = %self.program, code, "command failed");
                Err(Error::Command {
                    program: self.program.clone(),
                    code,
                    stderr,
                })
            }
            _ => {
                info!(program = %self.program, %status, "command finished");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl LineStream for ChildLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(reader) = self.reader.as_mut() {
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) => self.reader = None,
                Ok(_) => return Ok(Some(decode_line(&self.buf))),
                Err(e) => {
                    self.reader = None;
                    if let Some(mut child) = self.child.take() {
                        if let Err(kill_e) = child.start_kill() {
                            warn!(program = %self.program, "failed to kill after read error: {kill_e}");
                        }
                    }
                    return Err(Error::Io(e));
                }
            }
        }

        self.finish().await
    }
}
