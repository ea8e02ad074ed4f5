// Subprocess launcher (ADR-002)
// reason: tokio::process for async child management with piped output
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use streamvault_core::application::constants::OUTPUT_BUFFER_LINES;
use streamvault_core::port::{
    ExecutionError, LaunchedProcess, OutputLine, OutputStream, ProcessExit, ProcessHandle,
    ProcessLauncher, ProcessSpec, Signal,
};

use crate::signals;

/// Spawns external tools with piped output and environment allowlisting
pub struct SubprocessLauncher {
    env_allowlist: Vec<String>,
}

impl SubprocessLauncher {
    /// # Arguments
    /// * `env_allowlist` - Variables from `ProcessSpec::env` that may reach the child
    ///
    /// # Example
    /// ```ignore
    /// let launcher = SubprocessLauncher::new(vec!["PATH".to_string(), "HOME".to_string()]);
    /// ```
    pub fn new(env_allowlist: Vec<String>) -> Self {
        Self { env_allowlist }
    }

    /// Filter environment variables to allowlist only
    fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for SubprocessLauncher {
    fn default() -> Self {
        Self::new(vec!["PATH".to_string(), "HOME".to_string()])
    }
}

/// Handle to a child owned by the wait task
struct ChildHandle {
    pid: Option<u32>,
    running: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn kill(&self, signal: Signal) -> Result<(), ExecutionError> {
        let pid = self
            .pid
            .ok_or_else(|| ExecutionError::Killed("process has no pid".to_string()))?;
        if !self.is_running() {
            debug!(pid = pid, "Kill requested for exited process");
            return Ok(());
        }
        let running = self.running.clone();
        signals::kill_graceful(pid, signal, move || running.load(Ordering::SeqCst)).await
    }
}

fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(OutputLine { stream, line }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(stream = stream.as_str(), error = %e, "Output stream read failed");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl ProcessLauncher for SubprocessLauncher {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<LaunchedProcess, ExecutionError> {
        let mut command = Command::new(&spec.bin);
        command
            .args(&spec.args)
            .envs(self.filter_env(&spec.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", spec.bin, e)))?;
        let pid = child.id();

        info!(bin = %spec.bin, pid = ?pid, args = ?spec.args, "Process spawned");

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_BUFFER_LINES);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, out_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, out_tx);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (exit_tx, exit_rx) = oneshot::channel();
        let wait_running = running.clone();
        let bin = spec.bin.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::Exited(status.code()),
                Err(e) => {
                    warn!(bin = %bin, pid = ?pid, error = %e, "Waiting for process failed");
                    ProcessExit::Failed(e.to_string())
                }
            };
            wait_running.store(false, Ordering::SeqCst);
            debug!(bin = %bin, pid = ?pid, exit = ?exit, "Process exited");
            let _ = exit_tx.send(exit);
        });

        Ok(LaunchedProcess {
            handle: Arc::new(ChildHandle { pid, running }),
            output: out_rx,
            exit: exit_rx,
        })
    }
}
