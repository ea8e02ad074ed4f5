// Process Ports (ADR-002)
// Spawning, observing and killing external tools (capture, remux, probe)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(i64),

    #[error("Process kill failed: {0}")]
    Killed(String),

    #[error("Process listing failed: {0}")]
    Listing(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Signal delivered by `kill`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGINT")]
    Int,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Term => write!(f, "SIGTERM"),
            Signal::Kill => write!(f, "SIGKILL"),
            Signal::Int => write!(f, "SIGINT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// One line of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

impl OutputLine {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            line: line.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            line: line.into(),
        }
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
    /// The runtime lost track of the process
    Failed(String),
}

/// What to run
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub bin: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(bin: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            bin: bin.into(),
            args,
            ..Default::default()
        }
    }

    /// `$ bin arg1 arg2` as written to job logs
    pub fn command_line(&self) -> String {
        let mut line = format!("$ {}", self.bin);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// A spawned process: live handle, merged output, exit notification
pub struct LaunchedProcess {
    pub handle: Arc<dyn ProcessHandle>,
    pub output: mpsc::Receiver<OutputLine>,
    pub exit: oneshot::Receiver<ProcessExit>,
}

/// Live handle to a child process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// False once the process has exited
    fn is_running(&self) -> bool;

    async fn kill(&self, signal: Signal) -> Result<(), ExecutionError>;
}

/// Spawns external tools
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// # Errors
    /// - ExecutionError::SpawnFailed if the binary cannot be started
    async fn spawn(&self, spec: &ProcessSpec) -> Result<LaunchedProcess, ExecutionError>;
}

/// Result of looking up a PID in the OS process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessListing {
    pub running: bool,
    /// Raw listing output (`ps -p` / `tasklist`), used for binary-name checks
    pub output: String,
}

/// OS process table access for processes we hold no handle to
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    /// Look up `pid` with the platform listing command
    async fn inspect(&self, pid: u32) -> Result<ProcessListing, ExecutionError>;

    /// Kill by PID. SIGTERM escalates to SIGKILL after a grace period.
    async fn kill(&self, pid: u32, signal: Signal) -> Result<(), ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type SpawnEffect = Arc<dyn Fn(&ProcessSpec) + Send + Sync>;

    /// Scripted behaviour for one spawn
    #[derive(Clone)]
    pub struct Script {
        lines: Vec<OutputLine>,
        exit: ProcessExit,
        run_for: Duration,
        until_killed: bool,
        effect: Option<SpawnEffect>,
    }

    impl Script {
        /// Emit `lines`, then exit with `code`
        pub fn exits(code: i32, lines: Vec<OutputLine>) -> Self {
            Self {
                lines,
                exit: ProcessExit::Exited(Some(code)),
                run_for: Duration::ZERO,
                until_killed: false,
                effect: None,
            }
        }

        /// Emit `lines`, then keep running until killed
        pub fn until_killed(lines: Vec<OutputLine>) -> Self {
            Self {
                until_killed: true,
                ..Self::exits(0, lines)
            }
        }

        /// Stay alive for `duration` after the last line
        pub fn running_for(mut self, duration: Duration) -> Self {
            self.run_for = duration;
            self
        }

        /// Run `effect` with the spawn spec (e.g. create the output file)
        pub fn with_effect(mut self, effect: impl Fn(&ProcessSpec) + Send + Sync + 'static) -> Self {
            self.effect = Some(Arc::new(effect));
            self
        }
    }

    struct MockHandleState {
        pid: u32,
        running: AtomicBool,
        exit_tx: Mutex<Option<oneshot::Sender<ProcessExit>>>,
        kills: Mutex<Vec<Signal>>,
    }

    /// Handle returned by `ScriptedLauncher`
    pub struct MockProcessHandle {
        state: Arc<MockHandleState>,
    }

    impl MockProcessHandle {
        fn finish(state: &MockHandleState, exit: ProcessExit) {
            state.running.store(false, Ordering::SeqCst);
            if let Some(tx) = state.exit_tx.lock().unwrap().take() {
                let _ = tx.send(exit);
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for MockProcessHandle {
        fn pid(&self) -> Option<u32> {
            Some(self.state.pid)
        }

        fn is_running(&self) -> bool {
            self.state.running.load(Ordering::SeqCst)
        }

        async fn kill(&self, signal: Signal) -> Result<(), ExecutionError> {
            self.state.kills.lock().unwrap().push(signal);
            Self::finish(&self.state, ProcessExit::Exited(None));
            Ok(())
        }
    }

    /// Launcher that plays back scripts in order; the last script repeats
    pub struct ScriptedLauncher {
        scripts: Mutex<VecDeque<Script>>,
        last: Mutex<Option<Script>>,
        spawned: Mutex<Vec<ProcessSpec>>,
        handles: Mutex<Vec<Arc<MockHandleState>>>,
        next_pid: AtomicU32,
        fail_spawn: AtomicBool,
    }

    impl ScriptedLauncher {
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                last: Mutex::new(None),
                spawned: Mutex::new(Vec::new()),
                handles: Mutex::new(Vec::new()),
                next_pid: AtomicU32::new(40_000),
                fail_spawn: AtomicBool::new(false),
            }
        }

        pub fn failing() -> Self {
            let launcher = Self::new(Vec::new());
            launcher.fail_spawn.store(true, Ordering::SeqCst);
            launcher
        }

        pub fn spawned(&self) -> Vec<ProcessSpec> {
            self.spawned.lock().unwrap().clone()
        }

        pub fn spawn_count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }

        /// Signals delivered through handles, in spawn order
        pub fn kill_signals(&self) -> Vec<Signal> {
            self.handles
                .lock()
                .unwrap()
                .iter()
                .flat_map(|h| h.kills.lock().unwrap().clone())
                .collect()
        }

        fn next_script(&self) -> Option<Script> {
            let mut scripts = self.scripts.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match scripts.pop_front() {
                Some(script) => {
                    *last = Some(script.clone());
                    Some(script)
                }
                None => last.clone(),
            }
        }
    }

    #[async_trait]
    impl ProcessLauncher for ScriptedLauncher {
        async fn spawn(&self, spec: &ProcessSpec) -> Result<LaunchedProcess, ExecutionError> {
            if self.fail_spawn.load(Ordering::SeqCst) {
                return Err(ExecutionError::SpawnFailed(format!("{}: not found", spec.bin)));
            }
            self.spawned.lock().unwrap().push(spec.clone());

            let script = self
                .next_script()
                .unwrap_or_else(|| Script::exits(0, Vec::new()));
            if let Some(effect) = &script.effect {
                effect(spec);
            }

            let (out_tx, out_rx) = mpsc::channel(64);
            let (exit_tx, exit_rx) = oneshot::channel();
            let state = Arc::new(MockHandleState {
                pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
                running: AtomicBool::new(true),
                exit_tx: Mutex::new(Some(exit_tx)),
                kills: Mutex::new(Vec::new()),
            });

            self.handles.lock().unwrap().push(state.clone());

            let task_state = state.clone();
            tokio::spawn(async move {
                for line in script.lines {
                    if out_tx.send(line).await.is_err() {
                        break;
                    }
                }
                if !script.run_for.is_zero() {
                    tokio::time::sleep(script.run_for).await;
                }
                if !script.until_killed {
                    MockProcessHandle::finish(&task_state, script.exit);
                }
            });

            Ok(LaunchedProcess {
                handle: Arc::new(MockProcessHandle { state }),
                output: out_rx,
                exit: exit_rx,
            })
        }
    }

    /// Fake OS process table
    pub struct FakeProcessProbe {
        alive: Mutex<HashSet<u32>>,
        names: Mutex<HashMap<u32, String>>,
        kills: Mutex<Vec<(u32, Signal)>>,
        inspections: AtomicU32,
        delay: Mutex<Option<Duration>>,
        fail: AtomicBool,
    }

    impl FakeProcessProbe {
        pub fn new() -> Self {
            Self {
                alive: Mutex::new(HashSet::new()),
                names: Mutex::new(HashMap::new()),
                kills: Mutex::new(Vec::new()),
                inspections: AtomicU32::new(0),
                delay: Mutex::new(None),
                fail: AtomicBool::new(false),
            }
        }

        pub fn with_process(self, pid: u32, name: &str) -> Self {
            self.alive.lock().unwrap().insert(pid);
            self.names.lock().unwrap().insert(pid, name.to_string());
            self
        }

        /// Make every inspection hang for `delay`
        pub fn with_delay(self, delay: Duration) -> Self {
            *self.delay.lock().unwrap() = Some(delay);
            self
        }

        pub fn failing(self) -> Self {
            self.fail.store(true, Ordering::SeqCst);
            self
        }

        pub fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }

        pub fn kills(&self) -> Vec<(u32, Signal)> {
            self.kills.lock().unwrap().clone()
        }

        pub fn inspection_count(&self) -> u32 {
            self.inspections.load(Ordering::SeqCst)
        }
    }

    impl Default for FakeProcessProbe {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessProbe for FakeProcessProbe {
        async fn inspect(&self, pid: u32) -> Result<ProcessListing, ExecutionError> {
            self.inspections.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ExecutionError::Listing("ps: permission denied".to_string()));
            }

            let running = self.is_alive(pid);
            let output = match self.names.lock().unwrap().get(&pid) {
                Some(name) if running => format!("  PID TTY          TIME CMD\n{pid} ?  00:00:01 {name}\n"),
                _ => "  PID TTY          TIME CMD\n".to_string(),
            };
            Ok(ProcessListing { running, output })
        }

        async fn kill(&self, pid: u32, signal: Signal) -> Result<(), ExecutionError> {
            self.kills.lock().unwrap().push((pid, signal));
            if self.alive.lock().unwrap().remove(&pid) {
                Ok(())
            } else {
                Err(ExecutionError::Killed(format!("no such process: {}", pid)))
            }
        }
    }
}
