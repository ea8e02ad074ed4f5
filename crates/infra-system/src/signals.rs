// Signal delivery by PID (ADR-002)
// SIGTERM escalates to SIGKILL after the graceful timeout

use std::time::Duration;
use streamvault_core::application::constants::{GRACEFUL_SHUTDOWN_TIMEOUT_MS, KILL_POLL_INTERVAL};
use streamvault_core::port::{ExecutionError, Signal};
use tracing::{info, warn};

/// True if a process with `pid` exists
pub(crate) fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 checks if process exists without actually sending a signal
        kill(Pid::from_raw(raw), None).is_ok()
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|output| String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

/// Deliver one signal, no waiting
pub(crate) fn send(pid: u32, signal: Signal) -> Result<(), ExecutionError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal as NixSignal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| ExecutionError::Killed(format!("invalid pid {}", pid)))?;
        let nix_signal = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
            Signal::Int => NixSignal::SIGINT,
        };
        kill(Pid::from_raw(raw), nix_signal)
            .map_err(|e| ExecutionError::Killed(format!("{} failed: {}", signal, e)))
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        // No signals on Windows: every kill is forced
        let output = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()
            .map_err(|e| ExecutionError::Killed(e.to_string()))?;

        if !output.status.success() {
            return Err(ExecutionError::Killed(format!(
                "taskkill failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let _ = signal;
        Ok(())
    }
}

/// Deliver `signal`; for SIGTERM wait until `still_running` turns false,
/// then force SIGKILL once the graceful timeout has passed
pub(crate) async fn kill_graceful(
    pid: u32,
    signal: Signal,
    still_running: impl Fn() -> bool,
) -> Result<(), ExecutionError> {
    info!(pid = pid, signal = %signal, "Sending signal");
    send(pid, signal)?;

    if signal != Signal::Term {
        return Ok(());
    }

    let deadline = tokio::time::Instant::now() + Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS as u64);
    loop {
        tokio::time::sleep(KILL_POLL_INTERVAL).await;

        if !still_running() {
            info!(pid = pid, "Process exited gracefully after SIGTERM");
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            warn!(pid = pid, "Process did not exit after SIGTERM, sending SIGKILL");
            return send(pid, Signal::Kill);
        }
    }
}
