use anyhow::Context;
use bridge::paths::{PARENT_PID_ENV, SESSION_ENV};
use bridge::{ControlMode, TaskMessage, TaskSender, WorkerControl};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const EXIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStop {
    /// Exited on its own, or after the cooperative stop.
    Exited(ExitStatus),
    /// Did not stop within the timeout and was killed.
    Killed,
    NotRunning,
}

/// Owns the tracking worker process.
pub struct WorkerSupervisor {
    program: PathBuf,
    args: Vec<OsString>,
    session: u32,
    control: WorkerControl,
    tasks: Arc<TaskSender>,
    stop_timeout: Duration,
    child: Option<Child>,
}

impl WorkerSupervisor {
    pub fn new(
        program: PathBuf,
        session: u32,
        control: WorkerControl,
        tasks: Arc<TaskSender>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            program,
            args: Vec::new(),
            session,
            control,
            tasks,
            stop_timeout,
            child: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Start the worker. The session id and our pid travel in its
    /// environment; logging settings are inherited.
    pub fn spawn(&mut self) -> anyhow::Result<u32> {
        if let Some(pid) = self.pid() {
            anyhow::bail!("worker already running as pid {pid}");
        }
        self.control.set_mode(ControlMode::Run);
        let child = Command::new(&self.program)
            .args(&self.args)
            .env(SESSION_ENV, self.session.to_string())
            .env(PARENT_PID_ENV, std::process::id().to_string())
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn worker {}", self.program.display()))?;
        let pid = child.id();
        tracing::info!(pid, program = %self.program.display(), "Tracking worker spawned");
        self.child = Some(child);
        Ok(pid)
    }

    /// Exit status if the worker has exited since the last call.
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll worker");
                None
            }
        }
    }

    /// Cooperative stop (control byte plus shutdown sentinel), escalating to
    /// a kill after the stop timeout.
    pub fn stop(&mut self) -> WorkerStop {
        let Some(mut child) = self.child.take() else {
            return WorkerStop::NotRunning;
        };
        self.control.request_stop();
        match self.tasks.try_send(&TaskMessage::Shutdown) {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Task queue full, relying on the stop flag"),
            Err(e) => tracing::warn!(error = %e, "Failed to send shutdown sentinel"),
        }

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(status = %status, "Tracking worker exited");
                    return WorkerStop::Exited(status);
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll worker");
                    break;
                }
            }
        }

        tracing::warn!(
            pid = child.id(),
            timeout = ?self.stop_timeout,
            "Tracking worker did not stop in time, killing it"
        );
        if let Err(e) = child.kill() {
            tracing::warn!(error = %e, "Failed to kill worker");
        }
        if let Err(e) = child.wait() {
            tracing::warn!(error = %e, "Failed to reap worker");
        }
        WorkerStop::Killed
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.stop();
        }
    }
}
