use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{Pid, getppid};
use std::time::{Duration, Instant};

/// Detects that the process which spawned the worker has gone away.
///
/// Two checks: our parent pid must still be the recorded one (a dead parent
/// gets us re-parented), and the recorded pid must still exist.
pub struct ParentWatchdog {
    parent: Pid,
    interval: Duration,
    last_check: Option<Instant>,
    alive: bool,
}

impl ParentWatchdog {
    pub fn new(parent_pid: i32, interval: Duration) -> Self {
        Self {
            parent: Pid::from_raw(parent_pid),
            interval,
            last_check: None,
            alive: true,
        }
    }

    pub fn parent(&self) -> Pid {
        self.parent
    }

    /// Cached result, refreshed at most once per interval.
    pub fn parent_alive(&mut self) -> bool {
        let due = self
            .last_check
            .is_none_or(|at| at.elapsed() >= self.interval);
        if due {
            self.alive = self.check_now();
            self.last_check = Some(Instant::now());
        }
        self.alive
    }

    pub fn check_now(&self) -> bool {
        if getppid() != self.parent {
            return false;
        }
        !matches!(kill(self.parent, None), Err(Errno::ESRCH))
    }
}
