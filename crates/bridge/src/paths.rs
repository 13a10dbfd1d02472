//! Centralized IPC naming
//!
//! Every shared memory segment, semaphore and message queue used between the
//! main process and the tracking worker is named here. Names carry a session
//! id (the main process pid) so two pipelines on one host never collide.

use std::path::PathBuf;

/// Directory backing POSIX shared memory on Linux.
pub const SHM_DIR: &str = "/dev/shm";

/// Environment variable carrying the session id to the worker.
pub const SESSION_ENV: &str = "STENTOR_SESSION";

/// Environment variable carrying the parent (main process) pid to the worker.
pub const PARENT_PID_ENV: &str = "STENTOR_PARENT_PID";

/// Number of frame slots in flight between producer and worker.
pub const DEFAULT_RING_CAPACITY: u32 = 3;

/// Depth of the task and result queues. Linux caps unprivileged queues at 10.
pub const TASK_QUEUE_DEPTH: usize = 8;
pub const RESULT_QUEUE_DEPTH: usize = 8;

/// Maximum encoded size of a single queue message.
pub const TASK_MESSAGE_SIZE: usize = 256;
pub const RESULT_MESSAGE_SIZE: usize = 8192;

const DEFAULT_PREFIX: &str = "stentor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcNames {
    pub session: u32,
    pub frame_ring: PathBuf,
    pub mask_ring: PathBuf,
    pub control: PathBuf,
    pub semaphore: String,
    pub task_queue: String,
    pub result_queue: String,
}

impl IpcNames {
    pub fn for_session(session: u32) -> Self {
        Self::with_prefix(DEFAULT_PREFIX, session)
    }

    /// Names under a custom prefix (tests use this to stay isolated).
    pub fn with_prefix(prefix: &str, session: u32) -> Self {
        let shm = |what: &str| PathBuf::from(SHM_DIR).join(format!("{prefix}_{what}_{session}"));
        Self {
            session,
            frame_ring: shm("frames"),
            mask_ring: shm("masks"),
            control: shm("control"),
            semaphore: format!("/{prefix}_slots_{session}"),
            task_queue: format!("/{prefix}_tasks_{session}"),
            result_queue: format!("/{prefix}_results_{session}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_in_dev_shm() {
        let names = IpcNames::for_session(42);
        assert!(names.frame_ring.starts_with(SHM_DIR));
        assert!(names.mask_ring.starts_with(SHM_DIR));
        assert!(names.control.starts_with(SHM_DIR));
        assert_eq!(
            names.frame_ring,
            PathBuf::from("/dev/shm/stentor_frames_42")
        );
    }

    #[test]
    fn test_posix_names_start_with_single_slash() {
        let names = IpcNames::for_session(7);
        for name in [&names.semaphore, &names.task_queue, &names.result_queue] {
            assert!(name.starts_with('/'));
            assert!(!name[1..].contains('/'), "{name} must not nest");
        }
    }

    #[test]
    fn test_sessions_do_not_collide() {
        assert_ne!(IpcNames::for_session(1), IpcNames::for_session(2));
        assert_ne!(
            IpcNames::with_prefix("a", 1).semaphore,
            IpcNames::with_prefix("b", 1).semaphore
        );
    }

    #[test]
    fn test_queue_depths_fit_default_kernel_limits() {
        assert!(TASK_QUEUE_DEPTH <= 10);
        assert!(RESULT_QUEUE_DEPTH <= 10);
        assert!(RESULT_MESSAGE_SIZE <= 8192);
        assert!(TASK_QUEUE_DEPTH > DEFAULT_RING_CAPACITY as usize);
    }
}
