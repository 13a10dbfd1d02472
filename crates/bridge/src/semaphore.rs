use nix::errno::Errno;
use nix::libc;
use std::ffi::CString;
use std::os::raw::c_int;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SemaphoreError {
    #[error("Semaphore system call failed: {0}")]
    Os(#[from] Errno),
    #[error("Invalid semaphore name")]
    InvalidName,
    #[error("release would exceed capacity {capacity}")]
    OverRelease { capacity: u32 },
}

/// Thin wrapper over a POSIX named semaphore.
pub struct Semaphore {
    sem: *mut libc::sem_t,
}

impl Semaphore {
    /// Create a semaphore that must not already exist.
    pub fn create_exclusive(name: &str, initial_value: u32) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial_value as libc::c_uint,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(Errno::last()));
        }

        Ok(Self { sem })
    }

    pub fn open(name: &str) -> Result<Self, SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        if sem == libc::SEM_FAILED {
            return Err(SemaphoreError::Os(Errno::last()));
        }

        Ok(Self { sem })
    }

    /// Decrement without blocking. `Ok(false)` when the count is zero.
    pub fn try_wait(&self) -> Result<bool, SemaphoreError> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            Ok(true)
        } else {
            let errno = Errno::last();
            if errno == Errno::EAGAIN {
                Ok(false)
            } else {
                Err(SemaphoreError::Os(errno))
            }
        }
    }

    pub fn post(&self) -> Result<(), SemaphoreError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(())
    }

    pub fn value(&self) -> Result<i32, SemaphoreError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(val)
    }

    pub fn unlink(name: &str) -> Result<(), SemaphoreError> {
        let c_name = CString::new(name).map_err(|_| SemaphoreError::InvalidName)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return Err(SemaphoreError::Os(Errno::last()));
        }
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

/// Counting semaphore bounding how many ring slots are in flight.
///
/// The producer acquires, the worker releases. `available + outstanding`
/// always equals `capacity`; a release that would push the count past
/// capacity is refused with `OverRelease`.
pub struct SlotSemaphore {
    sem: Semaphore,
    name: String,
    capacity: u32,
    owner: bool,
}

impl SlotSemaphore {
    /// Create the semaphore with every permit available. A stale semaphore of
    /// the same name is unlinked first.
    pub fn create(name: &str, capacity: u32) -> Result<Self, SemaphoreError> {
        match Semaphore::unlink(name) {
            Ok(()) => tracing::debug!(name, "Removed stale semaphore"),
            Err(SemaphoreError::Os(Errno::ENOENT)) => {}
            Err(e) => return Err(e),
        }
        let sem = Semaphore::create_exclusive(name, capacity)?;
        Ok(Self {
            sem,
            name: name.to_string(),
            capacity,
            owner: true,
        })
    }

    /// Open a semaphore created by another process.
    pub fn open(name: &str, capacity: u32) -> Result<Self, SemaphoreError> {
        let sem = Semaphore::open(name)?;
        Ok(Self {
            sem,
            name: name.to_string(),
            capacity,
            owner: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Claim a permit without blocking.
    pub fn try_acquire(&self) -> Result<bool, SemaphoreError> {
        self.sem.try_wait()
    }

    /// Return one permit.
    ///
    /// The capacity check and the post are two syscalls, so two racing
    /// over-releases can still slip one past the check. A single releaser
    /// per permit (see [`PermitGuard`]) keeps that window closed.
    pub fn release(&self) -> Result<(), SemaphoreError> {
        let available = self.sem.value()?;
        if available >= self.capacity as i32 {
            tracing::error!(
                name = %self.name,
                capacity = self.capacity,
                "Refusing slot release beyond capacity"
            );
            return Err(SemaphoreError::OverRelease {
                capacity: self.capacity,
            });
        }
        self.sem.post()
    }

    pub fn available(&self) -> Result<u32, SemaphoreError> {
        Ok(self.sem.value()?.max(0) as u32)
    }

    pub fn outstanding(&self) -> Result<u32, SemaphoreError> {
        Ok(self.capacity.saturating_sub(self.available()?))
    }
}

impl Drop for SlotSemaphore {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = Semaphore::unlink(&self.name) {
                tracing::warn!(name = %self.name, error = %e, "Failed to unlink semaphore");
            }
        }
    }
}

/// One granted permit, returned exactly once.
///
/// The worker adopts the permit the producer acquired for a task. Calling
/// [`release`](Self::release) returns it and reports errors; dropping an
/// unreleased guard returns it too and logs any error.
#[must_use = "dropping the guard releases the permit immediately"]
pub struct PermitGuard<'a> {
    sem: &'a SlotSemaphore,
    released: bool,
}

impl<'a> PermitGuard<'a> {
    pub fn adopt(sem: &'a SlotSemaphore) -> Self {
        Self {
            sem,
            released: false,
        }
    }

    /// Acquire a fresh permit, `None` when all are in flight.
    pub fn try_acquire(sem: &'a SlotSemaphore) -> Result<Option<Self>, SemaphoreError> {
        Ok(sem.try_acquire()?.then(|| Self::adopt(sem)))
    }

    pub fn release(mut self) -> Result<(), SemaphoreError> {
        self.released = true;
        self.sem.release()
    }

    /// Keep the permit outstanding; someone else becomes responsible for it.
    pub fn forget(mut self) {
        self.released = true;
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.sem.release() {
                tracing::error!(name = %self.sem.name, error = %e, "Failed to release slot permit on drop");
            }
        }
    }
}
