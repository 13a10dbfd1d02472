use std::fmt;
use std::time::{Duration, Instant};

/// A resource did not become available before the deadline.
#[derive(Debug)]
pub struct WaitTimeout {
    pub resource_name: String,
    pub waited: Duration,
    pub last_error: String,
}

impl fmt::Display for WaitTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} not available after {:?}: {}",
            self.resource_name, self.waited, self.last_error
        )
    }
}

impl std::error::Error for WaitTimeout {}

/// Poll `connect` until it succeeds or `timeout` elapses.
///
/// Used by processes that attach to IPC resources created by a peer that may
/// still be starting up.
pub fn wait_for_resource<F, T, E>(
    mut connect: F,
    poll_interval: Duration,
    resource_name: &str,
    timeout: Duration,
) -> Result<T, WaitTimeout>
where
    F: FnMut() -> Result<T, E>,
    E: fmt::Display,
{
    let start = Instant::now();
    loop {
        match connect() {
            Ok(resource) => {
                tracing::info!("{} connected", resource_name);
                return Ok(resource);
            }
            Err(e) => {
                if start.elapsed() >= timeout {
                    return Err(WaitTimeout {
                        resource_name: resource_name.to_string(),
                        waited: start.elapsed(),
                        last_error: e.to_string(),
                    });
                }
                tracing::debug!("Waiting for {} ({})", resource_name, e);
                std::thread::sleep(poll_interval);
            }
        }
    }
}
