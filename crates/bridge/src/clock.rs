use nix::time::{ClockId, clock_gettime};

/// Seconds on the system-wide monotonic clock.
///
/// Both processes read the same `CLOCK_MONOTONIC`, so timestamps taken by the
/// producer remain comparable with ones taken in the worker.
pub fn monotonic_seconds() -> f64 {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| ts.tv_sec() as f64 + ts.tv_nsec() as f64 * 1e-9)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let a = monotonic_seconds();
        let b = monotonic_seconds();
        assert!(a > 0.0);
        assert!(b >= a);
    }
}
