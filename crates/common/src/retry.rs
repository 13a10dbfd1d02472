use std::time::Duration;

/// Retry a function with exponential backoff
///
/// # Arguments
/// * `f` - The function to retry
/// * `max_retries` - Maximum number of attempts (at least one is made)
/// * `base_delay_ms` - Initial delay in milliseconds (doubles each retry)
/// * `operation_name` - Human-readable name for logging
pub fn retry_with_backoff<F, T, E>(
    mut f: F,
    max_retries: u32,
    base_delay_ms: u64,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let attempts = max_retries.max(1);
    let mut attempt = 0;
    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < attempts => {
                let delay_ms = base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    operation_name,
                    attempt + 1,
                    attempts,
                    e,
                    delay_ms
                );
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    "{} failed after {} attempts: {}",
                    operation_name,
                    attempts,
                    e
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(
            || {
                calls += 1;
                if calls < 3 { Err("busy".into()) } else { Ok(calls) }
            },
            5,
            0,
            "test op",
        );
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_backoff(
            || {
                calls += 1;
                Err(format!("failure {}", calls))
            },
            4,
            0,
            "test op",
        );
        assert_eq!(result, Err("failure 4".to_string()));
        assert_eq!(calls, 4);
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        let mut calls = 0;
        let _: Result<(), &str> = retry_with_backoff(
            || {
                calls += 1;
                Err("nope")
            },
            0,
            0,
            "test op",
        );
        assert_eq!(calls, 1);
    }
}
