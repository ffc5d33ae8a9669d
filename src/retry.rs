//! Retry wrapper around a single connect attempt.
//!
//! The supervisor's `connect` is stateless with respect to retries; all
//! retry policy lives here with the caller.

use std::time::Duration;

use crate::tunnel::supervisor::{ConnectError, Supervisor, TunnelProcess};

/// How often and how eagerly to re-attempt a failed connect.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            delay: Duration::from_secs(2),
        }
    }
}

/// Invoke `connect` up to `retries + 1` times, sleeping between attempts.
pub async fn connect_with_retries(
    supervisor: &Supervisor,
    policy: &RetryPolicy,
) -> Result<TunnelProcess, ConnectError> {
    let attempts = policy.retries.saturating_add(1);

    let mut last_error = None;
    for attempt in 1..=attempts {
        match supervisor.connect().await {
            Ok(tunnel) => return Ok(tunnel),
            Err(err) => {
                log::warn!("Connect attempt {}/{} failed: {}", attempt, attempts, err);
                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ConnectError::Generic("no connect attempt was made".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_retried_and_returned() {
        let supervisor = Supervisor::new(
            crate::Config::default(),
            std::path::PathBuf::from("/nonexistent/sc-binary"),
        )
        .unwrap();
        let policy = RetryPolicy {
            retries: 2,
            delay: Duration::from_millis(1),
        };

        let err = connect_with_retries(&supervisor, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Spawn(_)));
    }
}
