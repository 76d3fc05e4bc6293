//! Reconnection backoff policy.

use std::time::Duration;

/// Clean disconnect initiated by this side.
pub const DISCONNECT_CAUSE_NORMAL: u8 = 0;

/// Transport-level failure (includes connect timeouts).
pub const DISCONNECT_CAUSE_TRANSPORT: u8 = 1;

/// Credential rejection. The broker drops connections it does not authorize;
/// retrying quickly wastes the connection slot and risks server-side
/// throttling, so this cause carries an extra fixed cooldown.
pub const DISCONNECT_CAUSE_NOT_AUTHORIZED: u8 = 7;

/// Consecutive-disconnect counter cap.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 32;

/// Backoff policy for reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for the exponential curve.
    pub base: Duration,
    /// Upper bound on the exponential delay.
    pub max: Duration,
    /// Fixed cooldown after a not-authorized disconnect.
    pub not_authorized_cooldown: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            not_authorized_cooldown: Duration::from_secs(120),
        }
    }
}

impl BackoffPolicy {
    /// Remaining wait before the next connect attempt may start.
    ///
    /// `attempts` is the consecutive abnormal-disconnect count, `cause` the
    /// last disconnect cause, and `elapsed` the time since that disconnect.
    /// A normal disconnect (or none at all) waits nothing. The not-authorized
    /// cooldown applies on top of the exponential curve regardless of the
    /// attempt count.
    pub fn wait_before_connect(
        &self,
        attempts: u32,
        cause: u8,
        elapsed: Option<Duration>,
    ) -> Duration {
        let Some(elapsed) = elapsed else {
            return Duration::ZERO;
        };
        if cause == DISCONNECT_CAUSE_NORMAL {
            return Duration::ZERO;
        }

        let backoff = self.exponential(attempts);
        let mut wait = backoff.saturating_sub(elapsed);

        if cause == DISCONNECT_CAUSE_NOT_AUTHORIZED {
            let cooldown = self.not_authorized_cooldown.saturating_sub(elapsed);
            wait = wait.max(cooldown);
        }

        wait
    }

    fn exponential(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let secs = self
            .base
            .as_secs()
            .saturating_mul(1u64 << exponent)
            .min(self.max.as_secs());
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_abnormal_disconnect_waits_four_seconds() {
        let policy = BackoffPolicy::default();
        let wait = policy.wait_before_connect(3, DISCONNECT_CAUSE_TRANSPORT, Some(Duration::ZERO));
        assert_eq!(wait, Duration::from_secs(4));
    }

    #[test]
    fn test_not_authorized_cooldown_dominates() {
        let policy = BackoffPolicy::default();
        let wait = policy.wait_before_connect(
            1,
            DISCONNECT_CAUSE_NOT_AUTHORIZED,
            Some(Duration::from_secs(10)),
        );
        assert_eq!(wait, Duration::from_secs(110));
    }

    #[test]
    fn test_not_authorized_cooldown_is_a_floor() {
        let policy = BackoffPolicy::default();
        // The cooldown applies whatever the attempt count says.
        for attempts in [1, 3, 5] {
            let wait = policy.wait_before_connect(
                attempts,
                DISCONNECT_CAUSE_NOT_AUTHORIZED,
                Some(Duration::from_secs(10)),
            );
            assert_eq!(wait, Duration::from_secs(110));
        }

        // A longer exponential remainder still applies on top of it.
        let wait = policy.wait_before_connect(
            32,
            DISCONNECT_CAUSE_NOT_AUTHORIZED,
            Some(Duration::from_secs(10)),
        );
        assert_eq!(wait, Duration::from_secs(290));

        let wait = policy.wait_before_connect(
            1,
            DISCONNECT_CAUSE_NOT_AUTHORIZED,
            Some(Duration::from_secs(119)),
        );
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn test_normal_disconnect_waits_nothing() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.wait_before_connect(5, DISCONNECT_CAUSE_NORMAL, Some(Duration::ZERO)),
            Duration::ZERO
        );
        assert_eq!(policy.wait_before_connect(5, DISCONNECT_CAUSE_TRANSPORT, None), Duration::ZERO);
    }

    #[test]
    fn test_elapsed_beyond_backoff() {
        let policy = BackoffPolicy::default();
        let wait = policy.wait_before_connect(
            3,
            DISCONNECT_CAUSE_TRANSPORT,
            Some(Duration::from_secs(60)),
        );
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn test_exponential_cap() {
        let policy = BackoffPolicy::default();
        let wait =
            policy.wait_before_connect(32, DISCONNECT_CAUSE_TRANSPORT, Some(Duration::ZERO));
        assert_eq!(wait, Duration::from_secs(300));
    }
}
