use std::time::{Duration, Instant};

/// What the idle collector should do with one relay on a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// At least one client is bridged; counts as activity right now
    InUse,
    /// No clients, but still inside the idle window
    Idle,
    /// No clients for longer than the idle window
    Expired,
}

pub fn idle_verdict(
    active_clients: usize,
    last_activity: Instant,
    now: Instant,
    idle_timeout: Duration,
) -> IdleVerdict {
    if active_clients > 0 {
        return IdleVerdict::InUse;
    }

    if now.saturating_duration_since(last_activity) > idle_timeout {
        IdleVerdict::Expired
    } else {
        IdleVerdict::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(15 * 60);

    #[test]
    fn test_connected_relay_is_never_expired() {
        let start = Instant::now();
        let now = start + Duration::from_secs(24 * 3600);
        assert_eq!(idle_verdict(1, start, now, TIMEOUT), IdleVerdict::InUse);
    }

    #[test]
    fn test_expiry_boundary() {
        let start = Instant::now();
        assert_eq!(idle_verdict(0, start, start + TIMEOUT, TIMEOUT), IdleVerdict::Idle);
        assert_eq!(
            idle_verdict(0, start, start + TIMEOUT + Duration::from_secs(1), TIMEOUT),
            IdleVerdict::Expired
        );
    }

    #[test]
    fn test_activity_in_future_is_idle() {
        // Activity stamped after `now` (clock read ordering) counts as fresh
        let now = Instant::now();
        let later = now + Duration::from_secs(5);
        assert_eq!(idle_verdict(0, later, now, TIMEOUT), IdleVerdict::Idle);
    }
}
