use std::time::Duration;

use chrono::{DateTime, Utc};

/// Upper bound for a single cooldown extension
const MAX_COOLDOWN_DAYS: i64 = 3650;

/// New cooldown deadline for a host.
///
/// Extends from whichever is later, the current deadline or `now`, so the
/// result is never earlier than `existing` and always at least `now + duration`.
pub fn extend_cooldown(
    existing: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    duration: Duration,
) -> DateTime<Utc> {
    let base = existing.map_or(now, |until| until.max(now));
    base.checked_add_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::days(MAX_COOLDOWN_DAYS))
        .min(chrono::Duration::days(MAX_COOLDOWN_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_cooldown_starts_at_now() {
        let now = Utc::now();
        let until = extend_cooldown(None, now, Duration::from_secs(60));
        assert_eq!(until, now + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_expired_cooldown_extends_from_now() {
        let now = Utc::now();
        let stale = now - chrono::Duration::hours(1);
        let until = extend_cooldown(Some(stale), now, Duration::from_secs(60));
        assert_eq!(until, now + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_active_cooldown_extends_from_existing() {
        let now = Utc::now();
        let existing = now + chrono::Duration::minutes(30);
        let until = extend_cooldown(Some(existing), now, Duration::from_secs(60));
        assert_eq!(until, existing + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_cooldown_never_decreases() {
        let now = Utc::now();
        let durations = [1800u64, 5, 0, 60, 1, 3600];
        let mut current: Option<DateTime<Utc>> = None;
        let mut clock = now;

        for (step, secs) in durations.iter().enumerate() {
            let next = extend_cooldown(current, clock, Duration::from_secs(*secs));
            if let Some(previous) = current {
                assert!(next >= previous, "step {} reduced the cooldown", step);
            }
            assert!(next >= clock + chrono::Duration::seconds(*secs as i64));
            current = Some(next);
            clock += chrono::Duration::seconds(7);
        }
    }

    #[test]
    fn test_huge_duration_is_clamped() {
        let now = Utc::now();
        let until = extend_cooldown(None, now, Duration::from_secs(u64::MAX));
        assert_eq!(until, now + chrono::Duration::days(MAX_COOLDOWN_DAYS));
    }
}
