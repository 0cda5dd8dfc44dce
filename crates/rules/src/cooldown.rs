//! Notification gating: mute windows and cooldown.
//!
//! Both read persisted columns (`is_muted`, `muted_until`,
//! `last_notified_at`) so a restarted process keeps suppressing.

use cadence_core::model::{Alert, AlertState};
use chrono::{DateTime, Utc};

/// Muted with no end, or with an end still in the future.
pub fn mute_active(alert: &Alert, now: DateTime<Utc>) -> bool {
    alert.is_muted && alert.muted_until.map_or(true, |until| now < until)
}

/// A mute with an end time that has been reached.
pub fn mute_expired(alert: &Alert, now: DateTime<Utc>) -> bool {
    alert.is_muted && alert.muted_until.is_some_and(|until| now >= until)
}

/// True iff the alert is active, not muted, the evaluation left it in
/// TRIGGERED, and at least `cooldown` has passed since the last
/// notification.
pub fn can_send_notification(alert: &Alert, state_after: AlertState, now: DateTime<Utc>) -> bool {
    if !alert.is_active || mute_active(alert, now) || state_after != AlertState::Triggered {
        return false;
    }
    match alert.last_notified_at {
        Some(last) => now - last >= alert.cooldown(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::alert;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_trigger_sends() {
        let a = alert();
        assert!(can_send_notification(&a, AlertState::Triggered, t0()));
        assert!(!can_send_notification(&a, AlertState::Ok, t0()));
        assert!(!can_send_notification(&a, AlertState::Acknowledged, t0()));
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let mut a = alert();
        a.cooldown_minutes = 10;
        a.last_notified_at = Some(t0());
        let at = |m| t0() + Duration::minutes(m);
        assert!(!can_send_notification(&a, AlertState::Triggered, at(5)));
        assert!(!can_send_notification(&a, AlertState::Triggered, at(10) - Duration::seconds(1)));
        assert!(can_send_notification(&a, AlertState::Triggered, at(10)));
    }

    #[test]
    fn non_positive_cooldown_uses_default() {
        let mut a = alert();
        a.cooldown_minutes = 0;
        a.last_notified_at = Some(t0());
        assert!(!can_send_notification(&a, AlertState::Triggered, t0() + Duration::minutes(4)));
        assert!(can_send_notification(&a, AlertState::Triggered, t0() + Duration::minutes(5)));
    }

    #[test]
    fn mute_suppresses_until_it_expires() {
        let mut a = alert();
        a.is_muted = true;
        assert!(mute_active(&a, t0()));
        assert!(!mute_expired(&a, t0()));
        assert!(!can_send_notification(&a, AlertState::Triggered, t0()));

        a.muted_until = Some(t0() + Duration::minutes(30));
        assert!(mute_active(&a, t0()));
        assert!(mute_expired(&a, t0() + Duration::minutes(30)));
        assert!(can_send_notification(&a, AlertState::Triggered, t0() + Duration::minutes(31)));
    }

    #[test]
    fn inactive_alerts_never_notify() {
        let mut a = alert();
        a.is_active = false;
        assert!(!can_send_notification(&a, AlertState::Triggered, t0()));
    }
}
