//! Retry policy tests: exact exponential delays, deterministic trigger
//! identifiers, and idempotent deferred registration.

use std::time::Duration;

use billrun_core::scheduler::{
    deferred_trigger_id, retry_delay, InMemoryTriggerRegistry, TriggerError, TriggerRegistry,
};
use chrono::Utc;
use proptest::prelude::*;

#[test]
fn five_minute_base_yields_5_10_20_40() {
    let base = Duration::from_secs(5 * 60);
    assert_eq!(retry_delay(base, 0), Duration::from_secs(5 * 60));
    assert_eq!(retry_delay(base, 1), Duration::from_secs(10 * 60));
    assert_eq!(retry_delay(base, 2), Duration::from_secs(20 * 60));
    assert_eq!(retry_delay(base, 3), Duration::from_secs(40 * 60));
}

proptest! {
    /// delay(n) == base * 2^n exactly, for any sane base and attempt.
    #[test]
    fn delay_is_exact_power_of_two(base_seconds in 1u64..=86_400, n in 0i32..=20) {
        let base = Duration::from_secs(base_seconds);
        let expected = base_seconds * (1u64 << n as u32);
        prop_assert_eq!(retry_delay(base, n), Duration::from_secs(expected));
    }

    /// Each attempt's delay is exactly double the previous attempt's.
    #[test]
    fn delay_doubles_between_attempts(base_seconds in 1u64..=86_400, n in 0i32..=19) {
        let base = Duration::from_secs(base_seconds);
        prop_assert_eq!(
            retry_delay(base, n + 1).as_secs(),
            retry_delay(base, n).as_secs() * 2
        );
    }

    /// Trigger ids collide exactly when (schedule, attempt) collide.
    #[test]
    fn trigger_ids_are_collision_free(
        a in 1i64..=100_000, b in 1i64..=100_000,
        m in 1i32..=50, n in 1i32..=50
    ) {
        let same = a == b && m == n;
        prop_assert_eq!(
            deferred_trigger_id(a, m) == deferred_trigger_id(b, n),
            same
        );
    }
}

#[tokio::test]
async fn reregistration_under_the_same_id_is_detectable_and_idempotent() {
    let registry = InMemoryTriggerRegistry::new();
    let fire_at = Utc::now() + chrono::Duration::minutes(10);
    let trigger_id = deferred_trigger_id(42, 1);

    registry
        .register_deferred(&trigger_id, 42, fire_at)
        .await
        .expect("first registration succeeds");

    // A retried scheduling operation lands on the same deterministic id;
    // the registry reports AlreadyExists rather than silently duplicating.
    let second = registry.register_deferred(&trigger_id, 42, fire_at).await;
    assert!(matches!(second, Err(TriggerError::AlreadyExists { .. })));
    assert_eq!(registry.deferred_count(), 1);
}

#[test]
fn distinct_attempts_register_distinct_triggers() {
    tokio_test::block_on(async {
        let registry = InMemoryTriggerRegistry::new();
        let fire_at = Utc::now() + chrono::Duration::minutes(5);

        for attempt in 1..=3 {
            registry
                .register_deferred(&deferred_trigger_id(7, attempt), 7, fire_at)
                .await
                .expect("registration succeeds");
        }
        assert_eq!(registry.deferred_count(), 3);
    });
}
