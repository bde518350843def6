//! Trigger registration seam to the external scheduling library.
//!
//! The production deployment binds this trait to the host scheduler; the
//! in-memory implementation backs tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    /// A trigger with this identifier is already registered. Deferred retry
    /// registration treats this as success (the registration is keyed
    /// deterministically, so a duplicate means a prior attempt got through).
    #[error("trigger already exists: {trigger_id}")]
    AlreadyExists { trigger_id: String },

    #[error("trigger not found: {trigger_id}")]
    NotFound { trigger_id: String },

    #[error("trigger registry failure: {0}")]
    Registry(String),
}

#[async_trait]
pub trait TriggerRegistry: Send + Sync {
    /// Register (or refresh) the recurring trigger for a schedule. Must be
    /// idempotent: re-registering an unchanged expression keeps the existing
    /// next fire time, which is what keeps manual runs from shifting it.
    async fn register_cron(
        &self,
        schedule_id: i64,
        expression: &str,
        time_zone: &str,
    ) -> Result<(), TriggerError>;

    async fn unregister_cron(&self, schedule_id: i64) -> Result<(), TriggerError>;

    /// Register a one-shot deferred trigger under a caller-supplied
    /// deterministic identifier.
    async fn register_deferred(
        &self,
        trigger_id: &str,
        schedule_id: i64,
        fire_at: DateTime<Utc>,
    ) -> Result<(), TriggerError>;

    async fn unregister_deferred(&self, trigger_id: &str) -> Result<(), TriggerError>;

    /// Next automatic fire time for a schedule's recurring trigger.
    async fn next_fire_time(&self, schedule_id: i64) -> Result<Option<DateTime<Utc>>, TriggerError>;

    /// Ask the scheduling library to recompute the next automatic fire time
    /// from the registered recurrence expression. Idempotent. Callers invoke
    /// this only after automatic runs; manual triggers must never shift the
    /// next fire time.
    async fn refresh_next_fire(
        &self,
        schedule_id: i64,
    ) -> Result<Option<DateTime<Utc>>, TriggerError>;
}

#[derive(Debug, Clone)]
struct CronEntry {
    expression: String,
    time_zone: String,
    next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DeferredEntry {
    pub schedule_id: i64,
    pub fire_at: DateTime<Utc>,
}

/// Map-backed registry for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryTriggerRegistry {
    crons: DashMap<i64, CronEntry>,
    deferred: DashMap<String, DeferredEntry>,
}

impl InMemoryTriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap control over the advertised next fire time.
    pub fn set_next_fire(&self, schedule_id: i64, next_fire: DateTime<Utc>) {
        if let Some(mut entry) = self.crons.get_mut(&schedule_id) {
            entry.next_fire = Some(next_fire);
        }
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn deferred_entry(&self, trigger_id: &str) -> Option<DeferredEntry> {
        self.deferred.get(trigger_id).map(|e| e.value().clone())
    }

    /// Remove and return deferred triggers due at or before `now`.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<(String, DeferredEntry)> {
        let due: Vec<String> = self
            .deferred
            .iter()
            .filter(|entry| entry.fire_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        due.into_iter()
            .filter_map(|id| self.deferred.remove(&id))
            .collect()
    }
}

#[async_trait]
impl TriggerRegistry for InMemoryTriggerRegistry {
    async fn register_cron(
        &self,
        schedule_id: i64,
        expression: &str,
        time_zone: &str,
    ) -> Result<(), TriggerError> {
        match self.crons.get_mut(&schedule_id) {
            Some(entry) if entry.expression == expression && entry.time_zone == time_zone => {
                // Unchanged registration: keep the computed next fire time.
            }
            Some(mut entry) => {
                entry.expression = expression.to_string();
                entry.time_zone = time_zone.to_string();
                entry.next_fire = None;
            }
            None => {
                self.crons.insert(
                    schedule_id,
                    CronEntry {
                        expression: expression.to_string(),
                        time_zone: time_zone.to_string(),
                        next_fire: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn unregister_cron(&self, schedule_id: i64) -> Result<(), TriggerError> {
        self.crons.remove(&schedule_id);
        Ok(())
    }

    async fn register_deferred(
        &self,
        trigger_id: &str,
        schedule_id: i64,
        fire_at: DateTime<Utc>,
    ) -> Result<(), TriggerError> {
        if self.deferred.contains_key(trigger_id) {
            return Err(TriggerError::AlreadyExists {
                trigger_id: trigger_id.to_string(),
            });
        }
        self.deferred.insert(
            trigger_id.to_string(),
            DeferredEntry {
                schedule_id,
                fire_at,
            },
        );
        Ok(())
    }

    async fn unregister_deferred(&self, trigger_id: &str) -> Result<(), TriggerError> {
        self.deferred
            .remove(trigger_id)
            .map(|_| ())
            .ok_or_else(|| TriggerError::NotFound {
                trigger_id: trigger_id.to_string(),
            })
    }

    async fn next_fire_time(&self, schedule_id: i64) -> Result<Option<DateTime<Utc>>, TriggerError> {
        Ok(self.crons.get(&schedule_id).and_then(|e| e.next_fire))
    }

    async fn refresh_next_fire(
        &self,
        schedule_id: i64,
    ) -> Result<Option<DateTime<Utc>>, TriggerError> {
        // The in-memory registry has no cron evaluator; the advertised next
        // fire time is whatever the host (or a test) installed. Refreshing
        // is a read, which keeps the operation idempotent by construction.
        Ok(self.crons.get(&schedule_id).and_then(|e| e.next_fire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn duplicate_deferred_registration_is_rejected() {
        let registry = InMemoryTriggerRegistry::new();
        let fire_at = Utc::now() + Duration::minutes(5);

        registry
            .register_deferred("retry:7:1", 7, fire_at)
            .await
            .unwrap();
        let err = registry
            .register_deferred("retry:7:1", 7, fire_at)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::AlreadyExists { .. }));
        assert_eq!(registry.deferred_count(), 1);
    }

    #[tokio::test]
    async fn reregistering_unchanged_cron_keeps_next_fire() {
        let registry = InMemoryTriggerRegistry::new();
        registry
            .register_cron(3, "0 2 * * *", "America/Chicago")
            .await
            .unwrap();

        let next = Utc::now() + Duration::hours(6);
        registry.set_next_fire(3, next);

        // A manual run re-syncs the trigger; next fire must not move.
        registry
            .register_cron(3, "0 2 * * *", "America/Chicago")
            .await
            .unwrap();
        assert_eq!(registry.next_fire_time(3).await.unwrap(), Some(next));

        // A changed expression resets it.
        registry
            .register_cron(3, "0 4 * * *", "America/Chicago")
            .await
            .unwrap();
        assert_eq!(registry.next_fire_time(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn take_due_drains_only_due_triggers() {
        let registry = InMemoryTriggerRegistry::new();
        let now = Utc::now();
        registry
            .register_deferred("retry:1:1", 1, now - Duration::seconds(1))
            .await
            .unwrap();
        registry
            .register_deferred("retry:2:1", 2, now + Duration::minutes(10))
            .await
            .unwrap();

        let due = registry.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "retry:1:1");
        assert_eq!(registry.deferred_count(), 1);
    }
}
