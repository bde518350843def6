//! System assembly: builds the pool, executor, pipeline, guard, and control
//! surface from configuration, registers triggers for fireable schedules,
//! and hands back a ready system.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clients::{HttpProviderClient, ProviderClient};
use crate::config::BillrunConfig;
use crate::database;
use crate::events::EventPublisher;
use crate::execution::WorkUnitExecutor;
use crate::models::JobSchedule;
use crate::orchestration::{ConcurrencyGuard, OrchestrationPipeline, RecoveryReport, RecoveryService};
use crate::scheduler::{InMemoryTriggerRegistry, RetryScheduler, TriggerRegistry};
use crate::services::control::ControlService;
use crate::services::notifications::{LogNotificationSink, NotificationSink};

pub struct BillrunSystem {
    pub pool: PgPool,
    pub config: BillrunConfig,
    pub events: EventPublisher,
    pub triggers: Arc<dyn TriggerRegistry>,
    pub executor: Arc<WorkUnitExecutor>,
    pub guard: Arc<ConcurrencyGuard>,
    pub pipeline: OrchestrationPipeline,
    pub control: ControlService,
}

impl BillrunSystem {
    /// Assemble the system against the default in-memory trigger registry
    /// and the HTTP provider client.
    pub async fn bootstrap(config: BillrunConfig) -> crate::Result<Self> {
        crate::logging::init_logging();

        let pool = database::init_pool(&config.database).await?;
        database::health_check(&pool).await?;

        let triggers: Arc<dyn TriggerRegistry> = Arc::new(InMemoryTriggerRegistry::new());
        let client: Arc<dyn ProviderClient> =
            Arc::new(HttpProviderClient::new(&config.provider)?);
        Self::assemble(config, pool, triggers, client).await
    }

    /// Assembly seam for tests and hosts that bring their own scheduling
    /// library binding or provider client.
    pub async fn assemble(
        config: BillrunConfig,
        pool: PgPool,
        triggers: Arc<dyn TriggerRegistry>,
        client: Arc<dyn ProviderClient>,
    ) -> crate::Result<Self> {
        let events = EventPublisher::default();
        let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);

        let retry = RetryScheduler::new(pool.clone(), Arc::clone(&triggers), events.clone());
        let executor = Arc::new(WorkUnitExecutor::new(
            pool.clone(),
            Arc::clone(&triggers),
            retry,
            Arc::clone(&notifier),
            events.clone(),
            config.executor.clone(),
        ));

        let guard = Arc::new(ConcurrencyGuard::new(pool.clone()));
        let pipeline = OrchestrationPipeline::new(
            pool.clone(),
            client,
            Arc::clone(&guard),
            events.clone(),
            notifier,
            config.orchestration.clone(),
        );

        let control = ControlService::new(
            pool.clone(),
            Arc::clone(&executor),
            pipeline.clone(),
            Arc::clone(&triggers),
        );

        let system = Self {
            pool,
            config,
            events,
            triggers,
            executor,
            guard,
            pipeline,
            control,
        };
        system.register_schedule_triggers().await;
        Ok(system)
    }

    /// Register recurring triggers for every enabled, non-deleted schedule.
    /// Registration failures are logged per schedule and never abort boot.
    async fn register_schedule_triggers(&self) {
        let schedules = match JobSchedule::list_fireable(&self.pool).await {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!(error = %e, "could not load schedules for trigger registration");
                return;
            }
        };

        let mut registered = 0usize;
        for schedule in &schedules {
            match self
                .triggers
                .register_cron(
                    schedule.schedule_id,
                    &schedule.cron_expression,
                    &schedule.time_zone,
                )
                .await
            {
                Ok(()) => registered += 1,
                Err(e) => warn!(
                    schedule_id = schedule.schedule_id,
                    error = %e,
                    "cron trigger registration failed"
                ),
            }
        }
        info!(registered, total = schedules.len(), "schedule triggers registered");
    }

    pub fn recovery_service(&self) -> RecoveryService {
        RecoveryService::new(
            self.pool.clone(),
            self.pipeline.clone(),
            self.events.clone(),
            self.config.recovery.clone(),
            self.config.orchestration.clone(),
        )
    }

    /// Spawn the one-shot startup recovery pass (grace period included).
    pub fn spawn_startup_recovery(&self) -> JoinHandle<RecoveryReport> {
        let recovery = self.recovery_service();
        tokio::spawn(async move { recovery.run_at_startup().await })
    }
}
