use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::constants::events;
use crate::state_machine::{OrchestrationPhase, RunState};

/// Broadcast publisher for lifecycle events.
///
/// Publishing with no subscribers is not an error; observers (notification
/// bridges, test probes) subscribe when they care.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, name: &'static str, context: Value) {
        let event = PublishedEvent {
            name,
            context,
            published_at: chrono::Utc::now(),
        };
        // SendError only means nobody is listening right now.
        let _ = self.sender.send(event);
    }

    pub fn execution_started(&self, execution_id: i64, schedule_id: i64, triggered_by: &str) {
        self.publish(
            events::EXECUTION_STARTED,
            json!({
                "execution_id": execution_id,
                "schedule_id": schedule_id,
                "triggered_by": triggered_by,
            }),
        );
    }

    pub fn execution_finished(&self, execution_id: i64, schedule_id: i64, state: &str) {
        self.publish(
            events::EXECUTION_FINISHED,
            json!({
                "execution_id": execution_id,
                "schedule_id": schedule_id,
                "state": state,
            }),
        );
    }

    pub fn retry_scheduled(&self, schedule_id: i64, attempt: i32, fire_at: chrono::DateTime<chrono::Utc>) {
        self.publish(
            events::EXECUTION_RETRY_SCHEDULED,
            json!({
                "schedule_id": schedule_id,
                "attempt": attempt,
                "fire_at": fire_at.to_rfc3339(),
            }),
        );
    }

    pub fn run_phase_changed(&self, run_id: i64, phase: OrchestrationPhase) {
        self.publish(
            events::RUN_PHASE_CHANGED,
            json!({ "run_id": run_id, "phase": phase.to_string() }),
        );
    }

    pub fn run_finished(&self, run_id: i64, state: RunState) {
        self.publish(
            events::RUN_FINISHED,
            json!({ "run_id": run_id, "state": state.to_string() }),
        );
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let publisher = EventPublisher::default();
        publisher.execution_started(1, 2, "manual:ops");
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = EventPublisher::default();
        let mut rx = publisher.subscribe();

        publisher.run_phase_changed(9, OrchestrationPhase::ProcessCalls);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, events::RUN_PHASE_CHANGED);
        assert_eq!(event.context["run_id"], 9);
        assert_eq!(event.context["phase"], "process_calls");
    }
}
