use std::sync::RwLock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::debug;
use tokio::sync::{broadcast, mpsc};

use crate::model::{classify, merge, Activity, Pipeline, PipelineId, StatusChangeKind};
use crate::providers::{PipelineUpdate, PollOutcome};

const EVENT_CAPACITY: usize = 64;

/// Emitted on the broadcast channel whenever a pipeline changes.
///
/// `change` carries the status-transition classification for successful
/// polls; error and pause updates signal with `None` so the notification
/// layer can tell real transitions from bookkeeping.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub id: PipelineId,
    pub change: Option<StatusChangeKind>,
}

/// The shared pipeline collection.
///
/// The only mutable shared state in the core: read by the UI layer,
/// written by the scheduler's merge step and by dynamic feed sync. Kept
/// insertion-ordered so displays are stable. All lock holds are short
/// and never span an await.
pub struct PipelineRegistry {
    pipelines: RwLock<IndexMap<PipelineId, Pipeline>>,
    events: broadcast::Sender<PipelineEvent>,
    added: mpsc::UnboundedSender<Vec<PipelineId>>,
}

impl PipelineRegistry {
    /// Creates the registry plus the receiver the scheduler listens on
    /// for "new pipelines were added" wakeups.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<PipelineId>>) {
        let (added, added_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        (
            Self {
                pipelines: RwLock::new(IndexMap::new()),
                events,
                added,
            },
            added_rx,
        )
    }

    /// Adds a pipeline unless its identity is already present. Signals
    /// the scheduler so new pipelines get an immediate out-of-band poll.
    pub fn add(&self, pipeline: Pipeline) -> bool {
        self.add_all(vec![pipeline]) == 1
    }

    /// Adds the given pipelines, skipping identities already present,
    /// and signals the scheduler once for the whole batch. Returns the
    /// number actually added.
    pub fn add_all(&self, pipelines: Vec<Pipeline>) -> usize {
        let mut added_ids = Vec::new();
        {
            let mut map = self.pipelines.write().expect("registry lock poisoned");
            for pipeline in pipelines {
                let id = pipeline.id();
                if map.contains_key(&id) {
                    debug!("Pipeline {id} already tracked, skipping");
                    continue;
                }
                map.insert(id.clone(), pipeline);
                added_ids.push(id);
            }
        }
        let count = added_ids.len();
        if !added_ids.is_empty() {
            let _ = self.added.send(added_ids);
        }
        count
    }

    pub fn remove(&self, id: &PipelineId) -> Option<Pipeline> {
        let mut map = self.pipelines.write().expect("registry lock poisoned");
        map.shift_remove(id)
    }

    pub fn get(&self, id: &PipelineId) -> Option<Pipeline> {
        let map = self.pipelines.read().expect("registry lock poisoned");
        map.get(id).cloned()
    }

    /// Snapshot of every tracked pipeline, in insertion order.
    pub fn snapshot(&self) -> Vec<Pipeline> {
        let map = self.pipelines.read().expect("registry lock poisoned");
        map.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The "a pipeline was just updated" signal for UI and notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Applies one poll outcome. This is the serialized merge-back step:
    /// the scheduler calls it from a single task, so readers can never
    /// observe a half-updated pipeline.
    pub fn apply_update(&self, update: PipelineUpdate, now: DateTime<Utc>) {
        let event = {
            let mut map = self.pipelines.write().expect("registry lock poisoned");
            let Some(pipeline) = map.get_mut(&update.id) else {
                // Removed while its fetch was in flight.
                debug!("Dropping update for untracked pipeline {}", update.id);
                return;
            };

            match update.outcome {
                PollOutcome::Status(new_status) => {
                    let merged = merge(&pipeline.status, new_status, now);
                    let change = classify(&pipeline.status, &merged);
                    pipeline.status = merged;
                    pipeline.connection_error = None;
                    pipeline.feed.pause_until = None;
                    pipeline.feed.pause_reason = None;
                    pipeline.last_updated = Some(now);
                    PipelineEvent {
                        id: update.id,
                        change: Some(change),
                    }
                }
                PollOutcome::Failed(err) => {
                    pipeline.connection_error = Some(err.to_string());
                    pipeline.status.activity = Activity::Other;
                    pipeline.status.current_build = None;
                    pipeline.last_updated = Some(now);
                    PipelineEvent {
                        id: update.id,
                        change: None,
                    }
                }
                PollOutcome::RateLimited { resume_at, reason } => {
                    pipeline.feed.pause_until = Some(resume_at);
                    pipeline.feed.pause_reason = Some(reason);
                    pipeline.last_updated = Some(now);
                    PipelineEvent {
                        id: update.id,
                        change: None,
                    }
                }
                PollOutcome::Skipped => return,
            }
        };

        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::model::{Build, BuildResult, Feed, FeedType, Status};
    use chrono::Duration;

    fn pipeline(name: &str) -> Pipeline {
        Pipeline::new(name, Feed::cctray("http://ci/cctray.xml", name))
    }

    fn sleeping_status(label: &str) -> Status {
        Status {
            activity: Activity::Sleeping,
            last_build: Some(Build {
                result: BuildResult::Success,
                label: Some(label.to_string()),
                ..Build::default()
            }),
            ..Status::default()
        }
    }

    #[test]
    fn test_add_is_idempotent_per_identity() {
        let (registry, mut added_rx) = PipelineRegistry::new();

        assert!(registry.add(pipeline("a")));
        assert!(!registry.add(pipeline("a")));
        assert_eq!(registry.len(), 1);

        // Only the first add signaled.
        assert_eq!(added_rx.try_recv().unwrap().len(), 1);
        assert!(added_rx.try_recv().is_err());
    }

    #[test]
    fn test_successful_update_clears_error_and_pause() {
        let (registry, _rx) = PipelineRegistry::new();
        let mut p = pipeline("a");
        p.connection_error = Some("Could not connect to the server.".to_string());
        p.feed.pause_until = Some(Utc::now() - Duration::seconds(10));
        p.feed.pause_reason = Some("Rate limited".to_string());
        let id = p.id();
        registry.add(p);

        registry.apply_update(
            PipelineUpdate::new(id.clone(), PollOutcome::Status(sleeping_status("1"))),
            Utc::now(),
        );

        let updated = registry.get(&id).unwrap();
        assert!(updated.connection_error.is_none());
        assert!(updated.feed.pause_until.is_none());
        assert!(updated.feed.pause_reason.is_none());
        assert_eq!(updated.status.activity, Activity::Sleeping);
        assert!(updated.last_updated.is_some());
    }

    #[test]
    fn test_failed_update_sets_error_and_resets_activity() {
        let (registry, _rx) = PipelineRegistry::new();
        let mut p = pipeline("a");
        p.status = sleeping_status("1");
        let id = p.id();
        registry.add(p);

        registry.apply_update(
            PipelineUpdate::new(id.clone(), PollOutcome::Failed(FeedError::HttpStatus(503))),
            Utc::now(),
        );

        let updated = registry.get(&id).unwrap();
        assert_eq!(
            updated.connection_error.as_deref(),
            Some("The server responded: Service Unavailable.")
        );
        assert_eq!(updated.status.activity, Activity::Other);
    }

    #[test]
    fn test_rate_limit_pauses_without_touching_status() {
        let (registry, _rx) = PipelineRegistry::new();
        let mut p = pipeline("a");
        p.status = sleeping_status("1");
        let id = p.id();
        registry.add(p);

        let resume_at = Utc::now() + Duration::seconds(600);
        registry.apply_update(
            PipelineUpdate::new(
                id.clone(),
                PollOutcome::RateLimited {
                    resume_at,
                    reason: "Rate limited, waiting".to_string(),
                },
            ),
            Utc::now(),
        );

        let updated = registry.get(&id).unwrap();
        assert_eq!(updated.feed.pause_until, Some(resume_at));
        assert_eq!(updated.status, sleeping_status("1"));
        assert!(updated.connection_error.is_none());
    }

    #[test]
    fn test_events_carry_the_transition_classification() {
        let (registry, _rx) = PipelineRegistry::new();
        let mut p = pipeline("a");
        p.status = sleeping_status("1");
        let id = p.id();
        registry.add(p);
        let mut events = registry.subscribe();

        let building = Status {
            activity: Activity::Building,
            current_build: Some(Build::default()),
            ..Status::default()
        };
        registry.apply_update(
            PipelineUpdate::new(id.clone(), PollOutcome::Status(building)),
            Utc::now(),
        );

        let event = events.try_recv().unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.change, Some(StatusChangeKind::Start));
    }

    #[test]
    fn test_update_for_removed_pipeline_is_dropped() {
        let (registry, _rx) = PipelineRegistry::new();
        let p = pipeline("a");
        let id = p.id();
        registry.add(p);
        registry.remove(&id);

        registry.apply_update(
            PipelineUpdate::new(id.clone(), PollOutcome::Status(sleeping_status("1"))),
            Utc::now(),
        );
        assert!(registry.get(&id).is_none());
    }
}
