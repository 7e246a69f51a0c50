mod registry;

pub use registry::{PipelineEvent, PipelineRegistry};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::auth::SecretStore;
use crate::model::{GroupKey, Pipeline, PipelineId};
use crate::providers::{http_client, FeedGroup, FeedReader, PipelineUpdate};

pub const DEFAULT_POLL_INTERVAL: u64 = 15;

struct GroupOutcome {
    key: GroupKey,
    updates: Vec<PipelineUpdate>,
}

/// Drives the poll cycle.
///
/// On every tick the tracked pipelines are partitioned into feed groups
/// (one request per CCTray server, singleton groups for REST feeds) and
/// each group is fetched in its own task. Completed fetches funnel back
/// through a channel and are merged into the registry one at a time, so
/// the registry has exactly one writer no matter how many fetches run.
/// A group with a fetch still in flight is skipped by later ticks.
pub struct PollScheduler {
    registry: Arc<PipelineRegistry>,
    secrets: Arc<dyn SecretStore>,
    client: reqwest::Client,
    interval: Duration,
    in_flight: HashSet<GroupKey>,
    outcome_tx: mpsc::UnboundedSender<GroupOutcome>,
    outcome_rx: Option<mpsc::UnboundedReceiver<GroupOutcome>>,
    added_rx: Option<mpsc::UnboundedReceiver<Vec<PipelineId>>>,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<PipelineRegistry>,
        secrets: Arc<dyn SecretStore>,
        poll_interval_secs: u64,
        added_rx: mpsc::UnboundedReceiver<Vec<PipelineId>>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            secrets,
            client: http_client(),
            interval: Duration::from_secs(poll_interval_secs.max(1)),
            in_flight: HashSet::new(),
            outcome_tx,
            outcome_rx: Some(outcome_rx),
            added_rx: Some(added_rx),
        }
    }

    /// Runs forever: first tick fires immediately, then every interval.
    /// Pipelines added between ticks get an immediate poll of just their
    /// groups.
    pub async fn run(mut self) {
        let mut outcome_rx = self.outcome_rx.take().expect("scheduler already running");
        let mut added_rx = self.added_rx.take().expect("scheduler already running");

        // Pipelines registered before startup are covered by the first
        // tick; drop their queued wakeups.
        while added_rx.try_recv().is_ok() {}

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Poll cycle starting");
                    self.start_cycle(None);
                }
                Some(outcome) = outcome_rx.recv() => self.finish_group(outcome),
                Some(ids) = added_rx.recv() => {
                    debug!("Out-of-band poll for {} new pipeline(s)", ids.len());
                    self.start_cycle(Some(ids.as_slice()));
                }
            }
        }
    }

    /// One complete cycle: dispatch every due group, wait for all of
    /// them, merge. Used by the one-shot CLI path and tests; `run` keeps
    /// fetches overlapped with the timer instead.
    pub async fn poll_once(&mut self) {
        self.start_cycle(None);
        let mut outcome_rx = self.outcome_rx.take().expect("scheduler already running");
        while !self.in_flight.is_empty() {
            match outcome_rx.recv().await {
                Some(outcome) => self.finish_group(outcome),
                None => break,
            }
        }
        self.outcome_rx = Some(outcome_rx);
    }

    fn start_cycle(&mut self, only: Option<&[PipelineId]>) {
        let groups = group_pipelines(self.registry.snapshot(), only);
        for group in groups {
            if self.in_flight.contains(&group.key) {
                debug!("Group {} still in flight, skipping", group.key.url);
                continue;
            }
            self.in_flight.insert(group.key.clone());

            let reader = FeedReader::for_feed_type(
                group.key.feed_type,
                self.client.clone(),
                Arc::clone(&self.secrets),
            );
            let tx = self.outcome_tx.clone();
            tokio::spawn(async move {
                let updates = reader.update(&group).await;
                if tx
                    .send(GroupOutcome {
                        key: group.key,
                        updates,
                    })
                    .is_err()
                {
                    warn!("Scheduler gone, dropping poll results");
                }
            });
        }
    }

    fn finish_group(&mut self, outcome: GroupOutcome) {
        self.in_flight.remove(&outcome.key);
        let now = Utc::now();
        for update in outcome.updates {
            self.registry.apply_update(update, now);
        }
    }
}

/// Partitions pipelines into feed groups, leaving out paused feeds (no
/// task is spawned for them) and, when `only` is given, pipelines not in
/// that set.
fn group_pipelines(pipelines: Vec<Pipeline>, only: Option<&[PipelineId]>) -> Vec<FeedGroup> {
    let now = Utc::now();
    let mut groups: IndexMap<GroupKey, FeedGroup> = IndexMap::new();

    for pipeline in pipelines {
        if pipeline.feed.is_paused(now) {
            continue;
        }
        if let Some(only) = only {
            if !only.contains(&pipeline.id()) {
                continue;
            }
        }
        let key = pipeline.feed.group_key();
        groups
            .entry(key.clone())
            .or_insert_with(|| FeedGroup {
                key,
                pipelines: Vec::new(),
            })
            .pipelines
            .push(pipeline);
    }

    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySecretStore;
    use crate::model::{Activity, Feed, FeedType};
    use chrono::Duration as ChronoDuration;

    const FEED: &str = r#"<Projects>
        <Project name="connectfour" activity="Sleeping" lastBuildStatus="Success"
                 lastBuildLabel="build.1" lastBuildTime="2024-04-02T11:30:00Z"/>
        <Project name="cozmoslauncher" activity="Building" lastBuildStatus="Failure"
                 lastBuildLabel="build.7" lastBuildTime="2024-04-02T10:00:00Z"/>
    </Projects>"#;

    fn scheduler_for(registry: Arc<PipelineRegistry>, added_rx: mpsc::UnboundedReceiver<Vec<PipelineId>>) -> PollScheduler {
        PollScheduler::new(
            registry,
            Arc::new(MemorySecretStore::new()),
            DEFAULT_POLL_INTERVAL,
            added_rx,
        )
    }

    #[test]
    fn test_grouping_batches_by_type_and_url() {
        let pipelines = vec![
            Pipeline::new("a", Feed::cctray("http://ci/cctray.xml", "a")),
            Pipeline::new("b", Feed::cctray("http://ci/cctray.xml", "b")),
            Pipeline::new("c", Feed::new(FeedType::GitHub, "https://api.github.com/r/runs")),
        ];

        let groups = group_pipelines(pipelines, None);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].pipelines.len(), 2);
        assert_eq!(groups[1].pipelines.len(), 1);
    }

    #[test]
    fn test_grouping_skips_paused_feeds() {
        let mut paused = Pipeline::new("a", Feed::cctray("http://ci/cctray.xml", "a"));
        paused.feed.pause_until = Some(Utc::now() + ChronoDuration::seconds(600));
        let active = Pipeline::new("b", Feed::new(FeedType::GitHub, "https://api.github.com/r/runs"));

        let groups = group_pipelines(vec![paused, active], None);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key.feed_type, FeedType::GitHub);
    }

    #[test]
    fn test_grouping_respects_the_only_filter() {
        let a = Pipeline::new("a", Feed::cctray("http://ci/cctray.xml", "a"));
        let b = Pipeline::new("b", Feed::new(FeedType::GitHub, "https://api.github.com/r/runs"));
        let only = vec![b.id()];

        let groups = group_pipelines(vec![a, b], Some(only.as_slice()));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pipelines[0].name, "b");
    }

    #[tokio::test]
    async fn test_one_request_per_cctray_group_per_cycle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/cctray.xml")
            .with_status(200)
            .with_body(FEED)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/cctray.xml", server.url());
        let (registry, added_rx) = PipelineRegistry::new();
        let registry = Arc::new(registry);
        registry.add_all(vec![
            Pipeline::new("connectfour", Feed::cctray(&url, "connectfour")),
            Pipeline::new("cozmoslauncher", Feed::cctray(&url, "cozmoslauncher")),
        ]);

        let mut scheduler = scheduler_for(Arc::clone(&registry), added_rx);
        scheduler.poll_once().await;

        mock.assert_async().await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].status.activity, Activity::Sleeping);
        assert_eq!(snapshot[1].status.activity, Activity::Building);
        // Both updated independently from the one response.
        assert!(snapshot.iter().all(|p| p.connection_error.is_none()));
        assert!(snapshot.iter().all(|p| p.last_updated.is_some()));
    }

    #[tokio::test]
    async fn test_paused_feed_gets_no_request_until_pause_expires() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/cctray.xml")
            .with_status(200)
            .with_body(FEED)
            .expect(0)
            .create_async()
            .await;

        let url = format!("{}/cctray.xml", server.url());
        let (registry, added_rx) = PipelineRegistry::new();
        let registry = Arc::new(registry);
        let mut pipeline = Pipeline::new("connectfour", Feed::cctray(&url, "connectfour"));
        pipeline.feed.pause_until = Some(Utc::now() + ChronoDuration::seconds(600));
        let id = pipeline.id();
        registry.add(pipeline);

        let mut scheduler = scheduler_for(Arc::clone(&registry), added_rx);
        scheduler.poll_once().await;
        mock.assert_async().await;

        // Expire the pause; the next cycle polls and the success clears it.
        let expired = server
            .mock("GET", "/cctray.xml")
            .with_status(200)
            .with_body(FEED)
            .expect(1)
            .create_async()
            .await;
        let mut p = registry.get(&id).unwrap();
        p.feed.pause_until = Some(Utc::now() - ChronoDuration::seconds(1));
        registry.remove(&id);
        registry.add(p);

        scheduler.poll_once().await;

        expired.assert_async().await;
        let updated = registry.get(&id).unwrap();
        assert!(updated.feed.pause_until.is_none());
        assert_eq!(updated.status.activity, Activity::Sleeping);
    }

    #[tokio::test]
    async fn test_one_groups_failure_does_not_affect_another() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/good.xml")
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;
        server
            .mock("GET", "/bad.xml")
            .with_status(500)
            .create_async()
            .await;

        let good_url = format!("{}/good.xml", server.url());
        let bad_url = format!("{}/bad.xml", server.url());
        let (registry, added_rx) = PipelineRegistry::new();
        let registry = Arc::new(registry);
        let good = Pipeline::new("connectfour", Feed::cctray(&good_url, "connectfour"));
        let bad = Pipeline::new("elsewhere", Feed::cctray(&bad_url, "elsewhere"));
        let good_id = good.id();
        let bad_id = bad.id();
        registry.add_all(vec![good, bad]);

        let mut scheduler = scheduler_for(Arc::clone(&registry), added_rx);
        scheduler.poll_once().await;

        let good = registry.get(&good_id).unwrap();
        assert!(good.connection_error.is_none());
        assert_eq!(good.status.activity, Activity::Sleeping);

        let bad = registry.get(&bad_id).unwrap();
        assert_eq!(
            bad.connection_error.as_deref(),
            Some("The server responded: Internal Server Error.")
        );
        assert_eq!(bad.status.activity, Activity::Other);
    }
}
