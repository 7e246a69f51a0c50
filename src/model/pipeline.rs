use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::Status;

/// Protocols a feed can speak.
///
/// Closed set: every reader/parser dispatch matches exhaustively on this,
/// so adding a protocol is a compile-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    CCTray,
    GitHub,
    GitLab,
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedType::CCTray => f.write_str("cctray"),
            FeedType::GitHub => f.write_str("github"),
            FeedType::GitLab => f.write_str("gitlab"),
        }
    }
}

/// How to reach the server for one or more pipelines.
///
/// For CCTray one URL typically serves many projects; for GitHub/GitLab
/// each pipeline has its own URL. `pause_until`/`pause_reason` record a
/// server-imposed cooldown during which the feed must not be polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(rename = "type")]
    pub feed_type: FeedType,
    pub url: String,
    /// Project name as known to a CCTray server. `None` for REST feeds.
    pub name: Option<String>,
    pub pause_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
}

impl Feed {
    pub fn new(feed_type: FeedType, url: impl Into<String>) -> Self {
        Self {
            feed_type,
            url: url.into(),
            name: None,
            pause_until: None,
            pause_reason: None,
        }
    }

    pub fn cctray(url: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: Some(project.into()),
            ..Self::new(FeedType::CCTray, url)
        }
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.pause_until.is_some_and(|until| now < until)
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            feed_type: self.feed_type,
            url: self.url.clone(),
        }
    }
}

/// Deduplication key for polling: feeds with equal `(type, url)` are
/// served by a single HTTP request per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub feed_type: FeedType,
    pub url: String,
}

/// Identity of a pipeline: display name plus feed URL.
///
/// Neither part is unique alone; many pipelines can share one CCTray URL
/// and display names are user-editable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId {
    pub name: String,
    pub url: String,
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// A monitored build job and everything currently known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub feed: Feed,
    pub status: Status,
    /// Human-readable error from the last poll attempt; cleared on any
    /// successful poll.
    pub connection_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Id of the dynamic-feed source that created this pipeline; absent
    /// for manually added pipelines.
    pub managed_by_source: Option<String>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, feed: Feed) -> Self {
        Self {
            name: name.into(),
            feed,
            status: Status::default(),
            connection_error: None,
            last_updated: None,
            managed_by_source: None,
        }
    }

    pub fn id(&self) -> PipelineId {
        PipelineId {
            name: self.name.clone(),
            url: self.feed.url.clone(),
        }
    }

    /// Name the server knows this pipeline by. Falls back to the display
    /// name for feeds that never set one.
    pub fn server_name(&self) -> &str {
        self.feed.name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_pause_gating_is_strictly_before_deadline() {
        let now = Utc::now();
        let mut feed = Feed::new(FeedType::GitHub, "https://api.github.com/x");
        assert!(!feed.is_paused(now));

        feed.pause_until = Some(now + Duration::seconds(600));
        assert!(feed.is_paused(now));

        feed.pause_until = Some(now - Duration::seconds(1));
        assert!(!feed.is_paused(now));
    }

    #[test]
    fn test_group_key_equality_by_type_and_url() {
        let a = Feed::cctray("http://ci.example.com/cctray.xml", "one");
        let b = Feed::cctray("http://ci.example.com/cctray.xml", "two");
        let c = Feed::new(FeedType::GitLab, "http://ci.example.com/cctray.xml");

        assert_eq!(a.group_key(), b.group_key());
        assert_ne!(a.group_key(), c.group_key());
    }

    #[test]
    fn test_pipeline_identity_is_name_plus_url() {
        let a = Pipeline::new("connectfour", Feed::cctray("http://ci/cctray.xml", "connectfour"));
        let b = Pipeline::new("connectfour", Feed::cctray("http://other/cctray.xml", "connectfour"));
        assert_ne!(a.id(), b.id());
    }
}
