mod cctray;
mod github;
mod gitlab;

pub use cctray::{CCTrayReader, StatusDocument};
pub use github::GitHubReader;
pub use gitlab::GitLabReader;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::header::HeaderMap;

use crate::auth::SecretStore;
use crate::error::FeedError;
use crate::model::{FeedType, GroupKey, Pipeline, PipelineId, Status};

const USER_AGENT: &str = concat!("buildwatch/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for all feed readers.
///
/// The timeout bounds every network call; a timed-out request surfaces
/// as a connection failure like any other transport error.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("Failed to build HTTP client")
}

/// Pipelines sharing one `(type, url)` endpoint, polled by one request.
#[derive(Debug, Clone)]
pub struct FeedGroup {
    pub key: GroupKey,
    pub pipelines: Vec<Pipeline>,
}

/// What one poll attempt produced for one pipeline.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Freshly parsed status, to be merged over the stored one.
    Status(Status),
    /// Poll failed; surfaces as the pipeline's connection error.
    Failed(FeedError),
    /// Server asked us to back off. Not an error: the prior status stays
    /// untouched and the feed is paused until `resume_at`.
    RateLimited {
        resume_at: DateTime<Utc>,
        reason: String,
    },
    /// The feed is paused; no request was made and nothing changes.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PipelineUpdate {
    pub id: PipelineId,
    pub outcome: PollOutcome,
}

impl PipelineUpdate {
    pub fn new(id: PipelineId, outcome: PollOutcome) -> Self {
        Self { id, outcome }
    }
}

/// Closed dispatch over the supported protocols.
///
/// Readers never write to the registry; they turn one feed group into
/// per-pipeline outcomes and the scheduler applies them.
pub enum FeedReader {
    CCTray(CCTrayReader),
    GitHub(GitHubReader),
    GitLab(GitLabReader),
}

impl FeedReader {
    pub fn for_feed_type(
        feed_type: FeedType,
        client: reqwest::Client,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        match feed_type {
            FeedType::CCTray => Self::CCTray(CCTrayReader::new(client, secrets)),
            FeedType::GitHub => Self::GitHub(GitHubReader::new(client, secrets)),
            FeedType::GitLab => Self::GitLab(GitLabReader::new(client, secrets)),
        }
    }

    pub async fn update(&self, group: &FeedGroup) -> Vec<PipelineUpdate> {
        match self {
            Self::CCTray(reader) => reader.update(group).await,
            Self::GitHub(reader) => reader.update(group).await,
            Self::GitLab(reader) => reader.update(group).await,
        }
    }
}

pub(crate) fn transport_error(err: &reqwest::Error) -> FeedError {
    FeedError::Connection(err.to_string())
}

/// Two-stage rate-limit disambiguation: the status code alone is not
/// enough, the remaining-quota header must be present and exhausted.
/// Returns the reset time when the response is a true rate limit.
pub(crate) fn rate_limit_resume(
    status: u16,
    headers: &HeaderMap,
    remaining_header: &str,
    reset_header: &str,
) -> Option<DateTime<Utc>> {
    if status != 403 && status != 429 {
        return None;
    }
    let remaining: i64 = headers
        .get(remaining_header)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if remaining > 0 {
        return None;
    }
    let reset: i64 = headers
        .get(reset_header)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Utc.timestamp_opt(reset, 0).single()
}

pub(crate) fn pause_reason(resume_at: DateTime<Utc>) -> String {
    format!(
        "Rate limited, waiting until {}",
        resume_at.with_timezone(&Local).format("%H:%M:%S")
    )
}

/// Turns wire identifiers like `pull_request` into `Pull Request` for
/// build messages.
pub(crate) fn prettify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split(['_', '-']).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}
