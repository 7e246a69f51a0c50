use crate::error::FeedError;
use crate::model::{Activity, Build, BuildResult, Status};
use crate::providers::prettify;

use super::types::PipelineRecord;

/// Parsed pipeline list for one project, newest first.
#[derive(Debug)]
pub struct PipelinesDocument {
    records: Vec<PipelineRecord>,
}

impl PipelinesDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, FeedError> {
        let records: Vec<PipelineRecord> = serde_json::from_slice(bytes)
            .map_err(|err| FeedError::MalformedPayload(err.to_string()))?;
        Ok(Self { records })
    }

    /// Status assembled from the newest record. While that record is
    /// still running, the last build comes from the first successful
    /// record in the list, or failing that the first completed one.
    pub fn status(&self) -> Option<Status> {
        let newest = self.records.first()?;
        let activity = activity_for(newest.status.as_deref());

        let mut status = Status {
            activity,
            web_url: newest.web_url.clone(),
            ..Status::default()
        };

        match activity {
            Activity::Building => {
                status.current_build = Some(build_from(newest, false));
                let fallback = self
                    .records
                    .iter()
                    .find(|r| r.status.as_deref() == Some("success"))
                    .or_else(|| {
                        self.records
                            .iter()
                            .find(|r| activity_for(r.status.as_deref()) == Activity::Sleeping)
                    });
                status.last_build = fallback.map(|r| build_from(r, true));
            }
            Activity::Sleeping => {
                status.last_build = Some(build_from(newest, true));
            }
            Activity::Other => {
                status.last_build = Some(build_from(newest, false));
            }
        }

        Some(status)
    }
}

fn activity_for(status: Option<&str>) -> Activity {
    match status {
        Some("running") | Some("pending") => Activity::Building,
        Some("success") | Some("failed") | Some("canceled") | Some("skipped") | Some("manual")
        | Some("scheduled") => Activity::Sleeping,
        _ => Activity::Other,
    }
}

fn build_from(record: &PipelineRecord, completed: bool) -> Build {
    let result = if completed {
        match record.status.as_deref() {
            Some("success") => BuildResult::Success,
            Some("failed") => BuildResult::Failure,
            Some("canceled") | Some("skipped") | Some("manual") | Some("scheduled") => {
                BuildResult::Other
            }
            _ => BuildResult::Unknown,
        }
    } else {
        BuildResult::Unknown
    };

    let duration = if completed {
        match (record.created_at, record.updated_at) {
            (Some(created), Some(updated)) => Some((updated - created).num_seconds()),
            _ => None,
        }
    } else {
        None
    };

    Build {
        result,
        id: record.iid.map(|iid| iid.to_string()),
        label: record.iid.map(|iid| iid.to_string()),
        timestamp: record.created_at,
        duration,
        message: message_for(record),
        user: None,
        avatar: None,
    }
}

fn message_for(record: &PipelineRecord) -> Option<String> {
    let commit = record
        .sha
        .as_deref()
        .map(|sha| format!("Commit {}", &sha[..sha.len().min(7)]));
    match (record.source.as_deref(), commit) {
        (Some(source), Some(commit)) => {
            Some(format!("{} \u{22ee} {}", prettify(source), commit))
        }
        (Some(source), None) => Some(prettify(source)),
        (None, commit) => commit,
    }
}
