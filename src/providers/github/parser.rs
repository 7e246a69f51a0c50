use crate::error::FeedError;
use crate::model::{Activity, Build, BuildResult, Status};
use crate::providers::prettify;

use super::types::{WorkflowRun, WorkflowRunsResponse};

/// Parsed workflow-run list for one repository.
///
/// Pipeline display names for this protocol are composite,
/// `"<repo>:<workflow-file>"`; the part after the colon is the lookup
/// key and is matched against each run's workflow file or workflow name.
#[derive(Debug)]
pub struct RunsDocument {
    runs: Vec<WorkflowRun>,
}

impl RunsDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, FeedError> {
        let response: WorkflowRunsResponse = serde_json::from_slice(bytes)
            .map_err(|err| FeedError::MalformedPayload(err.to_string()))?;
        Ok(Self {
            runs: response.workflow_runs,
        })
    }

    /// Status for the pipeline named `pipeline_name`, assembled from the
    /// newest matching run. While that run is still in progress the
    /// newest completed run supplies the last build as well.
    pub fn status_for(&self, pipeline_name: &str) -> Option<Status> {
        let key = workflow_key(pipeline_name);
        let matching: Vec<&WorkflowRun> = self
            .runs
            .iter()
            .filter(|run| run_matches(run, key))
            .collect();

        let newest = *matching.first()?;
        let activity = activity_for(newest.status.as_deref());

        let mut status = Status {
            activity,
            web_url: newest.html_url.clone(),
            ..Status::default()
        };

        match activity {
            Activity::Building => {
                status.current_build = Some(build_from(newest, false));
                status.last_build = matching
                    .iter()
                    .find(|run| run.status.as_deref() == Some("completed"))
                    .map(|run| build_from(run, true));
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

/// Lookup key of a composite pipeline name: the part after the colon,
/// or the whole name when there is none.
fn workflow_key(pipeline_name: &str) -> &str {
    pipeline_name
        .split_once(':')
        .map_or(pipeline_name, |(_, suffix)| suffix)
}

fn run_matches(run: &WorkflowRun, key: &str) -> bool {
    let file = run
        .path
        .as_deref()
        .and_then(|p| p.rsplit('/').next())
        .unwrap_or_default();
    file == key || run.name.as_deref() == Some(key)
}

fn activity_for(status: Option<&str>) -> Activity {
    match status {
        Some("in_progress") | Some("queued") => Activity::Building,
        Some("completed") => Activity::Sleeping,
        _ => Activity::Other,
    }
}

fn build_from(run: &WorkflowRun, completed: bool) -> Build {
    let result = if completed {
        match run.conclusion.as_deref() {
            Some("success") => BuildResult::Success,
            Some("failure") => BuildResult::Failure,
            _ => BuildResult::Unknown,
        }
    } else {
        BuildResult::Unknown
    };

    // Elapsed time is always derived from the two timestamps; the wire
    // format has no duration field of its own.
    let duration = if completed {
        match (run.created_at, run.updated_at) {
            (Some(created), Some(updated)) => Some((updated - created).num_seconds()),
            _ => None,
        }
    } else {
        None
    };

    Build {
        result,
        id: run.id.map(|id| id.to_string()),
        label: run.run_number.map(|n| n.to_string()),
        timestamp: run.created_at,
        duration,
        message: message_for(run),
        user: run.actor.as_ref().and_then(|a| a.login.clone()),
        avatar: run.actor.as_ref().and_then(|a| a.avatar_url.clone()),
    }
}

fn message_for(run: &WorkflowRun) -> Option<String> {
    match (run.event.as_deref(), run.display_title.as_deref()) {
        (Some(event), Some(title)) => Some(format!("{} \u{22ee} {}", prettify(event), title)),
        (Some(event), None) => Some(prettify(event)),
        (None, Some(title)) => Some(title.to_string()),
        (None, None) => None,
    }
}
