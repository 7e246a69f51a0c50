use chrono::{DateTime, Utc};
use serde::Deserialize;

/// GitHub Actions workflow run, as returned by the runs list endpoint.
///
/// Every field the server might omit is optional; a half-filled record
/// still maps to a usable status.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for the workflow run
    pub id: Option<u64>,
    /// Name of the workflow
    pub name: Option<String>,
    /// Path to the workflow file
    pub path: Option<String>,
    /// Display title for the run
    pub display_title: Option<String>,
    /// Run number
    pub run_number: Option<u64>,
    /// Event that triggered the run
    pub event: Option<String>,
    /// Status of the run
    pub status: Option<String>,
    /// Conclusion of the run (success, failure, etc.)
    pub conclusion: Option<String>,
    /// Link to the run's page
    pub html_url: Option<String>,
    /// When the run was created
    pub created_at: Option<DateTime<Utc>>,
    /// When the run was updated
    pub updated_at: Option<DateTime<Utc>>,
    /// Who triggered the run
    pub actor: Option<Actor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    pub login: Option<String>,
    pub avatar_url: Option<String>,
}

/// Response envelope from the workflow runs endpoint.
#[derive(Debug, Deserialize)]
pub struct WorkflowRunsResponse {
    pub workflow_runs: Vec<WorkflowRun>,
}
