use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A GitLab pipeline record from the pipelines list endpoint.
///
/// The list endpoint is sparse; fields the UI wants but the list omits
/// come from a per-pipeline detail fetch (see [`PipelineDetail`]).
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRecord {
    /// Project-scoped pipeline number
    pub iid: Option<u64>,
    /// Pipeline status (e.g. "running", "success", "failed")
    pub status: Option<String>,
    /// Trigger source (e.g. "push", "schedule", "web")
    pub source: Option<String>,
    /// SHA of the pipeline's commit
    pub sha: Option<String>,
    /// Link to the pipeline's page
    pub web_url: Option<String>,
    /// When the pipeline was created
    pub created_at: Option<DateTime<Utc>>,
    /// When the pipeline was updated
    pub updated_at: Option<DateTime<Utc>>,
}

/// Detail record for a single pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDetail {
    /// Runtime in seconds as measured by the server
    pub duration: Option<i64>,
    /// Who triggered the pipeline
    pub user: Option<GitLabUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}
