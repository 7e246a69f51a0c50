use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a pipeline is currently building, idle, or in an indeterminate
/// state. `Other` means "no information yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Building,
    Sleeping,
    #[default]
    Other,
}

/// Outcome of a completed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Success,
    Failure,
    #[default]
    Unknown,
    Other,
}

/// One execution record of a pipeline, in progress or completed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Build {
    pub result: BuildResult,
    /// Server-assigned run identifier, used for follow-up detail fetches.
    pub id: Option<String>,
    /// Human build number or tag.
    pub label: Option<String>,
    /// Start time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Elapsed seconds. Once derived by the merge step this survives
    /// later polls whose payload omits it (see `model::merge`).
    pub duration: Option<i64>,
    pub message: Option<String>,
    pub user: Option<String>,
    pub avatar: Option<String>,
}

/// What is currently known about a pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Status {
    pub activity: Activity,
    /// Present only while `activity == Building`.
    pub current_build: Option<Build>,
    /// The most recently completed build.
    pub last_build: Option<Build>,
    /// Link to a human-viewable page for the current/last build.
    pub web_url: Option<String>,
}

impl Status {
    /// Label of the last completed build, if known.
    pub fn last_label(&self) -> Option<&str> {
        self.last_build.as_ref().and_then(|b| b.label.as_deref())
    }
}
