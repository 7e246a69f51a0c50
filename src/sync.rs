use std::collections::HashSet;

use log::info;

use crate::error::FeedError;
use crate::model::{Feed, Pipeline, PipelineId};
use crate::poller::PipelineRegistry;
use crate::providers::CCTrayReader;

/// A CCTray endpoint whose project list drives a managed set of
/// pipelines: projects appearing on the server are added, and (when the
/// flag is set) managed pipelines whose project disappeared are removed.
#[derive(Debug, Clone)]
pub struct PipelineSource {
    pub id: String,
    pub url: String,
    pub enabled: bool,
    pub remove_deleted_pipelines: bool,
}

/// Result of the three-way diff between a source's remote project list
/// and the locally tracked pipelines.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub to_add: Vec<Pipeline>,
    pub to_remove: Vec<PipelineId>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Computes what to add and remove, without touching anything.
///
/// Additions are keyed by (project name, source URL) against every
/// tracked pipeline, so a manually added duplicate is never re-added.
/// Removals only ever touch pipelines managed by this source; manual
/// pipelines and other sources' pipelines are left alone. A disabled
/// source plans nothing.
pub fn plan_sync(
    source: &PipelineSource,
    remote_projects: &[String],
    tracked: &[Pipeline],
) -> SyncPlan {
    if !source.enabled {
        return SyncPlan::default();
    }

    let existing: HashSet<(&str, &str)> = tracked
        .iter()
        .map(|p| (p.server_name(), p.feed.url.as_str()))
        .collect();

    let to_add = remote_projects
        .iter()
        .filter(|name| !existing.contains(&(name.as_str(), source.url.as_str())))
        .map(|name| {
            let mut pipeline = Pipeline::new(name, Feed::cctray(&source.url, name));
            pipeline.managed_by_source = Some(source.id.clone());
            pipeline
        })
        .collect();

    let to_remove = if source.remove_deleted_pipelines {
        let remote: HashSet<&str> = remote_projects.iter().map(String::as_str).collect();
        tracked
            .iter()
            .filter(|p| p.managed_by_source.as_deref() == Some(source.id.as_str()))
            .filter(|p| p.feed.url == source.url)
            .filter(|p| !remote.contains(p.server_name()))
            .map(Pipeline::id)
            .collect()
    } else {
        Vec::new()
    };

    SyncPlan { to_add, to_remove }
}

/// Fetches the source's project list and applies the resulting plan to
/// the registry. Returns the applied plan.
pub async fn sync_source(
    source: &PipelineSource,
    reader: &CCTrayReader,
    registry: &PipelineRegistry,
) -> Result<SyncPlan, FeedError> {
    if !source.enabled {
        return Ok(SyncPlan::default());
    }

    let remote_projects = reader.project_names(&source.url).await?;
    let plan = plan_sync(source, &remote_projects, &registry.snapshot());

    if !plan.to_add.is_empty() {
        info!(
            "Source {}: adding {} pipeline(s)",
            source.id,
            plan.to_add.len()
        );
        registry.add_all(plan.to_add.clone());
    }
    for id in &plan.to_remove {
        info!("Source {}: removing {id}", source.id);
        registry.remove(id);
    }

    Ok(plan)
}
