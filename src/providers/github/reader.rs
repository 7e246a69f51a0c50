use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::auth::SecretStore;
use crate::error::FeedError;
use crate::model::Pipeline;
use crate::providers::{
    pause_reason, rate_limit_resume, transport_error, FeedGroup, PipelineUpdate, PollOutcome,
};

use super::parser::RunsDocument;

const SERVICE: &str = "GitHub";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Reader for GitHub-style workflow-run feeds. One pipeline per feed URL.
pub struct GitHubReader {
    client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
}

impl GitHubReader {
    pub fn new(client: reqwest::Client, secrets: Arc<dyn SecretStore>) -> Self {
        Self { client, secrets }
    }

    pub async fn update(&self, group: &FeedGroup) -> Vec<PipelineUpdate> {
        let mut updates = Vec::with_capacity(group.pipelines.len());
        for pipeline in &group.pipelines {
            let outcome = self.update_pipeline(pipeline).await;
            updates.push(PipelineUpdate::new(pipeline.id(), outcome));
        }
        updates
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> PollOutcome {
        // The scheduler skips paused feeds; re-check so a direct caller
        // cannot storm a server that asked us to back off.
        if pipeline.feed.is_paused(Utc::now()) {
            return PollOutcome::Skipped;
        }

        let mut request = self.client.get(&pipeline.feed.url);
        if let Some(token) = self.secrets.token_for(SERVICE) {
            request = request.bearer_auth(token.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return PollOutcome::Failed(transport_error(&err)),
        };

        let status = response.status();
        if let Some(resume_at) = rate_limit_resume(
            status.as_u16(),
            response.headers(),
            RATE_LIMIT_REMAINING,
            RATE_LIMIT_RESET,
        ) {
            debug!("GitHub rate limit on {}, resume at {resume_at}", pipeline.feed.url);
            return PollOutcome::RateLimited {
                resume_at,
                reason: pause_reason(resume_at),
            };
        }
        if !status.is_success() {
            return PollOutcome::Failed(FeedError::HttpStatus(status.as_u16()));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return PollOutcome::Failed(transport_error(&err)),
        };

        match RunsDocument::parse(&body) {
            Ok(document) => match document.status_for(&pipeline.name) {
                Some(status) => PollOutcome::Status(status),
                None => PollOutcome::Failed(FeedError::NoStatusAvailable),
            },
            Err(err) => PollOutcome::Failed(err),
        }
    }
}
