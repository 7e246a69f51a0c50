use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::auth::SecretStore;
use crate::error::FeedError;
use crate::model::{Build, Pipeline};
use crate::providers::{
    pause_reason, rate_limit_resume, transport_error, FeedGroup, PipelineUpdate, PollOutcome,
};

use super::parser::PipelinesDocument;
use super::types::PipelineDetail;

const SERVICE: &str = "GitLab";
const RATE_LIMIT_REMAINING: &str = "ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "ratelimit-reset";

/// Reader for GitLab-style pipeline feeds. One pipeline per feed URL.
///
/// After the list fetch the current and last build are enriched through
/// per-pipeline detail requests, each independently; a failed detail
/// fetch keeps the un-enriched build rather than discarding the update.
pub struct GitLabReader {
    client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
}

impl GitLabReader {
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
        if pipeline.feed.is_paused(Utc::now()) {
            return PollOutcome::Skipped;
        }

        let body = match self.fetch(&pipeline.feed.url).await {
            Ok(body) => body,
            Err(FeedError::RateLimited { resume_at }) => {
                debug!("GitLab rate limit on {}, resume at {resume_at}", pipeline.feed.url);
                return PollOutcome::RateLimited {
                    resume_at,
                    reason: pause_reason(resume_at),
                };
            }
            Err(err) => return PollOutcome::Failed(err),
        };

        let document = match PipelinesDocument::parse(&body) {
            Ok(document) => document,
            Err(err) => return PollOutcome::Failed(err),
        };

        let Some(mut status) = document.status() else {
            return PollOutcome::Failed(FeedError::NoStatusAvailable);
        };

        if let Some(build) = status.current_build.take() {
            status.current_build = Some(self.enrich(&pipeline.feed.url, build).await);
        }
        if let Some(build) = status.last_build.take() {
            status.last_build = Some(self.enrich(&pipeline.feed.url, build).await);
        }

        PollOutcome::Status(status)
    }

    /// Fills build fields the list endpoint does not carry. Best-effort:
    /// any failure leaves the build as parsed from the list.
    async fn enrich(&self, feed_url: &str, mut build: Build) -> Build {
        let Some(id) = build.id.clone() else {
            return build;
        };
        if build.duration.is_some() && build.user.is_some() && build.avatar.is_some() {
            return build;
        }

        let detail_url = format!("{}/{}", feed_url.trim_end_matches('/'), id);
        let detail: PipelineDetail = match self.fetch(&detail_url).await {
            Ok(body) => match serde_json::from_slice(&body) {
                Ok(detail) => detail,
                Err(err) => {
                    debug!("Detail for pipeline {id} unreadable: {err}");
                    return build;
                }
            },
            Err(err) => {
                debug!("Detail fetch for pipeline {id} failed: {err:?}");
                return build;
            }
        };

        if build.duration.is_none() {
            build.duration = detail.duration;
        }
        if let Some(user) = detail.user {
            if build.user.is_none() {
                build.user = user.name.or(user.username);
            }
            if build.avatar.is_none() {
                build.avatar = user.avatar_url;
            }
        }

        build
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let mut request = self.client.get(url);
        if let Some(token) = self.secrets.token_for(SERVICE) {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();

        if let Some(resume_at) = rate_limit_resume(
            status.as_u16(),
            response.headers(),
            RATE_LIMIT_REMAINING,
            RATE_LIMIT_RESET,
        ) {
            return Err(FeedError::RateLimited { resume_at });
        }
        if !status.is_success() {
            return Err(FeedError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| transport_error(&e))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemorySecretStore, Token};
    use crate::model::{Activity, Feed, FeedType};
    use crate::providers::http_client;

    const PIPELINES: &str = r#"[
        { "iid": 14, "status": "running", "source": "push",
          "sha": "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3",
          "web_url": "https://gitlab.example.com/g/p/-/pipelines/14",
          "created_at": "2024-04-02T11:00:00Z", "updated_at": "2024-04-02T11:00:05Z" },
        { "iid": 12, "status": "success", "source": "schedule",
          "sha": "b94a8fe5ccb19ba61c4c0873d391e987982fbbd3",
          "web_url": "https://gitlab.example.com/g/p/-/pipelines/12",
          "created_at": "2024-04-02T10:00:00Z", "updated_at": "2024-04-02T10:05:00Z" }
    ]"#;

    fn pipeline_for(url: &str) -> Pipeline {
        Pipeline::new("group/project", Feed::new(FeedType::GitLab, url))
    }

    fn group_of(pipeline: Pipeline) -> FeedGroup {
        FeedGroup {
            key: pipeline.feed.group_key(),
            pipelines: vec![pipeline],
        }
    }

    fn reader_with(secrets: MemorySecretStore) -> GitLabReader {
        GitLabReader::new(http_client(), Arc::new(secrets))
    }

    #[tokio::test]
    async fn test_detail_fetches_enrich_current_and_last_build() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pipelines")
            .with_status(200)
            .with_body(PIPELINES)
            .create_async()
            .await;
        let current_detail = server
            .mock("GET", "/pipelines/14")
            .with_status(200)
            .with_body(r#"{ "duration": null, "user": { "name": "Dev One", "avatar_url": "https://a/1" } }"#)
            .create_async()
            .await;
        let last_detail = server
            .mock("GET", "/pipelines/12")
            .with_status(200)
            .with_body(r#"{ "duration": 290, "user": { "name": "Dev Two", "avatar_url": "https://a/2" } }"#)
            .create_async()
            .await;

        let group = group_of(pipeline_for(&format!("{}/pipelines", server.url())));
        let updates = reader_with(MemorySecretStore::new()).update(&group).await;

        current_detail.assert_async().await;
        last_detail.assert_async().await;

        let PollOutcome::Status(status) = &updates[0].outcome else {
            panic!("expected a status, got {:?}", updates[0].outcome);
        };
        assert_eq!(status.activity, Activity::Building);
        assert_eq!(
            status.current_build.as_ref().unwrap().user.as_deref(),
            Some("Dev One")
        );
        let last = status.last_build.as_ref().unwrap();
        assert_eq!(last.user.as_deref(), Some("Dev Two"));
        // List-derived duration wins; detail only fills gaps.
        assert_eq!(last.duration, Some(300));
    }

    #[tokio::test]
    async fn test_failed_enrichment_keeps_the_list_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pipelines")
            .with_status(200)
            .with_body(PIPELINES)
            .create_async()
            .await;
        server
            .mock("GET", "/pipelines/14")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/pipelines/12")
            .with_status(500)
            .create_async()
            .await;

        let group = group_of(pipeline_for(&format!("{}/pipelines", server.url())));
        let updates = reader_with(MemorySecretStore::new()).update(&group).await;

        let PollOutcome::Status(status) = &updates[0].outcome else {
            panic!("expected a status, got {:?}", updates[0].outcome);
        };
        assert_eq!(
            status.current_build.as_ref().unwrap().label.as_deref(),
            Some("14")
        );
        assert!(status.current_build.as_ref().unwrap().user.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_headers_pause_the_feed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pipelines")
            .with_status(429)
            .with_header("RateLimit-Remaining", "0")
            .with_header("RateLimit-Reset", "1700000600")
            .create_async()
            .await;

        let group = group_of(pipeline_for(&format!("{}/pipelines", server.url())));
        let updates = reader_with(MemorySecretStore::new()).update(&group).await;

        let PollOutcome::RateLimited { resume_at, .. } = &updates[0].outcome else {
            panic!("expected a rate limit, got {:?}", updates[0].outcome);
        };
        assert_eq!(resume_at.timestamp(), 1_700_000_600);
    }

    #[tokio::test]
    async fn test_bearer_token_is_attached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pipelines")
            .match_header("authorization", "Bearer gl-token")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let mut secrets = MemorySecretStore::new();
        secrets.set_token(SERVICE, Token::from("gl-token"));

        let group = group_of(pipeline_for(&format!("{}/pipelines", server.url())));
        let updates = reader_with(secrets).update(&group).await;

        mock.assert_async().await;
        // An empty project list means the server had nothing for us.
        assert!(matches!(
            updates[0].outcome,
            PollOutcome::Failed(FeedError::NoStatusAvailable)
        ));
    }
}
