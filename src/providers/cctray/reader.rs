use std::sync::Arc;

use log::debug;
use url::Url;

use crate::auth::SecretStore;
use crate::error::FeedError;
use crate::providers::{transport_error, FeedGroup, PipelineUpdate, PollOutcome};

use super::parser::StatusDocument;

/// Reader for CCTray-style XML status feeds.
///
/// Operates on a whole feed group: one GET per poll cycle no matter how
/// many pipelines share the URL, then a per-pipeline lookup into the
/// parsed document.
pub struct CCTrayReader {
    client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
}

impl CCTrayReader {
    pub fn new(client: reqwest::Client, secrets: Arc<dyn SecretStore>) -> Self {
        Self { client, secrets }
    }

    pub async fn update(&self, group: &FeedGroup) -> Vec<PipelineUpdate> {
        match self.fetch_document(&group.key.url).await {
            Ok(document) => group
                .pipelines
                .iter()
                .map(|pipeline| {
                    let outcome = match document.status_for(pipeline.server_name()) {
                        Some(status) => PollOutcome::Status(status),
                        None => PollOutcome::Failed(FeedError::NoStatusAvailable),
                    };
                    PipelineUpdate::new(pipeline.id(), outcome)
                })
                .collect(),
            Err(err) => {
                debug!("CCTray fetch for {} failed: {err:?}", group.key.url);
                group
                    .pipelines
                    .iter()
                    .map(|pipeline| {
                        PipelineUpdate::new(pipeline.id(), PollOutcome::Failed(err.clone()))
                    })
                    .collect()
            }
        }
    }

    pub(crate) async fn fetch_document(&self, url: &str) -> Result<StatusDocument, FeedError> {
        let parsed = Url::parse(url).map_err(|_| FeedError::InvalidUrl(url.to_string()))?;

        let user = parsed.username().to_string();
        let mut request_url = parsed;
        if !user.is_empty() {
            // Credentials travel as an Authorization header, not in the
            // request line.
            let _ = request_url.set_username("");
            let _ = request_url.set_password(None);
        }

        let mut request = self.client.get(request_url);
        if !user.is_empty() {
            let password = self
                .secrets
                .password_for(url)
                .ok_or(FeedError::MissingCredential(user.clone()))?;
            request = request.basic_auth(&user, Some(password));
        }

        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| transport_error(&e))?;
        StatusDocument::parse(&body)
    }

    /// Full project list behind a feed URL, for dynamic feed sync.
    pub async fn project_names(&self, url: &str) -> Result<Vec<String>, FeedError> {
        Ok(self.fetch_document(url).await?.project_names())
    }
}
