use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::auth::{MemorySecretStore, SecretStore};
use crate::config::Config;
use crate::model::StatusChangeKind;
use crate::poller::{PipelineRegistry, PollScheduler};
use crate::providers::{http_client, CCTrayReader};
use crate::sync::sync_source;

#[derive(Parser)]
#[command(name = "buildwatch")]
#[command(author, version, about = "CI pipeline status monitor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor all configured pipelines continuously
    Run {
        /// Override the configured poll interval (seconds)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Poll every feed once and print the resulting statuses as JSON
    Poll {
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, default_value_t = false)]
        pretty: bool,
    },

    /// Reconcile dynamically managed pipelines against their sources
    Sync {
        /// Compute and print the plan without applying it
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Run { interval } => self.execute_run(&config, *interval).await,
            Commands::Poll { output, pretty } => {
                self.execute_poll(&config, output.as_deref(), *pretty).await
            }
            Commands::Sync { dry_run } => self.execute_sync(&config, *dry_run).await,
        }
    }

    async fn execute_run(&self, config: &Config, interval: Option<u64>) -> Result<()> {
        let pipelines = config.pipelines()?;
        if pipelines.is_empty() && config.sources.is_empty() {
            anyhow::bail!("No pipelines or sources configured");
        }

        let secrets: Arc<dyn SecretStore> =
            Arc::new(MemorySecretStore::from_config(&config.auth));
        let (registry, added_rx) = PipelineRegistry::new();
        let registry = Arc::new(registry);
        registry.add_all(pipelines);

        // Expand dynamic sources before the first poll so their
        // pipelines are part of the initial cycle.
        let reader = CCTrayReader::new(http_client(), Arc::clone(&secrets));
        let sources = config.sources();
        let results = join_all(
            sources
                .iter()
                .map(|source| sync_source(source, &reader, &registry)),
        )
        .await;
        for (source, result) in sources.iter().zip(results) {
            if let Err(err) = result {
                warn!("Source {} failed to sync: {err}", source.id);
            }
        }

        let poll_interval = interval.unwrap_or(config.settings.poll_interval);
        info!(
            "Monitoring {} pipeline(s), polling every {poll_interval}s",
            registry.len()
        );

        let mut events = registry.subscribe();
        let event_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} pipeline event(s)");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(pipeline) = event_registry.get(&event.id) else {
                    continue;
                };
                match event.change {
                    Some(StatusChangeKind::Start) => {
                        info!("{}: build started", pipeline.name);
                    }
                    Some(StatusChangeKind::Completion) => {
                        info!(
                            "{}: build finished ({:?})",
                            pipeline.name,
                            pipeline
                                .status
                                .last_build
                                .as_ref()
                                .map(|b| b.result)
                                .unwrap_or_default()
                        );
                    }
                    _ => {
                        if let Some(error) = &pipeline.connection_error {
                            warn!("{}: {error}", pipeline.name);
                        } else if let Some(reason) = &pipeline.feed.pause_reason {
                            warn!("{}: {reason}", pipeline.name);
                        }
                    }
                }
            }
        });

        let scheduler = PollScheduler::new(registry, secrets, poll_interval, added_rx);
        scheduler.run().await;

        Ok(())
    }

    async fn execute_poll(
        &self,
        config: &Config,
        output: Option<&std::path::Path>,
        pretty: bool,
    ) -> Result<()> {
        let pipelines = config.pipelines()?;
        if pipelines.is_empty() {
            anyhow::bail!("No pipelines configured");
        }

        let secrets = Arc::new(MemorySecretStore::from_config(&config.auth));
        let (registry, added_rx) = PipelineRegistry::new();
        let registry = Arc::new(registry);
        registry.add_all(pipelines);

        let mut scheduler = PollScheduler::new(
            Arc::clone(&registry),
            secrets,
            config.settings.poll_interval,
            added_rx,
        );
        scheduler.poll_once().await;

        let snapshot = registry.snapshot();
        let json_output = if pretty {
            serde_json::to_string_pretty(&snapshot)?
        } else {
            serde_json::to_string(&snapshot)?
        };

        if let Some(output_path) = output {
            std::fs::write(output_path, json_output)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            info!("Statuses written to: {}", output_path.display());
        } else {
            println!("{}", json_output);
        }

        Ok(())
    }

    async fn execute_sync(&self, config: &Config, dry_run: bool) -> Result<()> {
        let sources = config.sources();
        if sources.is_empty() {
            anyhow::bail!("No sources configured");
        }

        let secrets = Arc::new(MemorySecretStore::from_config(&config.auth));
        let (registry, _added_rx) = PipelineRegistry::new();
        registry.add_all(config.pipelines()?);

        let reader = CCTrayReader::new(http_client(), secrets);
        for source in sources {
            if dry_run {
                let remote = reader
                    .project_names(&source.url)
                    .await
                    .map_err(|err| anyhow::anyhow!("Source {}: {err}", source.id))?;
                let plan = crate::sync::plan_sync(&source, &remote, &registry.snapshot());
                println!(
                    "{}: +{} -{}",
                    source.id,
                    plan.to_add.len(),
                    plan.to_remove.len()
                );
                for pipeline in &plan.to_add {
                    println!("  + {}", pipeline.name);
                }
                for id in &plan.to_remove {
                    println!("  - {}", id);
                }
            } else {
                let plan = sync_source(&source, &reader, &registry)
                    .await
                    .map_err(|err| anyhow::anyhow!("Source {}: {err}", source.id))?;
                info!(
                    "Source {}: added {}, removed {}",
                    source.id,
                    plan.to_add.len(),
                    plan.to_remove.len()
                );
            }
        }

        Ok(())
    }
}
