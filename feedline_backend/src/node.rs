use crate::api;
use crate::bootstrap::{self, BootstrapResources};
use crate::config::FeedlineConfig;
use crate::context::FeedContext;
use crate::database::Database;
use anyhow::Result;
use std::future::Future;

/// Bootstraps the backend once and hands out cloned handles to whichever
/// entrypoint needs them.
pub struct FeedlineNode {
    config: FeedlineConfig,
    bootstrap: BootstrapResources,
    context: FeedContext,
}

impl FeedlineNode {
    pub async fn start(config: FeedlineConfig) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config).await?;
        let context = FeedContext::new(bootstrap.database.clone(), &config);

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            database_initialized = bootstrap.database_initialized,
            db_path = %config.paths.db_path.display(),
            "feedline node initialized"
        );

        Ok(Self {
            config,
            bootstrap,
            context,
        })
    }

    pub fn config(&self) -> &FeedlineConfig {
        &self.config
    }

    pub fn context(&self) -> FeedContext {
        self.context.clone()
    }

    pub fn database(&self) -> Database {
        self.bootstrap.database.clone()
    }

    /// Runs the REST API server until `shutdown` resolves.
    pub async fn run_http_server<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        api::serve_http(self.config.clone(), self.context(), shutdown).await
    }

    /// Waits for queued background jobs and stops accepting new ones.
    pub async fn shutdown(&self) {
        self.context.live.close();
        let pending = self.context.tasks.in_flight();
        if pending > 0 {
            tracing::info!(pending, "waiting for background jobs");
        }
        self.context.tasks.shutdown().await;
    }
}
