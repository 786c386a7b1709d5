use anyhow::Result;
use clap::{Parser, Subcommand};
use feedline_backend::config::FeedlineConfig;
use feedline_backend::node::FeedlineNode;
use feedline_backend::telemetry;
use feedline_backend::utils;

#[derive(Parser)]
#[command(author, version, about = "Feedline social feed backend")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (Axum) for REST/API access
    Serve,
    /// Create the data directories and apply the database schema, then exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();
    let config = FeedlineConfig::from_env()?;
    let node = FeedlineNode::start(config).await?;
    tracing::info!(app = utils::APP_NAME, "bootstrap complete");

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            node.run_http_server(shutdown_signal()).await?;
            node.shutdown().await;
            tracing::info!("shutdown complete");
            Ok(())
        }
        Command::Migrate => {
            tracing::info!(
                db_path = %node.config().paths.db_path.display(),
                "schema up to date"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
