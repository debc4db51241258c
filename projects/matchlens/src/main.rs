mod cli;
mod error;
mod job;
mod pipeline;
mod video;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use job::JobRegistry;
use pipeline::backends::DefaultBackendFactory;
use pipeline::types::parse_products;
use std::sync::Arc;
use web::server::{run_server, ServerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    let config = Arc::new(args.engine.pipeline_config());
    let factory = Arc::new(DefaultBackendFactory::new(&args.engine));

    match args.command {
        Command::Serve {
            host,
            port,
            workers,
        } => {
            let settings = ServerSettings {
                host,
                port,
                workers: workers.max(1),
                media_root: args.engine.media_root.clone(),
                max_seconds: args.engine.max_seconds,
            };
            run_server(settings, config, factory).await?;
        }
        Command::Process { input, produce } => {
            let produce = parse_products(&produce)?;
            let registry = Arc::new(JobRegistry::load(&args.engine.media_root)?);
            let job = registry.create(input, produce)?;
            let media_root = args.engine.media_root.clone();

            let outputs = tokio::task::spawn_blocking(move || {
                pipeline::orchestrator::process_with_progress_bar(
                    job,
                    factory.as_ref(),
                    &config,
                    &media_root,
                )
            })
            .await??;

            println!("{}", serde_json::to_string_pretty(&outputs)?);
        }
    }

    Ok(())
}
