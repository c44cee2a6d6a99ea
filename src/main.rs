use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gossamer::cli;
use gossamer::settings::{APP_NAME, APP_VERSION};
use gossamer::simulation::Simulation;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gossamer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse args and env vars
    let args = cli::Cli::parse();
    let settings = args.settings()?;
    let config = args.simulation_config();

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    let mut simulation = Simulation::new(config, settings)?;
    let report = simulation.run().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
