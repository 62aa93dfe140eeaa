//! trapmetrics command-line client
//!
//! Resolves the configured check and, with `run`, flushes a heartbeat counter
//! to it until interrupted.

use clap::Parser;
use std::sync::Arc;
use trapmetrics::cli::{Cli, Command, generate_config_template};
use trapmetrics::{Config, FlushOutcome, MetricsClient, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Configuration template written to {}", path);
                }
                None => print!("{}", template),
            }
            Ok(())
        }
        Some(Command::Resolve) => {
            let client = load_client(&cli.config)?;
            let target = client.resolve().await?;

            println!("submission_url = {}", target.url);
            println!("tls = {}", target.tls);
            if let Some(server_name) = &target.server_name {
                println!("server_name = {}", server_name);
            }
            if let Some(bundle) = client.resolver().bundle() {
                println!("check_bundle = {}", bundle.cid.unwrap_or_default());
                println!("metrics = {}", bundle.metrics.len());
            }
            Ok(())
        }
        Some(Command::Run { heartbeat }) => run(&cli.config, &heartbeat).await,
        None => run(&cli.config, "trapmetrics.heartbeat").await,
    }
}

fn load_client(path: &str) -> Result<MetricsClient, Box<dyn std::error::Error>> {
    let config = Config::from_file(path)?;
    telemetry::init(&config.observability.log_level);
    Ok(MetricsClient::new(config)?)
}

async fn run(path: &str, heartbeat: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = Arc::new(load_client(path)?);

    tracing::info!(
        config = %path,
        interval_seconds = client.config().flush.interval_seconds,
        "Starting trapmetrics client"
    );

    client.start();

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => client.increment(heartbeat),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    match client.shutdown().await {
        FlushOutcome::Failed(e) => tracing::warn!(error = %e, "Final flush failed"),
        outcome => tracing::info!(outcome = ?outcome, "Final flush complete"),
    }
    if let Ok(rendered) = client.stats().render() {
        tracing::debug!(stats = %rendered, "Client stats at shutdown");
    }
    Ok(())
}
