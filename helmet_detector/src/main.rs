use clap::Parser;
use helmet_detector::{
    cli::{Cli, Command},
    config, run_scan, start_app,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::get_configuration(cli.config_dir.as_deref())?;
    let log_level = &format!("{},ort=info", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    match cli.command() {
        Command::Serve => start_app(config).await?,
        Command::Scan { path, output } => {
            let summary = run_scan(&config, &path, output.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
