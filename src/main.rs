use std::net::IpAddr;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use mediamon::config::Settings;

#[derive(Debug, Parser)]
#[command(name = "mediamon", version, about = "Media monitoring mail ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the ingestion endpoint over HTTP
    Serve(ServeArgs),
    /// Run one ingestion and print the result as JSON
    Ingest,
    /// Show how many records are stored
    Stats,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "ADDRESS", default_value = "0.0.0.0")]
    address: IpAddr,
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rocket=warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{anyhow, Context, Result};
    use serde::Serialize;

    use mediamon::server::{self, AppState, ServerConfig};

    use super::{Cli, Commands, ServeArgs};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Serve(args) => handle_serve(&cli.settings, args).await,
            Commands::Ingest => handle_ingest(&cli.settings).await,
            Commands::Stats => handle_stats(&cli.settings).await,
        }
    }

    async fn handle_serve(settings: &mediamon::config::Settings, args: ServeArgs) -> Result<()> {
        let store = settings.connect_store().await?;
        let pipeline = settings.build_pipeline(store)?;
        let state = AppState {
            pipeline,
            default_query: settings.default_query(),
        };
        let config = ServerConfig {
            address: args.address,
            port: args.port,
        };

        tracing::info!(address = %config.address, port = config.port, "listening");
        server::build(state, &config)
            .launch()
            .await
            .map_err(|error| anyhow!("http server failed: {error}"))?;
        Ok(())
    }

    async fn handle_ingest(settings: &mediamon::config::Settings) -> Result<()> {
        let store = settings.connect_store().await?;
        let pipeline = settings.build_pipeline(store)?;
        let query = settings.default_query();

        let result = pipeline
            .run(&query)
            .await
            .with_context(|| format!("ingest mail from {} into {}", query.sender, query.mailbox))?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }

    async fn handle_stats(settings: &mediamon::config::Settings) -> Result<()> {
        #[derive(Serialize)]
        struct StatsPayload {
            database: String,
            records: i64,
            latest_received_at: Option<String>,
        }

        let store = settings.connect_store().await?;
        let payload = StatsPayload {
            database: store.path().display().to_string(),
            records: store.count().context("count stored records")?,
            latest_received_at: store
                .latest_received_at()
                .context("read latest received timestamp")?,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        Ok(())
    }
}
