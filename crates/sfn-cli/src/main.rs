use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sfn_storage::PgStore;
use sfn_sync::{FileSettingsStore, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sfn-cli")]
#[command(about = "Spaceflight News ingest command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline once with the stored settings.
    Fetch,
    Migrate,
    /// Web surface, plus the periodic job when SFN_SCHEDULER_ENABLED is set.
    Serve,
    /// Print the resolved settings.
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            let result = sfn_sync::run_once_from_env().await?;
            println!(
                "fetch {}: count={} from_cache={} message={}",
                if result.success { "complete" } else { "failed" },
                result.count,
                result.from_cache,
                result.message
            );
            if !result.success {
                bail!("fetch failed: {}", result.message);
            }
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let Some(url) = config.database_url else {
                bail!("DATABASE_URL is not set");
            };
            PgStore::connect(&url).await?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => sfn_web::serve_from_env().await?,
        Commands::Settings => {
            let config = SyncConfig::from_env();
            let settings = FileSettingsStore::new(config.settings_path).current().await?;
            print!("{}", serde_yaml::to_string(&settings).context("rendering settings")?);
        }
    }

    Ok(())
}
