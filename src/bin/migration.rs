use clap::{Parser, Subcommand};
use storefront_api::migrator::{reset_migrations, run_migration};
use tracing::info;

/// Applies or rolls back the storefront schema
#[derive(Parser)]
#[command(name = "migration", version)]
struct Cli {
    /// Database URL, falls back to DATABASE_URL then APP__DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Up,
    /// Roll back every applied migration
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let database_url = cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .or_else(|| std::env::var("APP__DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite://storefront.db?mode=rwc".to_string());

    info!("Starting database migration");

    match cli.command.unwrap_or(Command::Up) {
        Command::Up => run_migration(&database_url).await?,
        Command::Reset => reset_migrations(&database_url).await?,
    }

    Ok(())
}
