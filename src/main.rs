use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use text2sql::config::AppConfig;
use text2sql::db::connect_checked;
use text2sql::ingestion::{apply_schema, NorthwindLoader};
use text2sql::Text2SqlPipeline;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "text2sql")]
#[command(about = "Ask questions of the Northwind database in plain English")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, validate and run SQL for a question
    Ask {
        question: String,

        /// Use the canned generator instead of the LLM
        #[arg(long)]
        mock: bool,
    },
    /// Load the normalized Northwind CSVs
    Load {
        #[arg(short, long, default_value = "data/normalized")]
        data_dir: PathBuf,
    },
    /// Apply a DDL script (needs a role that can create tables)
    ApplySchema {
        #[arg(short, long, default_value = "schema/northwind.sql")]
        schema: PathBuf,
    },
    /// Check that the database is reachable
    CheckDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    match args.command {
        Command::Ask { question, mock } => {
            let pipeline = Text2SqlPipeline::from_config(&config, mock)?;
            match pipeline.generate_and_execute(&question).await {
                Ok(response) => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                Err(e) => {
                    error!(reason = e.reason_code(), "{}", e);
                    return Err(e.into());
                }
            }
        }
        Command::Load { data_dir } => {
            let pool = connect_checked(&config.database)
                .await
                .context("Failed to connect to database")?;
            let loader = NorthwindLoader::new(pool, data_dir);
            let reports = loader.load_all().await?;
            let total: usize = reports.iter().map(|r| r.rows).sum();
            info!("Loaded {} rows across {} tables from {}", total, reports.len(), loader.data_dir().display());
        }
        Command::ApplySchema { schema } => {
            let pool = connect_checked(&config.database)
                .await
                .context("Failed to connect to database")?;
            apply_schema(&pool, &schema).await?;
        }
        Command::CheckDb => {
            connect_checked(&config.database)
                .await
                .context("Database check failed")?;
            println!(
                "Connected to {} on {}:{}",
                config.database.name, config.database.host, config.database.port
            );
        }
    }

    Ok(())
}
