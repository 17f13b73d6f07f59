// Main entry point for the extraction CLI and dashboard API

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use csrd_extraction::{
    export_csv, Extractor, IndicatorCatalog, OpenAiExtractor, Orchestrator, ResultStore,
    SqliteStore,
};
use csrd_server::{
    discovery::{discover_jobs, parse_company_arg},
    server::{build_app, AppState},
    Config,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXPORT_FILE: &str = "csrd_indicators.csv";

#[derive(Parser)]
#[command(name = "csrd")]
#[command(about = "Extract CSRD sustainability indicators from annual reports")]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Indicator catalog file, JSON or TOML (overrides INDICATORS_PATH)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract indicators for every company and export CSV
    Run {
        /// Company document as NAME=PATH (repeatable); default: discover in the data directory
        #[arg(long = "company", value_name = "NAME=PATH")]
        companies: Vec<String>,

        /// Report year for explicit companies and undated file names
        #[arg(long)]
        year: Option<i32>,

        /// CSV output path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print per-company summaries and low-confidence rows
    Summary {
        /// Confidence threshold (overrides CONFIDENCE_THRESHOLD)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Export stored results to CSV
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },

    /// List the indicator catalog
    Indicators,

    /// Delete stored results for a company
    Delete {
        company: String,
        #[arg(long)]
        year: Option<i32>,
    },

    /// Serve the dashboard API
    Serve {
        /// Port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,csrd_extraction=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(path) = cli.catalog {
        config.indicators_path = Some(path);
    }

    match cli.command {
        Commands::Indicators => list_indicators(&config),
        Commands::Run {
            companies,
            year,
            output,
        } => run(config, companies, year, output).await,
        Commands::Summary { threshold } => summary(&config, threshold).await,
        Commands::Export {
            output,
            company,
            year,
        } => {
            let store = connect(&config).await?;
            let path = output.unwrap_or_else(|| config.data_output_dir.join(EXPORT_FILE));
            let rows = export_csv(store.as_ref(), &path, company.as_deref(), year)
                .await
                .context("Failed to export results")?;
            println!("Exported {} rows to {}", rows, path.display());
            Ok(())
        }
        Commands::Delete { company, year } => {
            let store = connect(&config).await?;
            let deleted = store
                .delete_company(&company, year)
                .await
                .context("Failed to delete results")?;
            println!("Deleted {} rows for {}", deleted, company);
            Ok(())
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
    }
}

fn load_catalog(config: &Config) -> Result<Arc<IndicatorCatalog>> {
    let catalog = match &config.indicators_path {
        Some(path) => IndicatorCatalog::from_path(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => IndicatorCatalog::builtin(),
    };
    Ok(Arc::new(catalog))
}

async fn connect(config: &Config) -> Result<Arc<SqliteStore>> {
    tracing::info!("Connecting to database...");
    let store = SqliteStore::new(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");
    Ok(Arc::new(store))
}

fn build_extractor(config: &Config) -> Result<OpenAiExtractor> {
    let Some(key) = config.openai_api_key.clone() else {
        bail!("OPENAI_API_KEY must be set");
    };
    let mut extractor = OpenAiExtractor::new(key)
        .with_model(&config.model_name)
        .with_temperature(config.temperature);
    if let Some(url) = &config.openai_base_url {
        extractor = extractor.with_base_url(url);
    }
    Ok(extractor)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight extraction");
            token.cancel();
        }
    });
}

fn list_indicators(config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    for group in catalog.groups() {
        println!("{}", group.category);
        for def in &group.indicators {
            println!("  {:<4} {} [{}]", def.id, def.name, def.expected_unit);
        }
    }
    println!("{} indicators", catalog.len());
    Ok(())
}

async fn run(
    config: Config,
    companies: Vec<String>,
    year: Option<i32>,
    output: Option<PathBuf>,
) -> Result<()> {
    let year = year.unwrap_or(config.report_year);
    let jobs = if companies.is_empty() {
        discover_jobs(&config.data_raw_dir, year)?
    } else {
        companies
            .iter()
            .map(|arg| parse_company_arg(arg, year))
            .collect::<Result<Vec<_>>>()?
    };
    if jobs.is_empty() {
        bail!("No documents found in {}", config.data_raw_dir.display());
    }

    let catalog = load_catalog(&config)?;
    let store = connect(&config).await?;
    let extractor: Arc<dyn Extractor> = Arc::new(build_extractor(&config)?);
    tracing::info!(
        companies = jobs.len(),
        indicators = catalog.len(),
        model = extractor.name(),
        "Starting extraction"
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let orchestrator = Orchestrator::new(extractor, store.clone(), catalog)
        .with_config(config.pipeline_config())
        .with_cancellation(cancel);
    let report = orchestrator.run(jobs).await;
    println!("{}", report);

    let path = output.unwrap_or_else(|| config.data_output_dir.join(EXPORT_FILE));
    let rows = export_csv(store.as_ref(), &path, None, None)
        .await
        .context("Failed to export results")?;
    println!("Exported {} rows to {}", rows, path.display());

    if report.succeeded() == 0 {
        bail!("every company failed");
    }
    Ok(())
}

async fn summary(config: &Config, threshold: Option<f64>) -> Result<()> {
    let store = connect(config).await?;
    let threshold = threshold.unwrap_or(config.confidence_threshold);

    let summaries = store.summaries().await.context("Failed to read summaries")?;
    if summaries.is_empty() {
        println!("No results stored yet");
        return Ok(());
    }

    println!(
        "{:<24} {:>6} {:>9} {:>10} {:>8}",
        "company", "year", "extracted", "accuracy", "avg conf"
    );
    for s in &summaries {
        println!(
            "{:<24} {:>6} {:>5}/{:<3} {:>9.1}% {:>8.3}",
            s.company, s.report_year, s.extracted_count, s.total_indicators, s.accuracy_percent,
            s.avg_confidence
        );
    }

    let flagged: Vec<_> = store
        .low_confidence(threshold)
        .await
        .context("Failed to read low-confidence rows")?
        .into_iter()
        .filter(|r| r.is_extracted())
        .collect();
    if !flagged.is_empty() {
        println!("\nExtracted values below confidence {:.2}:", threshold);
        for r in flagged {
            println!(
                "  {} {} {}: {} {} ({:.2})",
                r.company,
                r.report_year,
                r.indicator_id,
                r.value.map(|v| v.to_string()).unwrap_or_default(),
                r.unit,
                r.confidence
            );
        }
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let catalog = load_catalog(&config)?;
    let store = connect(&config).await?;
    let store: Arc<dyn ResultStore> = store;

    let extractor: Arc<dyn Extractor> = match build_extractor(&config) {
        Ok(extractor) => Arc::new(extractor),
        Err(e) => {
            tracing::warn!(error = %e, "Model not configured; extraction runs will fail");
            Arc::new(OpenAiExtractor::new(""))
        }
    };

    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(extractor, store.clone(), catalog)
        .with_config(config.pipeline_config())
        .with_cancellation(cancel.clone());

    let state = AppState::new(
        store,
        orchestrator,
        config.data_raw_dir.clone(),
        config.report_year,
        config.confidence_threshold,
    );
    let app = build_app(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);
    log_data_dir(&config.data_raw_dir);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            cancel.cancel();
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn log_data_dir(dir: &Path) {
    if dir.is_dir() {
        tracing::info!(dir = %dir.display(), "Serving extraction runs from data directory");
    } else {
        tracing::warn!(dir = %dir.display(), "Data directory does not exist");
    }
}
