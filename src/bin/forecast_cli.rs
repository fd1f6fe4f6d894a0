use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;

use menu_forecast::{
    config,
    middleware_helpers::retry::RetryConfig,
    ml::{
        evaluation::{EvaluationSummary, Evaluator},
        ModelTrainer, RecursiveForecaster, RidgeFitter, TrainingReport, DEFAULT_MIN_HISTORY_ROWS,
    },
    models::{group_by_item, ForecastDocument, SalesRecord},
    repositories::{
        CsvSalesSource, FileModelStore, FirestoreClient, ForecastRepository, JsonForecastFile,
        ModelRepository, SalesRepository,
    },
    services::{
        ForecastSink, ForecastingService, TrainingOutcome, WriteReport, FIRESTORE_BATCH_LIMIT,
    },
};

const DEFAULT_OUTPUT: &str = "current_forecasts.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_tracing(&cli.log_level, false);

    match cli.command {
        Commands::Train(args) => handle_train(&cli.uid, args, cli.json).await,
        Commands::Forecast(args) => handle_forecast(&cli.uid, args, cli.json).await,
        Commands::Evaluate(args) => handle_evaluate(args, cli.json).await,
        Commands::Run(args) => handle_run(&cli.uid, args, cli.json).await,
    }
}

#[derive(Parser)]
#[command(
    name = "menu-forecast-cli",
    about = "Train, evaluate and run menu demand forecasts from a sales CSV export",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        default_value = "local",
        help = "Account the models belong to; also the Firestore user for --push"
    )]
    uid: String,
    #[arg(long, global = true, default_value = "warn", help = "Log level")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit and store one model per menu item
    Train(TrainArgs),
    /// Forecast the next days from stored models
    Forecast(ForecastArgs),
    /// Hold-out evaluation without storing anything
    Evaluate(EvaluateArgs),
    /// Train, forecast and write in one go
    Run(RunArgs),
}

#[derive(Args)]
struct SourceArgs {
    #[arg(long, help = "Sales CSV with date,menuItemId,unitsSold,isPromoDay columns")]
    csv: PathBuf,
    #[arg(long, default_value = "models", help = "Model artifact directory")]
    models: PathBuf,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, default_value_t = DEFAULT_MIN_HISTORY_ROWS, help = "Feature rows an item needs to be trained")]
    min_history: usize,
    #[arg(long, default_value_t = 0.01, help = "Ridge penalty")]
    alpha: f64,
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, help = "Forecast JSON file to write")]
    output: Option<PathBuf>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        conflicts_with = "output",
        help = "Write forecasts to Firestore for --uid using the server configuration"
    )]
    push: bool,
}

#[derive(Args)]
struct ForecastArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(long, help = "Sales CSV with date,menuItemId,unitsSold,isPromoDay columns")]
    csv: PathBuf,
    #[arg(long, default_value_t = 0.01, help = "Ridge penalty")]
    alpha: f64,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    output: OutputArgs,
    #[arg(long, default_value_t = DEFAULT_MIN_HISTORY_ROWS, help = "Feature rows an item needs to be trained")]
    min_history: usize,
    #[arg(long, default_value_t = 0.01, help = "Ridge penalty")]
    alpha: f64,
}

async fn handle_train(uid: &str, args: TrainArgs, json: bool) -> Result<()> {
    let records = read_sales(&args.source.csv).await?;
    let trainer = ModelTrainer::new(args.min_history, RidgeFitter::new(args.alpha));
    let store = FileModelStore::new(&args.source.models);

    let report = train_into(&store, uid, records, trainer).await?;

    if json {
        print_json(&serde_json::json!({
            "trained": report.artifacts.iter().map(|a| &a.item_id).collect::<Vec<_>>(),
            "skipped": report.skipped,
        }))?;
    } else {
        println!(
            "Trained {} models into {}",
            report.trained(),
            args.source.models.display()
        );
        for skipped in &report.skipped {
            println!("  skipped {}: {}", skipped.item_id, skipped.reason);
        }
    }
    Ok(())
}

/// Fits every eligible item and saves the artifacts; nothing is forecast.
async fn train_into(
    store: &FileModelStore,
    uid: &str,
    records: Vec<SalesRecord>,
    trainer: ModelTrainer,
) -> Result<TrainingReport> {
    let histories = group_by_item(records);
    let report = tokio::task::spawn_blocking(move || trainer.train_all(&histories))
        .await
        .context("training task panicked")?;
    for artifact in &report.artifacts {
        store
            .save(uid, artifact)
            .with_context(|| format!("failed to save model for {}", artifact.item_id))?;
    }
    Ok(report)
}

async fn handle_forecast(uid: &str, args: ForecastArgs, json: bool) -> Result<()> {
    let records = read_sales(&args.source.csv).await?;
    let (sink, destination) = output_sink(&args.output)?;
    let service = build_service(&args.source, ModelTrainer::default(), sink);

    let documents = service
        .forecast_stored(uid, records)
        .await
        .context("forecasting failed")?;
    if documents.is_empty() {
        bail!(
            "no forecasts produced; are there models for account '{}' in {}?",
            uid,
            args.source.models.display()
        );
    }
    let report = service.write_forecasts(uid, &documents).await;
    report_write(&documents, report, &destination, json)
}

async fn handle_evaluate(args: EvaluateArgs, json: bool) -> Result<()> {
    let records = read_sales(&args.csv).await?;
    let histories = group_by_item(records);
    let evaluator = Evaluator::new(RidgeFitter::new(args.alpha));
    let summary = tokio::task::spawn_blocking(move || evaluator.evaluate_all(&histories))
        .await
        .context("evaluation task panicked")?;

    if json {
        print_json(&summary)
    } else {
        print_evaluation(&summary);
        Ok(())
    }
}

async fn handle_run(uid: &str, args: RunArgs, json: bool) -> Result<()> {
    let (sink, destination) = output_sink(&args.output)?;
    let service = build_service(
        &args.source,
        ModelTrainer::new(args.min_history, RidgeFitter::new(args.alpha)),
        sink,
    );

    match service
        .run_training(uid)
        .await
        .context("training run failed")?
    {
        TrainingOutcome::NoData => bail!("{} contains no usable sales rows", args.source.csv.display()),
        TrainingOutcome::Completed(summary) => {
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "Trained {} models, forecast {} rows, wrote {} to {} ({} failed)",
                    summary.trained_models,
                    summary.forecast_rows,
                    summary.written,
                    destination,
                    summary.failed_writes
                );
            }
            if summary.failed_writes > 0 {
                bail!("{} forecast rows were not written", summary.failed_writes);
            }
            Ok(())
        }
    }
}

async fn read_sales(path: &Path) -> Result<Vec<SalesRecord>> {
    CsvSalesSource::new(path)
        .load_sales("")
        .await
        .with_context(|| format!("failed to read sales from {}", path.display()))
}

fn build_service(source: &SourceArgs, trainer: ModelTrainer, sink: ForecastSink) -> ForecastingService {
    ForecastingService::new(
        Arc::new(CsvSalesSource::new(&source.csv)),
        Arc::new(FileModelStore::new(&source.models)),
        sink,
        trainer,
        RecursiveForecaster::default(),
    )
}

fn local_sink(path: &Path) -> Result<ForecastSink> {
    let repository: Arc<dyn ForecastRepository> = Arc::new(JsonForecastFile::new(path));
    Ok(ForecastSink::new(
        repository,
        FIRESTORE_BATCH_LIMIT,
        RetryConfig::default(),
    )?)
}

/// Sink for `--output`/`--push` and a description of where rows end up.
fn output_sink(args: &OutputArgs) -> Result<(ForecastSink, String)> {
    if args.push {
        let cfg = config::load_config().context("failed to load configuration for --push")?;
        let client = FirestoreClient::from_config(&cfg).context("failed to build Firestore client")?;
        if let Some(path) = client.credentials_path() {
            if !path.exists() {
                bail!("service account key not found at {}", path.display());
            }
        }
        let sink = ForecastSink::new(
            Arc::new(client),
            cfg.batch_size,
            RetryConfig::new(cfg.commit_max_attempts, cfg.commit_initial_backoff()),
        )?;
        return Ok((sink, "Firestore".to_string()));
    }

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    let destination = path.display().to_string();
    Ok((local_sink(&path)?, destination))
}

fn report_write(
    documents: &[ForecastDocument],
    report: WriteReport,
    destination: &str,
    json: bool,
) -> Result<()> {
    if json {
        print_json(&report)?;
    } else {
        let items = distinct_items(documents);
        println!(
            "Forecast {} rows for {} items, wrote {} to {}",
            documents.len(),
            items,
            report.written,
            destination
        );
    }
    if report.failed_writes > 0 {
        bail!(
            "{} of {} forecast rows were not written",
            report.failed_writes,
            documents.len()
        );
    }
    Ok(())
}

fn distinct_items(documents: &[ForecastDocument]) -> usize {
    let mut items: Vec<&str> = documents.iter().map(|d| d.row.item_id.as_str()).collect();
    items.sort_unstable();
    items.dedup();
    items.len()
}

fn print_evaluation(summary: &EvaluationSummary) {
    if summary.items.is_empty() {
        println!("No item has enough history to evaluate");
        return;
    }
    println!(
        "{:<24} {:>6} {:>8} {:>8} {:>8}",
        "item", "days", "mae", "rmse", "mape%"
    );
    for item in &summary.items {
        let mape = item
            .mape
            .map(|m| format!("{:.1}", m))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:>6} {:>8.2} {:>8.2} {:>8}",
            item.item_id, item.test_days, item.mae, item.rmse, mape
        );
    }
    if let (Some(mae), Some(rmse)) = (summary.overall_mae, summary.overall_rmse) {
        println!("overall mae {:.2}, rmse {:.2}", mae, rmse);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
