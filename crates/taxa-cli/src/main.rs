use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use futures::TryStreamExt;
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use taxa_cli::{
    completion, plan_sync, render, run_sync, Command, CompletionAction, Config, OutputFormat,
    SyncPlan,
};
use taxa_client::{fetch_descendants, DescendantQuery, INatClient};
use taxa_core::{
    generate_breakdown_query, AppError, Rank, ShutdownReason, SyncConfig, SyncSummary, TaxaConfig,
};
use taxa_db::{DatasetReader, QueryResults};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let config = Config::parse();

    // Setup logging (stderr to keep stdout clean for results)
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(config.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// Prints the error and picks the exit code: 2 for configuration errors,
/// 130 for interruption, 1 otherwise.
fn report(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<AppError>() {
        Some(app_err) => {
            eprintln!("\n❌ {}", app_err.user_message());
            if app_err.is_config_error() {
                ExitCode::from(2)
            } else if matches!(app_err, AppError::Interrupted(_)) {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            eprintln!("\n❌ {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Sync {
            config,
            timeout,
            dry_run,
        } => sync(&config, timeout, dry_run).await,
        Command::Query { sql, db, format } => match sql {
            Some(sql) => query(&sql, &db.database, format).await,
            None => open_shell(&db.database),
        },
        Command::Breakdown {
            taxon,
            rank,
            levels,
            region,
            db,
            format,
        } => {
            breakdown(
                &taxon,
                rank.as_deref(),
                &levels,
                region.as_deref(),
                &db.database,
                format,
            )
            .await
        }
        Command::Descendants {
            taxon_id,
            limit,
            per_page,
            format,
        } => descendants(taxon_id, limit, per_page, format).await,
        Command::Info { db } => show_info(&db.database).await,
        Command::Completion { action } => match action {
            CompletionAction::GenerateCache { db } => generate_cache(&db.database).await,
            CompletionAction::Install { db } => install_completion(&db.database).await,
        },
    }
}

/// Rebuild the dataset described by a config file
async fn sync(config_path: &Path, timeout: Option<u64>, dry_run: bool) -> anyhow::Result<()> {
    let config = TaxaConfig::load(config_path)?;

    if dry_run {
        print_plan(&plan_sync(&config));
        return Ok(());
    }

    let client = INatClient::new()?;
    let summary = run_sync(&client, &config, shutdown_signal(timeout)).await?;
    print_summary(&summary);

    completion::refresh(&config.database).await;
    Ok(())
}

/// Resolves on Ctrl-C, or once `timeout` seconds have passed.
async fn shutdown_signal(timeout: Option<u64>) -> ShutdownReason {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownReason::Interrupted,
            Err(e) => {
                warn!(error = %e, "Could not install Ctrl-C handler");
                std::future::pending().await
            }
        }
    };

    let deadline = async {
        match timeout {
            Some(secs) => {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                ShutdownReason::Deadline(secs)
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        reason = ctrl_c => reason,
        reason = deadline => reason,
    }
}

fn print_plan(plan: &SyncPlan) {
    println!("\n📋 Sync plan (dry run)\n");
    println!("  Database:              {}", plan.database.display());
    println!("  Staging file:          {}", plan.staging.display());
    if let Some(grade) = &plan.quality_grade {
        println!("  Quality grade:         {}", grade);
    }

    println!("\n  Regions:");
    for (key, name, places) in &plan.regions {
        println!("    {:<20} {} ({} places)", key, name, places);
    }

    println!("\n  Taxa:");
    for (key, name, taxon_id) in &plan.taxa {
        println!("    {:<20} {} (taxon {})", key, name, taxon_id);
    }

    println!(
        "\n  Discovery requests:    {}",
        plan.discovery_calls
    );
    println!();
}

fn print_summary(summary: &SyncSummary) {
    println!("\n✅ Sync complete\n");

    for result in &summary.results {
        if result.skipped {
            println!(
                "  {:<20} skipped (no observations in configured regions)",
                result.key
            );
        } else {
            println!(
                "  {:<20} {} taxa, {} ancestors, {} observation rows",
                result.key,
                result.stats.taxa_written,
                result.stats.ancestors_written,
                result.stats.observations_written
            );
        }
    }

    let totals = summary.totals();
    println!();
    println!("  Taxa written:          {}", totals.total_taxa());
    println!("  Observation rows:      {}", totals.observations_written);
    println!("  API calls:             {}", totals.api_calls);
    if totals.missing > 0 {
        println!("  Missing from API:      {}", totals.missing);
    }
    if totals.malformed > 0 {
        println!("  Malformed records:     {}", totals.malformed);
    }
    if let Some(backup) = &summary.backup {
        println!("  Previous dataset:      {}", backup.display());
    }
    println!();
}

/// Run one SQL statement against the dataset
async fn query(sql: &str, database: &Path, format: Option<OutputFormat>) -> anyhow::Result<()> {
    let reader = DatasetReader::open(database).await?;
    let results = reader.run_query(sql).await?;
    reader.close().await;

    print_results(&results, format);
    Ok(())
}

/// Hand the terminal to the sqlite3 shell
fn open_shell(database: &Path) -> anyhow::Result<()> {
    if !database.exists() {
        return Err(AppError::ConfigError(format!(
            "Database not found: {}. Run 'taxa sync' first to create it",
            database.display()
        ))
        .into());
    }

    let status = std::process::Command::new("sqlite3")
        .arg(database)
        .status()
        .context("Failed to launch sqlite3. Is it installed and on PATH?")?;

    if !status.success() {
        anyhow::bail!("sqlite3 exited with {}", status);
    }
    Ok(())
}

/// Observation and species counts below a taxon
async fn breakdown(
    taxon: &str,
    rank: Option<&str>,
    levels: &[String],
    region: Option<&str>,
    database: &Path,
    format: Option<OutputFormat>,
) -> anyhow::Result<()> {
    let reader = DatasetReader::open(database).await?;

    let base_rank = match rank {
        Some(rank) => rank.parse::<Rank>()?,
        None => reader.find_taxon_rank(taxon).await?,
    };

    let levels = if levels.is_empty() {
        let (selected, expected) = reader.auto_select_level(taxon, base_rank).await?;
        if selected != expected {
            eprintln!(
                "ℹ️  No {} data below {} {}; showing {} instead.",
                expected, base_rank, taxon, selected
            );
        }
        vec![selected]
    } else {
        levels
            .iter()
            .map(|level| level.parse::<Rank>())
            .collect::<Result<Vec<_>, _>>()?
    };

    let query = generate_breakdown_query(taxon, base_rank, &levels, region)?;
    info!(
        "Breaking down {} {} by {}",
        base_rank,
        taxon,
        query
            .levels
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let results = reader.run_breakdown(&query).await?;
    reader.close().await;

    if results.is_empty() {
        eprintln!("No observations found for {} {}.", base_rank, taxon);
        return Ok(());
    }

    print_results(&results, format);
    Ok(())
}

/// Stream descendants of a taxon straight from the API
async fn descendants(
    taxon_id: i64,
    limit: Option<usize>,
    per_page: u32,
    format: Option<OutputFormat>,
) -> anyhow::Result<()> {
    let client = INatClient::new()?;
    let retry = SyncConfig::default().retry();
    let query = DescendantQuery::new(taxon_id)
        .per_page(per_page)
        .max_results(limit);

    let mut stream = Box::pin(fetch_descendants(&client, &retry, query));
    let mut results = QueryResults {
        columns: vec!["id".to_string(), "name".to_string(), "rank".to_string()],
        rows: Vec::new(),
    };

    while let Some(taxon) = stream.try_next().await? {
        results
            .rows
            .push(vec![json!(taxon.id), json!(taxon.name), json!(taxon.rank)]);
    }
    info!("Fetched {} descendants of taxon {}", results.rows.len(), taxon_id);

    print_results(&results, format);
    Ok(())
}

/// Show dataset statistics
async fn show_info(database: &Path) -> anyhow::Result<()> {
    let reader = DatasetReader::open(database).await?;
    let stats = reader.stats().await?;
    reader.close().await;

    println!("\n📊 Database Statistics\n");
    println!("  Database:              {}", database.display());
    println!("  Total taxa:            {}", stats.total_taxa);
    println!("  Species:               {}", stats.species_count);
    println!("  Observation rows:      {}", stats.observation_rows);
    println!("  Total observations:    {}", stats.total_observations);
    if let Some(last_sync) = &stats.last_sync {
        println!("  Last sync:             {}", last_sync);
    }

    if !stats.regions.is_empty() {
        println!("\n  Regions:");
        for (key, name) in &stats.regions {
            println!("    {:<20} {}", key, name);
        }
    }
    println!();

    Ok(())
}

fn print_results(results: &QueryResults, format: Option<OutputFormat>) {
    println!("{}", render(results, OutputFormat::resolve(format)));
}

/// Rebuild the completion cache for one dataset
async fn generate_cache(database: &Path) -> anyhow::Result<()> {
    let path = completion::cache_path(database).context("No cache directory available")?;
    let cache = completion::generate(database).await?;
    completion::write(&cache, &path).await?;

    println!(
        "✅ Cached {} taxon names and {} region keys: {}",
        cache.metadata.taxa_count,
        cache.metadata.region_count,
        path.display()
    );
    Ok(())
}

/// Install the zsh completion script and build an initial cache
async fn install_completion(database: &Path) -> anyhow::Result<()> {
    let dir = completion::script_dir().context("Could not determine home directory")?;
    let script = completion::install_script(&dir).await?;
    println!("✅ Installed completion script: {}", script.display());

    if database.exists() {
        match completion::cache_path(database) {
            Some(path) if !completion::is_stale(&path, database).await => {
                println!("   Completion cache is up to date: {}", path.display());
            }
            _ => {
                if let Some(path) = completion::refresh(database).await {
                    println!("✅ Generated initial cache: {}", path.display());
                }
            }
        }
    } else {
        println!(
            "   No dataset at {} yet; the cache is built after the first 'taxa sync'.",
            database.display()
        );
    }

    println!("\nAdd to ~/.zshrc:");
    println!("  fpath=({} $fpath)", dir.display());
    println!("  autoload -Uz compinit && compinit");
    println!("\nCompleting taxon names, regions and ranks requires jq.");
    Ok(())
}
