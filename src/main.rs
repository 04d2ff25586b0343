mod browser;
mod config;
mod error;
mod loader;
mod models;
mod pipeline;
mod report;
mod scraper;
mod storage;
mod utils;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::browser::FilterChange;
use crate::config::AppConfig;
use crate::models::{segment_variants, ScanQuery};
use crate::pipeline::{build_coordinator, MoversPipeline, QuerySpec};
use crate::report::{columns_of, ordered_columns};
use crate::scraper::parsers::discover_scan_clause;
use crate::scraper::{QueryExecutor, SessionContext, TokenProvider};

#[derive(Parser)]
#[command(name = "screener", about = "Resilient stock-screener scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan through the full fallback chain (API → browser → export)
    Scan {
        /// Screener page the token (and browser fallback) comes from
        #[arg(short, long)]
        url: String,

        /// Raw scan clause, e.g. "( {nifty100} ( latest open = latest high ) )"
        #[arg(long, conflicts_with_all = ["segment", "condition"])]
        clause: Option<String>,

        #[arg(long, requires = "condition")]
        segment: Option<String>,

        #[arg(long)]
        condition: Option<String>,

        /// Filter option to pick on the page if the browser path runs, e.g. "Nifty 100"
        #[arg(long)]
        filter: Option<String>,

        /// Write the rows to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Gainers (open = high) and losers (open = low) report for the index
    Movers {
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reference index CSV with a Symbol column
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },

    /// Fetch a CSRF token from a screener page
    Token {
        #[arg(short, long)]
        url: String,
    },

    /// Look for a scan clause embedded in a screener page
    Discover {
        #[arg(short, long)]
        url: String,

        /// Terms the clause must mention (repeatable)
        #[arg(short, long = "term")]
        terms: Vec<String>,
    },

    /// Try segment spellings until the API returns rows
    Probe {
        #[arg(short, long)]
        url: String,

        #[arg(long, default_value = "nifty100")]
        segment: String,

        #[arg(long, default_value = "latest open = latest high")]
        condition: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "chartink_screener=info,warn",
        1 => "chartink_screener=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Scan {
            url,
            clause,
            segment,
            condition,
            filter,
            output,
        } => {
            let _t = utils::Timer::start("Scan");
            let query = match (clause, segment, condition) {
                (Some(c), _, _) => ScanQuery::new(c),
                (None, Some(s), Some(c)) => ScanQuery::segmented(&s, &c),
                (None, None, Some(c)) => ScanQuery::new(format!("( {} )", c)),
                _ => bail!("Pass --clause or --condition"),
            };
            let mut spec = QuerySpec::new(query, url);
            if let Some(label) = filter {
                spec = spec.with_filter(FilterChange::segment(&label));
            }
            let spec = spec.with_segment_filter();

            let coordinator = build_coordinator(&config)?;
            let result = coordinator.run_detailed(&spec).await;
            coordinator.shutdown().await;

            info!("Attempts: {}", result.describe());
            if let Some(err) = result.failure() {
                warn!("{}", err);
                println!("No data available.");
                return Ok(());
            }

            let columns = columns_of(&result.rows);
            println!("{} rows via {:?}", result.rows.len(), result.source);
            println!("Columns: {}", columns.join(", "));
            if let Some(path) = output {
                let written = storage::export_rows(&path, &ordered_columns(&result.rows), &result.rows)?;
                println!("Saved to {}", written.display());
            }
        }

        Command::Movers { output, reference } => {
            let timer = utils::Timer::start("Gainers/losers report");
            if let Some(path) = output {
                config.report.output = path;
            }
            if let Some(path) = reference {
                config.report.reference_csv = path;
            }

            let stats = MoversPipeline::new(config).run().await?;
            println!("─────────────────────────────────");
            print!("{}", stats.gainers);
            println!("─────────────────────────────────");
            print!("{}", stats.losers);
            println!("─────────────────────────────────");
            match stats.output {
                Some(path) => println!("  {} rows saved to {}", stats.rows_written, path.display()),
                None => println!("  No data available."),
            }
            println!("  Finished in {:.1?}", timer.elapsed());
        }

        Command::Token { url } => {
            let ctx = SessionContext::new(&config.scraper)?;
            let cred = TokenProvider::new().acquire(&ctx, &url).await?;
            println!("Token: {}", cred.preview());
        }

        Command::Discover { url, terms } => {
            let ctx = SessionContext::new(&config.scraper)?;
            let html = TokenProvider::new().fetch_page(&ctx, &url).await?;
            let required: Vec<&str> = terms.iter().map(String::as_str).collect();
            match discover_scan_clause(&html, &required) {
                Some(clause) => println!("{}", clause),
                None => {
                    warn!("No scan clause found on {}", url);
                    println!("No scan clause found.");
                }
            }
        }

        Command::Probe {
            url,
            segment,
            condition,
        } => {
            let ctx = SessionContext::new(&config.scraper)?;
            let tokens = TokenProvider::new();
            let cred = tokens.acquire(&ctx, &url).await?;
            let executor = QueryExecutor::new(config.scraper.process_url(), tokens);

            let candidates = segment_variants(&segment, &condition);
            info!("Probing {} clause variants against {}", candidates.len(), executor.endpoint());
            match executor.probe(&candidates, &cred, &ctx).await {
                Some((query, rows)) => println!("{} rows with {}", rows.len(), query),
                None => println!("No variant returned rows."),
            }
        }
    }

    Ok(())
}
