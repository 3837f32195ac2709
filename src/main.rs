mod browser;
mod config;
mod db;
mod error;
mod navigator;
mod pipeline;
mod record;
mod session;
mod sink;
mod targets;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use crate::browser::chromium::ChromiumLauncher;
use crate::config::{OutputMode, Settings};
use crate::error::ScrapeError;
use crate::pipeline::{Pipeline, RunState, TargetStats};

#[derive(Parser)]
#[command(name = "job-scraper", about = "Scrape job leads with a headless browser into CSV")]
struct Cli {
    /// TOML settings file (default: scraper.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Target to run, repeatable (default: all)
    #[arg(short, long = "target")]
    targets: Vec<String>,
    /// Directory for <target>.csv files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Replace or extend existing output files
    #[arg(short, long, value_enum)]
    mode: Option<OutputMode>,
    /// Max listing pages per query
    #[arg(long)]
    max_pages: Option<u32>,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
    /// Continue each query from the page saved by the previous run
    #[arg(long)]
    resume: bool,
    /// Print known targets and exit
    #[arg(long)]
    list_targets: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if !self.targets.is_empty() {
            settings.targets = self.targets.clone();
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(mode) = self.mode {
            settings.output_mode = mode;
        }
        if let Some(n) = self.max_pages {
            settings.navigation.max_pages = n;
        }
        if self.headful {
            settings.browser.headless = false;
        }
        if self.resume {
            settings.resume = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    if cli.list_targets {
        for name in targets::KNOWN_TARGETS {
            println!("{}", name);
        }
        return Ok(());
    }

    let settings = match load_settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            error!("Fatal: {:#}", e);
            return Err(e);
        }
    };
    let targets = match targets::build(&settings) {
        Ok(t) => t,
        Err(e) => {
            error!("Fatal: {}", e);
            return Err(e.into());
        }
    };

    info!(
        mode = %settings.output_mode,
        output_dir = %settings.output_dir.display(),
        resume = settings.resume,
        "Output mode: {}",
        settings.output_mode
    );

    let launcher = ChromiumLauncher;
    let mut pipeline = Pipeline::new(&settings, &launcher, targets);

    let deadline = async {
        match settings.run_timeout_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    let cancelled = tokio::select! {
        _ = pipeline.run() => None,
        _ = tokio::signal::ctrl_c() => Some("interrupted"),
        _ = deadline => Some("run timeout exceeded"),
    };
    if let Some(reason) = cancelled {
        pipeline.abort(ScrapeError::Cancelled(reason.to_string())).await;
    }

    print_summary(pipeline.stats(), &pipeline.totals());
    let state = pipeline.state();
    println!("\nRun {} in {}", state, format_duration(t0.elapsed()));

    if state != RunState::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings =
        config::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut settings);
    settings.validate().context("invalid configuration")?;
    Ok(settings)
}

fn print_summary(per_target: &[TargetStats], total: &TargetStats) {
    if per_target.is_empty() {
        println!("No target finished.");
        return;
    }
    println!(
        "{:<12} | {:>6} | {:>8} | {:>10} | {:>7} | {:>8}",
        "Target", "Pages", "Admitted", "Duplicates", "Skipped", "Filtered"
    );
    println!("{}", "-".repeat(66));
    for s in per_target.iter().chain(std::iter::once(total)) {
        println!(
            "{:<12} | {:>6} | {:>8} | {:>10} | {:>7} | {:>8}",
            s.target,
            s.pages_visited,
            s.records_admitted,
            s.duplicates,
            s.pages_skipped,
            s.filtered + s.enrichment_failed
        );
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
