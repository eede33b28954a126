//! sc - segment cache coordinator CLI
//!
//! Soak-tests the coordinator and prints its effective configuration.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, bail, eyre};
use rand::Rng;
use tracing::{debug, info};

use segcache::cli::{Cli, Command, get_log_path};
use segcache::config::Config;
use segcache::{
    Acquisition, Actor, CellValue, ColumnValue, ConstrainedColumn, LoadSource, MemorySegmentCache, Segment,
    SegmentAxis, SegmentCacheManager, SegmentCache, SegmentDataset, StarRegion,
};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_thread_names(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Soak {
            workers,
            segments,
            requests,
            fail_rate,
            flush_every,
        } => {
            debug!(workers, segments, requests, fail_rate, flush_every, "main: matched Soak command");
            cmd_soak(
                &config,
                SoakPlan {
                    workers,
                    segments,
                    requests,
                    fail_rate,
                    flush_every,
                },
            )
        }
        Command::ShowConfig => {
            debug!("main: matched ShowConfig command");
            cmd_show_config(&config)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SoakPlan {
    workers: usize,
    segments: usize,
    requests: usize,
    fail_rate: f64,
    flush_every: usize,
}

/// What one requester thread saw
#[derive(Debug, Default)]
struct WorkerTally {
    hits: u64,
    owned_backend: u64,
    owned_external: u64,
    waited: u64,
    resolved: u64,
    failed: u64,
    flushes: u64,
}

impl WorkerTally {
    fn merge(&mut self, other: &WorkerTally) {
        self.hits += other.hits;
        self.owned_backend += other.owned_backend;
        self.owned_external += other.owned_external;
        self.waited += other.waited;
        self.resolved += other.resolved;
        self.failed += other.failed;
        self.flushes += other.flushes;
    }
}

fn cmd_soak(config: &Config, plan: SoakPlan) -> Result<()> {
    debug!(?plan, "cmd_soak: called");
    if plan.workers == 0 || plan.segments == 0 {
        bail!("workers and segments must be at least 1");
    }
    if !(0.0..=1.0).contains(&plan.fail_rate) {
        bail!("fail-rate must be between 0.0 and 1.0, got {}", plan.fail_rate);
    }

    let actor = Actor::start(config.coordinator.clone()).context("Failed to start segment cache actor")?;
    let external: Arc<dyn SegmentCache> = Arc::new(MemorySegmentCache::new());
    let manager = SegmentCacheManager::new(&actor.handle(), external)?;

    println!(
        "{} {} workers x {} requests over {} segments (fail rate {})",
        "Soaking".cyan().bold(),
        plan.workers,
        plan.requests,
        plan.segments,
        plan.fail_rate
    );

    let started = Instant::now();
    let tallies = thread::scope(|scope| {
        let workers: Vec<_> = (0..plan.workers)
            .map(|worker| {
                let manager = &manager;
                thread::Builder::new()
                    .name(format!("soak-{}", worker))
                    .spawn_scoped(scope, move || soak_worker(manager, plan))
            })
            .collect::<std::io::Result<_>>()?;
        workers
            .into_iter()
            .map(|worker| worker.join().map_err(|_| eyre!("Soak worker panicked"))?)
            .collect::<Result<Vec<_>>>()
    })?;
    let elapsed = started.elapsed();

    let mut total = WorkerTally::default();
    for tally in &tallies {
        total.merge(tally);
    }
    let metrics = manager.metrics()?;
    let stats = actor.handle().stats();
    info!(?total, ?metrics, ?stats, "Soak finished");

    println!("{} in {:.2?}", "Finished".green().bold(), elapsed);
    println!("  {:<22} {}", "hits", total.hits);
    println!("  {:<22} {}", "owned (backend)", total.owned_backend);
    println!("  {:<22} {}", "owned (external)", total.owned_external);
    println!("  {:<22} {}", "waited", total.waited);
    println!("  {:<22} {}", "resolved", total.resolved.to_string().green());
    println!("  {:<22} {}", "failed", colorize_count(total.failed));
    println!("  {:<22} {}", "flushes", total.flushes);
    println!("{}", "Coordinator metrics".cyan().bold());
    print!("{}", indent(&serde_yaml::to_string(&metrics)?));
    println!("{}", "Actor stats".cyan().bold());
    print!("{}", indent(&serde_yaml::to_string(&stats)?));

    drop(manager);
    actor.shutdown()?;
    println!("{}", "Actor shut down".green());
    Ok(())
}

fn soak_worker(manager: &SegmentCacheManager, plan: SoakPlan) -> Result<WorkerTally> {
    debug!(?plan, "soak_worker: called");
    let mut rng = rand::rng();
    let mut tally = WorkerTally::default();

    for request in 1..=plan.requests {
        let year = 1990 + rng.random_range(0..plan.segments) as i64;
        let segment = Arc::new(
            Segment::builder("sales", "unit_sales")
                .column(ConstrainedColumn::new("year", [ColumnValue::Int(year)]))
                .build()?,
        );

        let future = match manager.request_segment(segment)? {
            Acquisition::Hit(_) => {
                tally.hits += 1;
                None
            }
            Acquisition::Load {
                segment,
                source,
                future,
            } => {
                thread::sleep(Duration::from_micros(rng.random_range(50..500)));
                let cached = match source {
                    LoadSource::External => {
                        tally.owned_external += 1;
                        manager.external_cache().get(&segment.header()).unwrap_or_default()
                    }
                    LoadSource::Backend => {
                        tally.owned_backend += 1;
                        None
                    }
                };
                match cached {
                    Some(body) => manager.notify_external_load_succeeded(segment, body)?,
                    None if rng.random_bool(plan.fail_rate) => {
                        manager.notify_load_failed(segment, "simulated backend failure")?
                    }
                    None => {
                        let mut dataset = SegmentDataset::new(vec![SegmentAxis::new("year", [ColumnValue::Int(year)])]);
                        dataset.insert(&[ColumnValue::Int(year)], CellValue::Int(rng.random_range(0..10_000)))?;
                        manager.notify_load_succeeded(segment, dataset)?
                    }
                }
                Some(future)
            }
            Acquisition::Wait(future) => {
                tally.waited += 1;
                Some(future)
            }
        };

        if let Some(future) = future {
            match future.wait() {
                Ok(_) => tally.resolved += 1,
                Err(e) => {
                    debug!(error = %e, "soak_worker: load did not resolve");
                    tally.failed += 1;
                }
            }
        }

        if plan.flush_every > 0 && request % plan.flush_every == 0 {
            manager.flush(StarRegion::new("sales"))?;
            tally.flushes += 1;
        }
    }
    Ok(tally)
}

fn cmd_show_config(config: &Config) -> Result<()> {
    debug!("cmd_show_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}

fn colorize_count(count: u64) -> colored::ColoredString {
    if count == 0 {
        count.to_string().green()
    } else {
        count.to_string().red()
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("  {}\n", line)).collect()
}
