//! Orchestrates repeated runs of an external allocator benchmark and
//! writes the per-combination averages as CSV.

pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod report;
pub mod runner;

use std::path::PathBuf;

use anyhow::{Context, Result};
use quanta::Clock;
use tracing::{info, warn};

use crate::aggregate::{aggregate, missing_keys, Record};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::FailureKind;
use crate::job::{shuffle, Key};
use crate::runner::{Execute, ProcessRunner};

/// 1回の実行の結果概要
#[derive(Debug)]
pub struct RunSummary {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: Vec<(FailureKind, usize)>,
    pub missing: Vec<Key>,
    pub records: Vec<Record>,
    pub output: PathBuf,
}

/// 設定どおりに外部ベンチマークを実行する
pub fn run(config: &Config) -> Result<RunSummary> {
    config.validate()?;
    for name in config.ambiguous_allocators() {
        warn!(
            allocator = %name,
            "allocator name starts with the header token; its data rows may be skipped"
        );
    }
    let runner = ProcessRunner::new(&config.executable).with_timeout(config.timeout);
    run_with(config, &runner)
}

/// 列挙 → 並列実行 → 集計 → 書き出し。全試行が終わるまで集計は始めない。
pub fn run_with<E: Execute>(config: &Config, executor: &E) -> Result<RunSummary> {
    let clock = Clock::new();
    let started = clock.raw();

    let mut trials = config.matrix.enumerate();
    if let Some(seed) = config.seed {
        shuffle(&mut trials, seed);
    }
    let scheduled = trials.len();

    let collected = Dispatcher::new(config.workers).run(executor, trials);

    let records = aggregate(&collected.results);
    let missing = missing_keys(&config.matrix.keys(), &records);
    for key in &missing {
        warn!(key = %key, "no successful trials; omitted from {}", config.output.display());
    }

    report::write_csv(&records, &config.output)
        .with_context(|| format!("failed to write {}", config.output.display()))?;
    if let Some(raw) = &config.raw_output {
        report::write_parquet(&collected.results, raw)
            .with_context(|| format!("failed to write {}", raw.display()))?;
        info!("Raw trials written to {}", raw.display());
    }

    let failures_by_kind: Vec<(FailureKind, usize)> = FailureKind::all()
        .iter()
        .map(|&kind| (kind, collected.failures_of(kind)))
        .filter(|&(_, count)| count > 0)
        .collect();
    for (kind, count) in &failures_by_kind {
        warn!("{} trials failed with {} errors", count, kind);
    }

    info!(
        "Done in {:?}: {} of {} trials succeeded, {} rows written to {}",
        clock.delta(started, clock.raw()),
        collected.results.len(),
        scheduled,
        records.len(),
        config.output.display()
    );

    Ok(RunSummary {
        scheduled,
        succeeded: collected.results.len(),
        failed: collected.failures.len(),
        failures_by_kind,
        missing,
        records,
        output: config.output.clone(),
    })
}
