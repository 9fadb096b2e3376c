use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::dispatch::Dispatcher;
use crate::error::ConfigError;
use crate::job::Matrix;
use crate::runner::HEADER_TOKEN;

// 測定パラメータの既定値
const DEFAULT_EXECUTABLE: &str = "./build/benchmark";
const DEFAULT_ALLOCATORS: &[&str] = &["Standard", "Simple", "Pool", "Linear", "Segregated"];
const DEFAULT_TYPES: &[&str] = &["i8", "i16", "i32", "i64", "i128", "mixed"];
const DEFAULT_SIZES: &[u64] = &[1_000, 5_000, 10_000, 50_000, 100_000];
const DEFAULT_REPEATS: u32 = 50;
const DEFAULT_OUTPUT: &str = "results_avg.csv";

fn default_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Run an allocator benchmark executable over a parameter grid and average the results.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Benchmark executable, invoked as `<exe> <allocator> <type> <n>`
    #[arg(long, default_value = DEFAULT_EXECUTABLE)]
    pub executable: PathBuf,

    /// Allocator names (comma-separated)
    #[arg(long, value_delimiter = ',', default_values_t = default_list(DEFAULT_ALLOCATORS))]
    pub allocators: Vec<String>,

    /// Element type names (comma-separated)
    #[arg(long, value_delimiter = ',', default_values_t = default_list(DEFAULT_TYPES))]
    pub types: Vec<String>,

    /// Element counts (comma-separated)
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SIZES.to_vec())]
    pub sizes: Vec<u64>,

    /// Trials per (allocator, type, n) combination
    #[arg(long, default_value_t = DEFAULT_REPEATS)]
    pub repeats: u32,

    /// Concurrent trials (default: available CPUs)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Kill a trial that runs longer than this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Aggregated CSV output
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Also write every successful trial to this Parquet file
    #[arg(long)]
    pub raw_output: Option<PathBuf>,

    /// Shuffle dispatch order with this seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Exit with an error if any trial failed
    #[arg(long)]
    pub strict: bool,
}

/// 検証済みの実行設定
#[derive(Clone, Debug)]
pub struct Config {
    pub executable: PathBuf,
    pub matrix: Matrix,
    pub workers: NonZeroUsize,
    pub timeout: Option<Duration>,
    pub output: PathBuf,
    pub raw_output: Option<PathBuf>,
    pub seed: Option<u64>,
    pub strict: bool,
}

impl Config {
    /// 既定値の設定。検証はしない。
    pub fn new(executable: impl Into<PathBuf>, matrix: Matrix) -> Self {
        Config {
            executable: executable.into(),
            matrix,
            workers: Dispatcher::default_workers(),
            timeout: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            raw_output: None,
            seed: None,
            strict: false,
        }
    }

    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let workers = match cli.workers {
            Some(n) => NonZeroUsize::new(n).ok_or(ConfigError::ZeroWorkers)?,
            None => Dispatcher::default_workers(),
        };
        let config = Config {
            executable: cli.executable,
            matrix: Matrix {
                allocators: dedup(cli.allocators),
                types: dedup(cli.types),
                sizes: dedup(cli.sizes),
                repeats: cli.repeats,
            },
            workers,
            timeout: cli.timeout_secs.map(Duration::from_secs),
            output: cli.output,
            raw_output: cli.raw_output,
            seed: cli.seed,
            strict: cli.strict,
        };
        config.validate()?;
        Ok(config)
    }

    /// 実行前に致命的な設定エラーを検出する
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.executable.is_file() {
            return Err(ConfigError::MissingExecutable(self.executable.clone()));
        }
        let m = &self.matrix;
        if m.allocators.is_empty() {
            return Err(ConfigError::EmptyList("allocator"));
        }
        if m.types.is_empty() {
            return Err(ConfigError::EmptyList("type"));
        }
        if m.sizes.is_empty() {
            return Err(ConfigError::EmptyList("size"));
        }
        if m.sizes.contains(&0) {
            return Err(ConfigError::ZeroSize);
        }
        if m.repeats == 0 {
            return Err(ConfigError::ZeroRepeats);
        }
        Ok(())
    }

    /// ヘッダ行と区別できないアロケータ名。検証とは別に実行開始時に一度だけ警告する。
    pub fn ambiguous_allocators(&self) -> Vec<&str> {
        self.matrix
            .allocators
            .iter()
            .filter(|a| a.starts_with(HEADER_TOKEN))
            .map(String::as_str)
            .collect()
    }
}

/// 出現順を保ったまま重複を除く
fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
