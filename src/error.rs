use std::fmt;
use std::io;
use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// 試行失敗の分類
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    Process, // 起動失敗・非ゼロ終了・タイムアウト
    Format,  // データ行が見つからない
    Parse,   // 数値として読めないフィールド
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Process => "process",
            FailureKind::Format => "format",
            FailureKind::Parse => "parse",
        }
    }

    pub fn all() -> &'static [FailureKind] {
        &[FailureKind::Process, FailureKind::Format, FailureKind::Parse]
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1回の試行の失敗。どれも実行全体を止めない。
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("failed to launch benchmark executable: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to wait for benchmark process: {0}")]
    Wait(#[source] io::Error),

    #[error("benchmark exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },

    #[error("benchmark did not finish within {0:?}")]
    Timeout(Duration),

    #[error("no data row found in benchmark output")]
    NoDataRow,

    #[error("column {column} is not a float: {value:?}")]
    InvalidFloat {
        column: &'static str,
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("column {column} is not an integer: {value:?}")]
    InvalidInteger {
        column: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl TrialError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TrialError::Spawn(_)
            | TrialError::Wait(_)
            | TrialError::Exit { .. }
            | TrialError::Timeout(_) => FailureKind::Process,
            TrialError::NoDataRow => FailureKind::Format,
            TrialError::InvalidFloat { .. } | TrialError::InvalidInteger { .. } => {
                FailureKind::Parse
            }
        }
    }
}

/// 実行前に検出される致命的な設定エラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("benchmark executable not found: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("{0} list is empty")]
    EmptyList(&'static str),

    #[error("repetition count must be at least 1")]
    ZeroRepeats,

    #[error("element counts must be positive")]
    ZeroSize,

    #[error("worker pool size must be at least 1")]
    ZeroWorkers,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("failed to move artifact into {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
