use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};

use crate::error::TrialError;
use crate::job::Trial;

/// ベンチマークが最初に出力するヘッダ行の先頭トークン
pub const HEADER_TOKEN: &str = "allocator";

// データ行の列位置
const ALLOC_MS_COLUMN: usize = 3;
const FREE_MS_COLUMN: usize = 4;
const RAM_KB_COLUMN: usize = 5;
const MIN_FIELDS: usize = RAM_KB_COLUMN + 1;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_TAIL: usize = 512;

/// 1回の試行で得られる測定値
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub alloc_ms: f64,
    pub free_ms: f64,
    pub ram_kb: u64,
}

/// 試行を1つ実行する。ワーカースレッド間で共有される。
pub trait Execute: Sync {
    fn execute(&self, trial: &Trial) -> Result<Sample, TrialError>;
}

impl<F> Execute for F
where
    F: Fn(&Trial) -> Result<Sample, TrialError> + Sync,
{
    fn execute(&self, trial: &Trial) -> Result<Sample, TrialError> {
        self(trial)
    }
}

/// 外部ベンチマーク実行ファイルを `<exe> <allocator> <type> <n>` で起動する
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        ProcessRunner {
            executable: executable.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn spawn(&self, trial: &Trial) -> Result<Child, TrialError> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(&trial.key.allocator)
            .arg(&trial.key.ty)
            .arg(trial.key.n.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // タイムアウト時に孫プロセスごと止められるよう、専用のプロセスグループで起動する
        #[cfg(unix)]
        if self.timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.spawn().map_err(TrialError::Spawn)
    }
}

impl Execute for ProcessRunner {
    fn execute(&self, trial: &Trial) -> Result<Sample, TrialError> {
        let child = self.spawn(trial)?;
        let output = match self.timeout {
            Some(limit) => wait_with_deadline(child, limit)?,
            None => child.wait_with_output().map_err(TrialError::Wait)?,
        };

        if !output.status.success() {
            return Err(TrialError::Exit {
                status: output.status,
                stderr: stderr_tail(&output.stderr),
            });
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// パイプを読み切りながら終了を待つ。期限を過ぎたらプロセスグループごと kill する。
///
/// 読み取りスレッドは切り離してあり、孫プロセスがパイプを握ったままでも
/// ワーカーは期限で戻る。
fn wait_with_deadline(mut child: Child, limit: Duration) -> Result<Output, TrialError> {
    let deadline = Instant::now() + limit;
    let stdout = drain_in_background(child.stdout.take());
    let stderr = drain_in_background(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                terminate(&mut child);
                return Err(TrialError::Timeout(limit));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                terminate(&mut child);
                return Err(TrialError::Wait(e));
            }
        }
    };

    // 子が終了してもバックグラウンドの孫がパイプを開いたままのことがある
    match (stdout.recv_deadline(deadline), stderr.recv_deadline(deadline)) {
        (Ok(stdout), Ok(stderr)) => Ok(Output {
            status,
            stdout,
            stderr,
        }),
        _ => {
            terminate(&mut child);
            Err(TrialError::Timeout(limit))
        }
    }
}

fn drain_in_background<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(drain(pipe));
    });
    rx
}

/// 子プロセスとそのプロセスグループを止めて回収する
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: spawn 時に子の pid をグループ ID にしている。シグナル送信のみ。
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((idx, _)) => format!("...{}", &text[idx..]),
        None => text.to_string(),
    }
}

/// ベンチマークの標準出力からデータ行を取り出して解釈する。
///
/// 空行と `allocator` で始まるヘッダ行は読み飛ばし、6列以上ある最初の行を
/// データ行とみなす。それより列の少ない行はログとして無視する。
pub fn parse_output(stdout: &str) -> Result<Sample, TrialError> {
    let fields: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(HEADER_TOKEN))
        .map(|line| line.split(',').map(str::trim).collect::<Vec<_>>())
        .find(|fields| fields.len() >= MIN_FIELDS)
        .ok_or(TrialError::NoDataRow)?;

    Ok(Sample {
        alloc_ms: parse_float("alloc_ms", fields[ALLOC_MS_COLUMN])?,
        free_ms: parse_float("free_ms", fields[FREE_MS_COLUMN])?,
        ram_kb: parse_integer("ram_kb", fields[RAM_KB_COLUMN])?,
    })
}

fn parse_float(column: &'static str, value: &str) -> Result<f64, TrialError> {
    value
        .parse::<f64>()
        .map_err(|source| TrialError::InvalidFloat {
            column,
            value: value.to_string(),
            source,
        })
}

fn parse_integer(column: &'static str, value: &str) -> Result<u64, TrialError> {
    value
        .parse::<u64>()
        .map_err(|source| TrialError::InvalidInteger {
            column,
            value: value.to_string(),
            source,
        })
}
