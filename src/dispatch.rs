use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use quanta::Clock;
use tracing::{debug, info, warn};

use crate::error::{FailureKind, TrialError};
use crate::job::Trial;
use crate::runner::{Execute, Sample};

/// 成功した1回の試行
#[derive(Clone, Debug, PartialEq)]
pub struct TrialResult {
    pub trial: Trial,
    pub sample: Sample,
    pub wall: Duration,
}

#[derive(Debug)]
pub struct TrialFailure {
    pub trial: Trial,
    pub error: TrialError,
}

/// ワーカーから集約側へ流れる完了通知
#[derive(Debug)]
pub struct Completion {
    pub trial: Trial,
    pub outcome: Result<Sample, TrialError>,
    pub wall: Duration,
}

/// 全試行の結果。到着順 (完了順) に並ぶ。
#[derive(Debug, Default)]
pub struct Collected {
    pub results: Vec<TrialResult>,
    pub failures: Vec<TrialFailure>,
}

impl Collected {
    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures
            .iter()
            .filter(|f| f.error.kind() == kind)
            .count()
    }

    fn record(&mut self, completion: Completion) {
        let Completion {
            trial,
            outcome,
            wall,
        } = completion;
        match outcome {
            Ok(sample) => self.results.push(TrialResult {
                trial,
                sample,
                wall,
            }),
            Err(error) => {
                warn!(
                    key = %trial.key,
                    repetition = trial.repetition,
                    kind = %error.kind(),
                    "trial failed: {error}"
                );
                self.failures.push(TrialFailure { trial, error });
            }
        }
    }
}

/// 同時実行数を制限したワーカープール
#[derive(Clone, Debug)]
pub struct Dispatcher {
    workers: NonZeroUsize,
    clock: Clock,
}

impl Dispatcher {
    pub fn new(workers: NonZeroUsize) -> Self {
        Dispatcher {
            workers,
            clock: Clock::new(),
        }
    }

    /// 利用可能なCPU数 (取得できなければ1)
    pub fn default_workers() -> NonZeroUsize {
        thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
    }

    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// 全試行を実行し、完了するまでブロックする。
    ///
    /// ワーカーは結果を送るだけで、収集は呼び出し側のスレッドだけが行う。
    /// 1つの試行が失敗しても残りの試行は続行される。
    pub fn run<E: Execute>(&self, executor: &E, trials: Vec<Trial>) -> Collected {
        let total = trials.len();
        let mut collected = Collected::default();
        if total == 0 {
            return collected;
        }

        let pool = self.workers.get().min(total);
        let (job_tx, job_rx) = channel::unbounded::<Trial>();
        let (done_tx, done_rx) = channel::unbounded::<Completion>();
        for trial in trials {
            // 受信側はまだ生きているので失敗しない
            let _ = job_tx.send(trial);
        }
        drop(job_tx);

        info!("Running {} benchmarks using {} workers", total, pool);

        thread::scope(|s| {
            for _ in 0..pool {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let clock = self.clock.clone();
                s.spawn(move || {
                    for trial in job_rx.iter() {
                        let start = clock.raw();
                        let outcome = executor.execute(&trial);
                        let wall = clock.delta(start, clock.raw());
                        if done_tx
                            .send(Completion {
                                trial,
                                outcome,
                                wall,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let step = (total / 20).max(1);
            for (idx, completion) in done_rx.iter().enumerate() {
                let done = idx + 1;
                debug!(
                    "[{}/{}] {} #{} finished in {:?}",
                    done, total, completion.trial.key, completion.trial.repetition, completion.wall
                );
                collected.record(completion);
                if done % step == 0 || done == total {
                    info!(
                        "[{}/{}] completed ({} failed)",
                        done,
                        total,
                        collected.failures.len()
                    );
                }
            }
        });

        collected
    }
}
