#![cfg(unix)]

use std::fs::{self, File};
use std::num::NonZeroUsize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memalloc_bench_runner::config::Config;
use memalloc_bench_runner::error::FailureKind;
use memalloc_bench_runner::job::{Key, Matrix};
use parquet::file::reader::{FileReader, SerializedFileReader};
use tempfile::TempDir;

// 引数に応じて決まった値を出す偽ベンチマーク。
// Pool/i32 の 2 回目だけは壊れた出力を返し、Broken は常に異常終了する。
const FAKE_BENCHMARK: &str = r#"#!/bin/sh
dir=$(dirname "$0")
count_file="$dir/count_$1_$2_$3"
count=$(cat "$count_file" 2>/dev/null || echo 0)
count=$((count + 1))
echo "$count" > "$count_file"

case "$1" in
  Broken) echo "unsupported allocator" >&2; exit 2 ;;
  Hang) exec sleep 30 ;;
esac

echo "allocator,type,n,alloc_ms,free_ms,ram_kb"
case "$1:$count" in
  Standard:1) echo "$1,$2,$3,1.0,0.5,100" ;;
  Standard:*) echo "$1,$2,$3,3.0,1.5,100" ;;
  Pool:1) echo "$1,$2,$3,0.5,0.2,90" ;;
  Pool:2) if [ "$2" = "i32" ]; then echo "garbage"; else echo "$1,$2,$3,0.7,0.4,110"; fi ;;
  Pool:*) echo "$1,$2,$3,0.7,0.4,110" ;;
esac
"#;

fn install(dir: &Path) -> PathBuf {
    let path = dir.join("benchmark");
    fs::write(&path, FAKE_BENCHMARK).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(dir: &TempDir, allocators: &[&str], types: &[&str], repeats: u32) -> Config {
    let mut config = Config::new(
        install(dir.path()),
        Matrix {
            allocators: allocators.iter().map(|s| s.to_string()).collect(),
            types: types.iter().map(|s| s.to_string()).collect(),
            sizes: vec![1000],
            repeats,
        },
    );
    // 呼び出し回数のカウンタが競合しないように直列に回す
    config.workers = NonZeroUsize::MIN;
    config.output = dir.path().join("results_avg.csv");
    config
}

fn rows(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn example_grid_through_real_processes() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, &["Standard", "Pool"], &["i8"], 2);
    let summary = memalloc_bench_runner::run(&config).unwrap();

    assert_eq!(summary.scheduled, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        rows(&config.output),
        vec![
            "allocator,type,n,alloc_ms_avg,free_ms_avg,ram_kb_avg,runs",
            "Pool,i8,1000,0.6,0.3,100.0,2",
            "Standard,i8,1000,2.0,1.0,100.0,2",
        ]
    );
}

#[test]
fn one_bad_trial_leaves_r_minus_one_runs() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, &["Pool"], &["i32"], 3);
    let summary = memalloc_bench_runner::run(&config).unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures_by_kind, vec![(FailureKind::Format, 1)]);
    assert_eq!(
        rows(&config.output),
        vec![
            "allocator,type,n,alloc_ms_avg,free_ms_avg,ram_kb_avg,runs",
            "Pool,i32,1000,0.6,0.3,100.0,2",
        ]
    );
}

#[test]
fn failing_allocator_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, &["Broken", "Standard"], &["i8"], 2);
    config.raw_output = Some(dir.path().join("raw.parquet"));
    let summary = memalloc_bench_runner::run(&config).unwrap();

    assert_eq!(summary.failures_by_kind, vec![(FailureKind::Process, 2)]);
    assert_eq!(summary.missing, vec![Key::new("Broken", "i8", 1000)]);
    assert_eq!(rows(&config.output).len(), 2);

    let raw = config.raw_output.as_ref().unwrap();
    let reader = SerializedFileReader::new(File::open(raw).unwrap()).unwrap();
    assert_eq!(reader.metadata().file_metadata().num_rows(), 2);
}

#[test]
fn hung_trial_times_out() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, &["Hang", "Standard"], &["i8"], 1);
    config.workers = NonZeroUsize::new(2).unwrap();
    config.timeout = Some(Duration::from_millis(300));
    let summary = memalloc_bench_runner::run(&config).unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failures_by_kind, vec![(FailureKind::Process, 1)]);
    assert_eq!(summary.missing, vec![Key::new("Hang", "i8", 1000)]);
}
