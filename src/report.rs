use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array, UInt64Array};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use tempfile::NamedTempFile;

use crate::aggregate::Record;
use crate::dispatch::TrialResult;
use crate::error::ReportError;

/// 平均値を書き出す有効桁数。f64 が10進で保証できる桁数 (f64::DIGITS) に合わせる。
const SIGNIFICANT_DIGITS: usize = f64::DIGITS as usize;

pub const CSV_HEADER: &str = "allocator,type,n,alloc_ms_avg,free_ms_avg,ram_kb_avg,runs";

fn summary_schema() -> Schema {
    Schema::new(vec![
        Field::new("allocator", DataType::Utf8, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("n", DataType::UInt64, false),
        Field::new("alloc_ms_avg", DataType::Float64, false),
        Field::new("free_ms_avg", DataType::Float64, false),
        Field::new("ram_kb_avg", DataType::Float64, false),
        Field::new("runs", DataType::UInt32, false),
    ])
}

fn raw_schema() -> Schema {
    Schema::new(vec![
        Field::new("allocator", DataType::Utf8, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("n", DataType::UInt64, false),
        Field::new("repetition", DataType::UInt32, false),
        Field::new("alloc_ms", DataType::Float64, false),
        Field::new("free_ms", DataType::Float64, false),
        Field::new("ram_kb", DataType::UInt64, false),
        Field::new("wall_ns", DataType::UInt64, false),
    ])
}

/// 10進15桁に丸める (0.30000000000000004 -> 0.3)。
///
/// 16桁目以降は2進表現の端数なので落とす。15桁を超える入力値
/// (例: 123456789.123456789) はその桁までしか残らない。
fn round_significant(value: f64) -> f64 {
    if !value.is_finite() || value == 0.0 {
        return value;
    }
    format!("{:.*e}", SIGNIFICANT_DIGITS - 1, value)
        .parse()
        .unwrap_or(value)
}

/// 集計結果をキー昇順の RecordBatch にする
pub fn summary_batch(records: &[Record]) -> Result<RecordBatch, ReportError> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let allocators: Vec<&str> = sorted.iter().map(|r| r.key.allocator.as_str()).collect();
    let types: Vec<&str> = sorted.iter().map(|r| r.key.ty.as_str()).collect();
    let sizes: Vec<u64> = sorted.iter().map(|r| r.key.n).collect();
    let alloc: Vec<f64> = sorted.iter().map(|r| round_significant(r.alloc_ms_avg)).collect();
    let free: Vec<f64> = sorted.iter().map(|r| round_significant(r.free_ms_avg)).collect();
    let ram: Vec<f64> = sorted.iter().map(|r| round_significant(r.ram_kb_avg)).collect();
    let runs: Vec<u32> = sorted.iter().map(|r| r.runs).collect();

    let batch = RecordBatch::try_new(
        Arc::new(summary_schema()),
        vec![
            Arc::new(StringArray::from(allocators)) as ArrayRef,
            Arc::new(StringArray::from(types)) as ArrayRef,
            Arc::new(UInt64Array::from(sizes)) as ArrayRef,
            Arc::new(Float64Array::from(alloc)) as ArrayRef,
            Arc::new(Float64Array::from(free)) as ArrayRef,
            Arc::new(Float64Array::from(ram)) as ArrayRef,
            Arc::new(UInt32Array::from(runs)) as ArrayRef,
        ],
    )?;
    Ok(batch)
}

pub fn write_csv_to<W: Write>(records: &[Record], out: W) -> Result<(), ReportError> {
    let batch = summary_batch(records)?;
    let mut writer = WriterBuilder::new().with_header(true).build(out);
    writer.write(&batch)?;
    Ok(())
}

/// 集計CSVを書き出す。一時ファイルに書いてからリネームするので、
/// 失敗しても中途半端なファイルは残らない。
pub fn write_csv(records: &[Record], path: &Path) -> Result<(), ReportError> {
    write_atomically(path, |file| write_csv_to(records, file))
}

/// 成功した全試行を Parquet に書き出す
pub fn write_parquet(results: &[TrialResult], path: &Path) -> Result<(), ReportError> {
    let allocators: Vec<&str> = results
        .iter()
        .map(|r| r.trial.key.allocator.as_str())
        .collect();
    let types: Vec<&str> = results.iter().map(|r| r.trial.key.ty.as_str()).collect();
    let sizes: Vec<u64> = results.iter().map(|r| r.trial.key.n).collect();
    let repetitions: Vec<u32> = results.iter().map(|r| r.trial.repetition).collect();
    let alloc: Vec<f64> = results.iter().map(|r| r.sample.alloc_ms).collect();
    let free: Vec<f64> = results.iter().map(|r| r.sample.free_ms).collect();
    let ram: Vec<u64> = results.iter().map(|r| r.sample.ram_kb).collect();
    let wall: Vec<u64> = results.iter().map(|r| r.wall.as_nanos() as u64).collect();

    let batch = RecordBatch::try_new(
        Arc::new(raw_schema()),
        vec![
            Arc::new(StringArray::from(allocators)) as ArrayRef,
            Arc::new(StringArray::from(types)) as ArrayRef,
            Arc::new(UInt64Array::from(sizes)) as ArrayRef,
            Arc::new(UInt32Array::from(repetitions)) as ArrayRef,
            Arc::new(Float64Array::from(alloc)) as ArrayRef,
            Arc::new(Float64Array::from(free)) as ArrayRef,
            Arc::new(UInt64Array::from(ram)) as ArrayRef,
            Arc::new(UInt64Array::from(wall)) as ArrayRef,
        ],
    )?;

    write_atomically(path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    })
}

fn write_atomically<F>(path: &Path, fill: F) -> Result<(), ReportError>
where
    F: FnOnce(&mut File) -> Result<(), ReportError>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ReportError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
