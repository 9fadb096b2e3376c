use std::collections::{BTreeMap, BTreeSet};

use crate::dispatch::TrialResult;
use crate::job::Key;
use crate::runner::Sample;

/// キーごとの平均値
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub key: Key,
    pub alloc_ms_avg: f64,
    pub free_ms_avg: f64,
    pub ram_kb_avg: f64,
    pub runs: u32,
}

/// 成功した試行をキーでまとめ、各指標の算術平均を取る。
///
/// 返り値はキーの昇順。同じ多重集合なら到着順に関係なくビット単位で同じ値になる。
pub fn aggregate(results: &[TrialResult]) -> Vec<Record> {
    let mut groups: BTreeMap<&Key, Vec<&Sample>> = BTreeMap::new();
    for r in results {
        groups.entry(&r.trial.key).or_default().push(&r.sample);
    }

    groups
        .into_iter()
        .map(|(key, samples)| summarize(key.clone(), &samples))
        .collect()
}

fn summarize(key: Key, samples: &[&Sample]) -> Record {
    let runs = samples.len();
    // u64 同士の和は順序に依存しない
    let ram_total: u128 = samples.iter().map(|s| s.ram_kb as u128).sum();

    Record {
        key,
        alloc_ms_avg: mean(samples.iter().map(|s| s.alloc_ms)),
        free_ms_avg: mean(samples.iter().map(|s| s.free_ms)),
        ram_kb_avg: ram_total as f64 / runs as f64,
        runs: runs as u32,
    }
}

/// 算術平均。値でソートしてから2語 (hi + lo) で誤差なく足し、
/// 余りも含めて割るので、結果は到着順に依存せず丸めは最後の1回だけになる。
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;

    let (mut hi, mut lo) = (0.0_f64, 0.0_f64);
    for v in values {
        // TwoSum: hi + v = sum + err が厳密に成り立つ
        let sum = hi + v;
        let back = sum - hi;
        let err = (hi - (sum - back)) + (v - back);
        hi = sum;
        lo += err;
    }

    let q = hi / n;
    // hi - q * n は fma で厳密に求まる
    let rem = (-q).mul_add(n, hi);
    q + (rem + lo) / n
}

/// 1件も成功しなかったキーを昇順で返す
pub fn missing_keys(expected: &[Key], records: &[Record]) -> Vec<Key> {
    let present: BTreeSet<&Key> = records.iter().map(|r| &r.key).collect();
    let expected: BTreeSet<&Key> = expected.iter().collect();
    expected
        .into_iter()
        .filter(|k| !present.contains(k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Trial;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::time::Duration;

    fn result(
        allocator: &str,
        n: u64,
        rep: u32,
        alloc_ms: f64,
        free_ms: f64,
        ram_kb: u64,
    ) -> TrialResult {
        TrialResult {
            trial: Trial {
                key: Key::new(allocator, "i32", n),
                repetition: rep,
            },
            sample: Sample {
                alloc_ms,
                free_ms,
                ram_kb,
            },
            wall: Duration::from_millis(1),
        }
    }

    fn example() -> Vec<TrialResult> {
        vec![
            result("Standard", 1000, 0, 1.0, 0.5, 100),
            result("Pool", 1000, 0, 0.5, 0.2, 90),
            result("Standard", 1000, 1, 3.0, 1.5, 100),
            result("Pool", 1000, 1, 0.7, 0.4, 110),
        ]
    }

    #[test]
    fn averages_each_key() {
        let records = aggregate(&example());
        assert_eq!(records.len(), 2);

        let pool = &records[0];
        assert_eq!(pool.key, Key::new("Pool", "i32", 1000));
        assert!((pool.alloc_ms_avg - 0.6).abs() < 1e-12);
        assert!((pool.free_ms_avg - 0.3).abs() < 1e-12);
        assert_eq!(pool.ram_kb_avg, 100.0);
        assert_eq!(pool.runs, 2);

        let standard = &records[1];
        assert_eq!(standard.key, Key::new("Standard", "i32", 1000));
        assert_eq!(standard.alloc_ms_avg, 2.0);
        assert_eq!(standard.free_ms_avg, 1.0);
        assert_eq!(standard.ram_kb_avg, 100.0);
        assert_eq!(standard.runs, 2);
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let mut results: Vec<TrialResult> = (0..50)
            .map(|i| {
                let v = 0.1 * (i as f64) + 1.0 / (i as f64 + 3.0);
                let allocator = if i % 2 == 0 { "Pool" } else { "Linear" };
                result(allocator, 1000, i, v, v * 0.7, 64 + i as u64)
            })
            .collect();
        let baseline = aggregate(&results);

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..10 {
            results.shuffle(&mut rng);
            assert_eq!(aggregate(&results), baseline);
        }
    }

    #[test]
    fn partial_failure_averages_only_successes() {
        let results = vec![
            result("Pool", 5000, 0, 2.0, 1.0, 10),
            result("Pool", 5000, 2, 4.0, 3.0, 30),
        ];
        let records = aggregate(&results);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].runs, 2);
        assert_eq!(records[0].alloc_ms_avg, 3.0);
        assert_eq!(records[0].free_ms_avg, 2.0);
        assert_eq!(records[0].ram_kb_avg, 20.0);
    }

    #[test]
    fn zero_sample_keys_are_reported() {
        let expected = vec![
            Key::new("Standard", "i32", 1000),
            Key::new("Pool", "i32", 1000),
            Key::new("Linear", "i32", 1000),
        ];
        let records = aggregate(&example());
        assert_eq!(
            missing_keys(&expected, &records),
            vec![Key::new("Linear", "i32", 1000)]
        );
        assert!(missing_keys(&expected[..2], &records).is_empty());
    }

    #[test]
    fn mean_survives_cancellation() {
        // 素朴に足すと 1.0 が 1e16 に吸収されて 0 になる
        let m = mean([1e16, 1.0, -1e16].into_iter());
        assert!((m - 1.0 / 3.0).abs() < 1e-15, "{m}");
    }

    #[test]
    fn mean_keeps_full_precision() {
        let m = mean([123456789.123456789, 123456789.123456789].into_iter());
        assert_eq!(m, 123456789.123456789);
        assert_eq!(mean([0.5, 0.7].into_iter()), 0.6);
        assert_eq!(mean([1.0, 3.0].into_iter()), 2.0);
        assert_eq!(mean([0.1; 10].into_iter()), 0.1);
    }

    #[test]
    fn empty_input_gives_no_records() {
        assert!(aggregate(&[]).is_empty());
    }
}
