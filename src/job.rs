use std::fmt;

use rand::seq::SliceRandom;
use rand::SeedableRng;

/// 集計キー (allocator, type, n)。フィールド順がそのままソート順になる。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub allocator: String,
    pub ty: String,
    pub n: u64,
}

impl Key {
    pub fn new(allocator: impl Into<String>, ty: impl Into<String>, n: u64) -> Self {
        Key {
            allocator: allocator.into(),
            ty: ty.into(),
            n,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.allocator, self.ty, self.n)
    }
}

/// 1回分の実行予定
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trial {
    pub key: Key,
    pub repetition: u32,
}

/// 測定パラメータ空間
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matrix {
    pub allocators: Vec<String>,
    pub types: Vec<String>,
    pub sizes: Vec<u64>,
    pub repeats: u32,
}

impl Matrix {
    /// 直積のキー一覧 (繰り返しなし)
    pub fn keys(&self) -> Vec<Key> {
        let mut keys =
            Vec::with_capacity(self.allocators.len() * self.types.len() * self.sizes.len());
        for allocator in &self.allocators {
            for ty in &self.types {
                for &n in &self.sizes {
                    keys.push(Key::new(allocator.as_str(), ty.as_str(), n));
                }
            }
        }
        keys
    }

    pub fn trial_count(&self) -> usize {
        self.allocators.len() * self.types.len() * self.sizes.len() * self.repeats as usize
    }

    /// 各組み合わせを `repeats` 回ずつ並べる
    pub fn enumerate(&self) -> Vec<Trial> {
        let mut trials = Vec::with_capacity(self.trial_count());
        for key in self.keys() {
            for repetition in 0..self.repeats {
                trials.push(Trial {
                    key: key.clone(),
                    repetition,
                });
            }
        }
        trials
    }
}

/// 投入順をシード付きでシャッフルする
pub fn shuffle(trials: &mut [Trial], seed: u64) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    trials.shuffle(&mut rng);
}
