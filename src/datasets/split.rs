//! Deterministic training/validation partitioning.
//!
//! A sample lands in a partition based only on the SHA-1 of its base name, so the
//! assignment survives reruns, listing order changes and corpus growth.

use std::{fmt, fs, path::Path, str::FromStr};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use sha1::{Digest, Sha1};

use super::errors::{DatasetError, DatasetResult};

/// Largest reduced hash value; the hash is taken modulo `MAX_NUM_PER_CLASS + 1`.
pub const MAX_NUM_PER_CLASS: u64 = (1 << 27) - 1;

/// Seed used when the caller has no opinion.
pub const DEFAULT_SEED: u64 = 888;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Training,
    Validation,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Training, Partition::Validation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Training => "training",
            Partition::Validation => "validation",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "training" | "train" => Ok(Partition::Training),
            "validation" | "val" => Ok(Partition::Validation),
            _ => Err(DatasetError::SplitNotFound(s.to_string())),
        }
    }
}

/// One sample, named by its directory under the data root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub image: String,
}

impl Entry {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

/// Entries grouped by partition, each list in its shuffled order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataIndex {
    pub training: Vec<Entry>,
    pub validation: Vec<Entry>,
}

impl DataIndex {
    /// Index the sub-directories of `data_dir`.
    ///
    /// Names are sorted before splitting so the shuffled order does not depend on how the
    /// filesystem happens to list them.
    pub fn from_dir<P: AsRef<Path>>(
        data_dir: P,
        validation_percentage: f64,
        seed: u64,
    ) -> DatasetResult<Self> {
        let data_dir = data_dir.as_ref();
        let listing = fs::read_dir(data_dir).map_err(|e| DatasetError::io(data_dir, e))?;

        let mut names = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|e| DatasetError::io(data_dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                log::debug!("skipping non-directory entry {}", path.display());
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(_) => log::warn!("skipping non-UTF-8 sample directory {}", path.display()),
            }
        }
        names.sort();

        let index = split(&names, validation_percentage, seed)?;
        log::info!(
            "indexed {}: training={} validation={} (validation_percentage={validation_percentage})",
            data_dir.display(),
            index.training.len(),
            index.validation.len(),
        );
        Ok(index)
    }

    pub fn get(&self, partition: Partition) -> &[Entry] {
        match partition {
            Partition::Training => &self.training,
            Partition::Validation => &self.validation,
        }
    }

    pub fn size(&self, partition: Partition) -> usize {
        self.get(partition).len()
    }

    pub fn len(&self) -> usize {
        self.training.len() + self.validation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_mut(&mut self, partition: Partition) -> &mut Vec<Entry> {
        match partition {
            Partition::Training => &mut self.training,
            Partition::Validation => &mut self.validation,
        }
    }
}

/// Percentage in `[0, 100]` derived from the SHA-1 of the base name of `filename`.
pub fn hash_percentage(filename: &str) -> f64 {
    let digest = Sha1::digest(base_name(filename).as_bytes());
    // h mod 2^27 only depends on the low 27 bits of the big-endian integer.
    let tail = u32::from_be_bytes([digest[16], digest[17], digest[18], digest[19]]);
    let reduced = u64::from(tail) & MAX_NUM_PER_CLASS;
    reduced as f64 * (100.0 / MAX_NUM_PER_CLASS as f64)
}

pub fn which_partition(filename: &str, validation_percentage: f64) -> Partition {
    if hash_percentage(filename) < validation_percentage {
        Partition::Validation
    } else {
        Partition::Training
    }
}

/// Partition `filenames`, then shuffle validation and training (in that order) with one rng
/// seeded from `seed`.
pub fn split<S: AsRef<str>>(
    filenames: &[S],
    validation_percentage: f64,
    seed: u64,
) -> DatasetResult<DataIndex> {
    check_percentage(validation_percentage)?;

    let mut index = DataIndex::default();
    for name in filenames {
        let name = name.as_ref();
        index
            .get_mut(which_partition(name, validation_percentage))
            .push(Entry::new(name));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for partition in [Partition::Validation, Partition::Training] {
        index.get_mut(partition).shuffle(&mut rng);
    }
    Ok(index)
}

fn check_percentage(validation_percentage: f64) -> DatasetResult<()> {
    if (0.0..=100.0).contains(&validation_percentage) {
        Ok(())
    } else {
        Err(DatasetError::InvalidConfig(format!(
            "validation_percentage must be within [0, 100], got {validation_percentage}"
        )))
    }
}

fn base_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sample_{i:04}")).collect()
    }

    fn sorted(entries: &[Entry]) -> Vec<String> {
        let mut v: Vec<_> = entries.iter().map(|e| e.image.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn split_is_reproducible() {
        let files = names(200);
        let a = split(&files, 20.0, DEFAULT_SEED).unwrap();
        let b = split(&files, 20.0, DEFAULT_SEED).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
    }

    #[test]
    fn membership_ignores_rest_of_corpus() {
        let files = names(300);
        let full = split(&files, 30.0, 1).unwrap();
        let half = split(&files[..150], 30.0, 2).unwrap();
        for e in &half.validation {
            assert!(full.validation.contains(e));
        }
        for e in &half.training {
            assert!(full.training.contains(e));
        }
    }

    #[test]
    fn every_entry_lands_in_exactly_one_partition() {
        let files = names(500);
        let index = split(&files, 35.0, 7).unwrap();
        let mut all = sorted(&index.training);
        all.extend(sorted(&index.validation));
        all.sort();
        assert_eq!(all, files);
    }

    #[test]
    fn seed_changes_order_not_membership() {
        let files = names(100);
        let a = split(&files, 50.0, 1).unwrap();
        let b = split(&files, 50.0, 2).unwrap();
        assert_eq!(sorted(&a.training), sorted(&b.training));
        assert_eq!(sorted(&a.validation), sorted(&b.validation));
        assert_ne!(a.training, b.training);
    }

    #[test]
    fn percentage_bounds_empty_partitions() {
        let files = names(100);
        assert!(split(&files, 0.0, 0).unwrap().validation.is_empty());
        assert!(split(&files, 100.0, 0).unwrap().training.is_empty());
    }

    #[test]
    fn ratio_converges() {
        let files = names(5000);
        let index = split(&files, 20.0, 0).unwrap();
        let frac = index.validation.len() as f64 / files.len() as f64;
        assert!((0.17..0.23).contains(&frac), "validation fraction {frac}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn from_dir_skips_non_utf8_names() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sample_ok")).unwrap();
        fs::create_dir(tmp.path().join(OsStr::from_bytes(b"bad_\xff_name"))).unwrap();

        let index = DataIndex::from_dir(tmp.path(), 50.0, 0).unwrap();
        assert_eq!(index.len(), 1);
        let all: Vec<_> = index.training.iter().chain(&index.validation).collect();
        assert_eq!(all[0].image, "sample_ok");
    }

    #[test]
    fn only_base_name_is_hashed() {
        assert_eq!(hash_percentage("a/b/img_1"), hash_percentage("img_1"));
        assert_eq!(
            which_partition("/data/train/img_1", 40.0),
            which_partition("img_1", 40.0)
        );
    }

    #[test]
    fn hash_percentage_matches_reference() {
        // sha1("") = da39a3ee...afd80709; low 27 bits of 0xafd80709 = 0x07d80709.
        let expected = 0x07d8_0709_u64 as f64 * (100.0 / MAX_NUM_PER_CLASS as f64);
        assert_eq!(hash_percentage(""), expected);
        let p = hash_percentage("sample_0001");
        assert!((0.0..=100.0).contains(&p));
    }

    #[test]
    fn ten_names_at_twenty_percent() {
        let files: Vec<_> = (0..10).map(|i| format!("sample_{i:02}")).collect();
        let index = split(&files, 20.0, DEFAULT_SEED).unwrap();
        assert_eq!(
            sorted(&index.validation),
            ["sample_00", "sample_02", "sample_09"]
        );
        assert_eq!(index.training.len(), 7);
    }

    #[test]
    fn rejects_out_of_range_percentage() {
        let files = names(3);
        assert!(matches!(
            split(&files, 101.0, 0),
            Err(DatasetError::InvalidConfig(_))
        ));
        assert!(split(&files, -1.0, 0).is_err());
        assert!(split(&files, f64::NAN, 0).is_err());
    }

    #[test]
    fn empty_corpus_gives_empty_partitions() {
        let index = split::<String>(&[], 20.0, 0).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.size(Partition::Training), 0);
        assert_eq!(index.size(Partition::Validation), 0);
    }

    #[test]
    fn partition_names_round_trip() {
        for p in Partition::ALL {
            assert_eq!(p.to_string().parse::<Partition>().unwrap(), p);
        }
        assert_eq!("VAL".parse::<Partition>().unwrap(), Partition::Validation);
        assert!(matches!(
            "testing".parse::<Partition>(),
            Err(DatasetError::SplitNotFound(name)) if name == "testing"
        ));
    }
}
