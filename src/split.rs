//! Stratified train/validation splitting.

use crate::{common::*, dataset::FileRecord, error::DataError};

/// The stratified splitter initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitterInit {
    /// The fraction of each stratum sent to validation.
    pub val_fraction: R64,
    /// The seed for stratum shuffling and singleton assignment.
    pub seed: u64,
}

impl Default for SplitterInit {
    fn default() -> Self {
        Self {
            val_fraction: r64(0.2),
            seed: 42,
        }
    }
}

impl SplitterInit {
    pub fn build(self) -> Result<StratifiedSplitter, DataError> {
        let Self { val_fraction, seed } = self;
        let fraction = val_fraction.raw();

        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(DataError::InvalidFraction { fraction });
        }

        Ok(StratifiedSplitter {
            val_fraction: fraction,
            seed,
        })
    }
}

/// The record-level stratified splitter.
///
/// Records sharing the same set of active labels form one stratum, so each
/// record lands in exactly one output set and train/validation never
/// overlap, even for multi-label records. For one-hot labels this equals
/// per-category grouping.
#[derive(Debug, Clone)]
pub struct StratifiedSplitter {
    val_fraction: f64,
    seed: u64,
}

/// The ordered pair of output record sets.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub train: Vec<Arc<FileRecord>>,
    pub val: Vec<Arc<FileRecord>>,
}

impl StratifiedSplitter {
    /// Partition records such that every stratum contributes roughly
    /// `val_fraction` of its records to validation.
    ///
    /// The same input and seed always produce the same split. Strata of
    /// size one are assigned by a biased coin flip, so their balance holds
    /// in expectation only.
    pub fn split(&self, records: &[Arc<FileRecord>]) -> Result<Split, DataError> {
        if records.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        // group records by active-label set, preserving arrival order
        let groups: IndexMap<Vec<usize>, Vec<Arc<FileRecord>>> = {
            let mut groups: IndexMap<_, Vec<_>> = IndexMap::new();
            records.iter().for_each(|record| {
                groups
                    .entry(record.active_labels())
                    .or_insert_with(Vec::new)
                    .push(record.clone());
            });
            groups
        };

        // singleton strata share one advancing rng so their flips differ
        let mut coin_rng = StdRng::seed_from_u64(self.seed);
        let mut split = Split::default();

        for (_labels, mut group) in groups {
            if group.len() == 1 {
                let record = group.pop().unwrap();
                if coin_rng.gen_bool(self.val_fraction) {
                    split.val.push(record);
                } else {
                    split.train.push(record);
                }
            } else {
                // a fresh rng per stratum, so identical contents always
                // partition identically
                let mut rng = StdRng::seed_from_u64(self.seed);
                group.shuffle(&mut rng);

                let num_val = ((group.len() as f64 * self.val_fraction).ceil() as usize)
                    .min(group.len() - 1);
                let val = group.split_off(group.len() - num_val);

                split.train.extend(group);
                split.val.extend(val);
            }
        }

        Ok(split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, label: &[f32]) -> Arc<FileRecord> {
        Arc::new(FileRecord {
            path: PathBuf::from(format!("{}.png", name)),
            label: label.to_vec(),
        })
    }

    fn paths(records: &[Arc<FileRecord>]) -> Vec<PathBuf> {
        records.iter().map(|record| record.path.clone()).collect()
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let splitter = SplitterInit::default().build().unwrap();
        let result = splitter.split(&[]);
        assert!(matches!(result, Err(DataError::EmptyDataset)));
    }

    #[test]
    fn out_of_range_fractions_are_rejected() {
        for fraction in [0.0, 1.0, 1.5, -0.2] {
            let result = SplitterInit {
                val_fraction: r64(fraction),
                seed: 42,
            }
            .build();
            assert!(matches!(
                result,
                Err(DataError::InvalidFraction { .. })
            ));
        }
    }

    #[test]
    fn split_covers_every_record_exactly_once() {
        let records: Vec<_> = (0..50)
            .map(|index| {
                let label = match index % 3 {
                    0 => [1.0, 0.0, 0.0],
                    1 => [0.0, 1.0, 0.0],
                    _ => [0.0, 0.0, 1.0],
                };
                record(&format!("{}", index), &label)
            })
            .collect();

        let splitter = SplitterInit::default().build().unwrap();
        let Split { train, val } = splitter.split(&records).unwrap();

        assert_eq!(train.len() + val.len(), records.len());

        let mut output = paths(&train);
        output.extend(paths(&val));
        output.sort();
        let mut input = paths(&records);
        input.sort();
        assert_eq!(output, input);
    }

    #[test]
    fn split_is_idempotent_under_fixed_seed() {
        let records: Vec<_> = (0..40)
            .map(|index| {
                let label = if index % 2 == 0 {
                    [1.0, 0.0]
                } else {
                    [0.0, 1.0]
                };
                record(&format!("{}", index), &label)
            })
            .collect();

        let splitter = SplitterInit {
            val_fraction: r64(0.25),
            seed: 7,
        }
        .build()
        .unwrap();

        let first = splitter.split(&records).unwrap();
        let second = splitter.split(&records).unwrap();

        assert_eq!(paths(&first.train), paths(&second.train));
        assert_eq!(paths(&first.val), paths(&second.val));
    }

    #[test]
    fn imbalanced_categories_stay_balanced() {
        // 4 records of category A, 96 of category B
        let records: Vec<_> = (0..100)
            .map(|index| {
                let label = if index < 4 { [1.0, 0.0] } else { [0.0, 1.0] };
                record(&format!("{}", index), &label)
            })
            .collect();

        let splitter = SplitterInit::default().build().unwrap();
        let Split { val, .. } = splitter.split(&records).unwrap();

        let num_a = val.iter().filter(|record| record.label[0] > 0.0).count();
        let num_b = val.iter().filter(|record| record.label[1] > 0.0).count();

        assert_eq!(num_a, 1);
        assert!((19..=20).contains(&num_b), "got {} B records", num_b);
    }

    #[test]
    fn multi_label_record_is_not_duplicated() {
        let mut records: Vec<_> = (0..10)
            .map(|index| {
                let label = if index % 2 == 0 {
                    [1.0, 0.0]
                } else {
                    [0.0, 1.0]
                };
                record(&format!("{}", index), &label)
            })
            .collect();
        // active in both categories
        records.push(record("both", &[1.0, 1.0]));

        let splitter = SplitterInit::default().build().unwrap();
        let Split { train, val } = splitter.split(&records).unwrap();

        let occurrences = paths(&train)
            .into_iter()
            .chain(paths(&val))
            .filter(|path| path == &PathBuf::from("both.png"))
            .count();
        assert_eq!(occurrences, 1);
    }
}
