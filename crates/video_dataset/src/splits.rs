//! Seeded train/test splitting.

use crate::types::{DatasetResult, LabeledDataset, SplitDataset, VideoDatasetError};
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Number of test samples for `n` samples: `ceil(test_fraction * n)`.
pub fn test_count(n: usize, test_fraction: f64) -> DatasetResult<usize> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(VideoDatasetError::Split(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(VideoDatasetError::Split(format!(
            "{n} samples with test fraction {test_fraction} leaves {n_test} test and {} train samples",
            n.saturating_sub(n_test)
        )));
    }
    Ok(n_test)
}

/// Shuffle `0..n` with `seed`; the first `ceil(test_fraction * n)` indices are the test set.
pub fn split_indices(
    n: usize,
    test_fraction: f64,
    seed: u64,
) -> DatasetResult<(Vec<usize>, Vec<usize>)> {
    let n_test = test_count(n, test_fraction)?;
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train = order.split_off(n_test);
    Ok((train, order))
}

/// Partition a labeled dataset into train/test.
pub fn train_test_split(
    dataset: LabeledDataset,
    test_fraction: f64,
    seed: u64,
) -> DatasetResult<SplitDataset> {
    let (train_idx, test_idx) = split_indices(dataset.len(), test_fraction, seed)?;
    let LabeledDataset {
        clips,
        labels,
        videos,
        classes,
    } = dataset;
    let mut slots: Vec<Option<_>> = clips.into_iter().map(Some).collect();
    let mut take = |idx: &[usize]| {
        let mut x = Vec::with_capacity(idx.len());
        let mut y = Vec::with_capacity(idx.len());
        for &i in idx {
            if let Some(clip) = slots[i].take() {
                x.push(clip);
                y.push(labels[i]);
            }
        }
        (x, y)
    };
    let (x_train, y_train) = take(&train_idx);
    let (x_test, y_test) = take(&test_idx);
    Ok(SplitDataset {
        x_train,
        y_train,
        x_test,
        y_test,
        classes,
        videos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_rounds_up() {
        assert_eq!(test_count(30, 0.05).unwrap(), 2);
        assert_eq!(test_count(100, 0.05).unwrap(), 5);
        assert_eq!(test_count(10, 0.01).unwrap(), 1);
    }

    #[test]
    fn degenerate_splits_rejected() {
        assert!(test_count(1, 0.5).is_err());
        assert!(test_count(10, 0.0).is_err());
        assert!(test_count(10, 1.0).is_err());
        assert!(test_count(0, 0.2).is_err());
    }

    #[test]
    fn split_is_a_deterministic_partition() {
        let (train_a, test_a) = split_indices(30, 0.05, 42).unwrap();
        let (train_b, test_b) = split_indices(30, 0.05, 42).unwrap();
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a.len(), 28);
        assert_eq!(test_a.len(), 2);

        let mut all: Vec<usize> = train_a.iter().chain(test_a.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn different_seed_changes_order() {
        let (train_a, _) = split_indices(50, 0.2, 1).unwrap();
        let (train_b, _) = split_indices(50, 0.2, 2).unwrap();
        assert_ne!(train_a, train_b);
    }
}
