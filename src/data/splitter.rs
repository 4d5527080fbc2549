// ============================================================
// Partition Splitting
// ============================================================
// Splits are deterministic: no shuffling happens here, so the
// same pool and fractions always give the same partitions.
//
//   pool:   [ v v v v | t t t t t t t t t t t t ]
//             valid      train
//
// num_train = floor(len * (1 - valid_percent))
// num_valid = len - num_train

/// Sizes of the train and validation partitions for a pool of `len`.
pub fn partition_sizes(len: usize, valid_percent: f64) -> (usize, usize) {
    let num_train = ((len as f64) * (1.0 - valid_percent)).floor() as usize;
    let num_train = num_train.min(len);
    (num_train, len - num_train)
}

/// Split `samples` into (train, valid). Validation takes the first
/// `num_valid` items.
pub fn split_train_valid<T>(mut samples: Vec<T>, valid_percent: f64) -> (Vec<T>, Vec<T>) {
    let (_, num_valid) = partition_sizes(samples.len(), valid_percent);
    let train = samples.split_off(num_valid);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        train.len(),
        samples.len(),
    );

    (train, samples)
}

/// Split off the trailing `test_percent` of `samples` as a test set.
pub fn split_test<T>(mut samples: Vec<T>, test_percent: f64) -> (Vec<T>, Vec<T>) {
    let total    = samples.len();
    let num_test = (((total as f64) * test_percent).round() as usize).min(total);
    let test     = samples.split_off(total - num_test);
    (samples, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, valid)    = split_train_valid(items, 0.2);
        assert_eq!(train.len(), 80);
        assert_eq!(valid.len(), 20);
    }

    #[test]
    fn floor_favours_validation() {
        // 7 * 0.8 = 5.6 → 5 train, 2 valid
        assert_eq!(partition_sizes(7, 0.2), (5, 2));
    }

    #[test]
    fn partitions_are_disjoint_and_cover() {
        let items: Vec<usize> = (0..50).collect();
        let (train, valid)    = split_train_valid(items, 0.3);
        assert_eq!(valid, (0..15).collect::<Vec<_>>());
        assert_eq!(train, (15..50).collect::<Vec<_>>());
    }

    #[test]
    fn empty_dataset() {
        let (train, valid) = split_train_valid(Vec::<usize>::new(), 0.2);
        assert!(train.is_empty());
        assert!(valid.is_empty());
    }

    #[test]
    fn test_split_takes_the_tail() {
        let (rest, test) = split_test((0..10).collect::<Vec<usize>>(), 0.3);
        assert_eq!(rest, (0..7).collect::<Vec<_>>());
        assert_eq!(test, vec![7, 8, 9]);
    }
}
