// ============================================================
// Layer 4: Train/Validation Splitter
// ============================================================
// Used when no validation directories are configured: the
// training samples are shuffled with a seeded RNG and the
// tail becomes the validation set.
//
// The seed comes from the training config, so the same seed
// always yields the same split.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle `samples` deterministically and split into (train, validation).
///
/// `train_fraction` is clamped into `[0, 1]`.
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let fraction = train_fraction.clamp(0.0, 1.0);
    let split_at = (((total as f64) * fraction).round() as usize).min(total);
    let val      = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation (seed {})",
        samples.len(),
        val.len(),
        seed,
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.8, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (train, val)      = split_train_val(items, 0.7, 1);
        let mut all: Vec<usize> = train.into_iter().chain(val).collect();
        all.sort();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_train_val((0..30).collect::<Vec<u32>>(), 0.5, 7);
        let b = split_train_val((0..30).collect::<Vec<u32>>(), 0.5, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val)      = split_train_val(items, 0.8, 0);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_fraction_is_clamped() {
        let (train, val) = split_train_val((0..10).collect::<Vec<u8>>(), 1.5, 3);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }
}
