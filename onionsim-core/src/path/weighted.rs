//! Weighted draws over relay candidates.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_distr::Exp1;

/// Draws one index with probability proportional to `weights`.
///
/// Non-finite and negative weights count as zero. When every weight is zero
/// the draw is uniform over all indices. Returns `None` only for an empty
/// slice.
pub fn choose_weighted<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let sanitized: Vec<f64> = weights.iter().map(|w| sanitize(*w)).collect();
    match WeightedIndex::new(&sanitized) {
        Ok(index) => Some(index.sample(rng)),
        Err(_) => Some(rng.random_range(0..weights.len())),
    }
}

/// Orders indices as successive weighted draws without replacement.
///
/// Uses exponential keys: index `i` gets `E_i / w_i` with `E_i ~ Exp(1)` and
/// indices are sorted by ascending key. Zero-weight indices come last in
/// their original order.
pub fn weighted_order<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let mut keyed: Vec<(f64, usize)> = weights
        .iter()
        .enumerate()
        .map(|(index, weight)| {
            let draw: f64 = Exp1.sample(rng);
            let weight = sanitize(*weight);
            let key = if weight > 0.0 { draw / weight } else { f64::INFINITY };
            (key, index)
        })
        .collect();

    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, index)| index).collect()
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn test_choose_weighted_skips_zero_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let index = choose_weighted(&[0.0, 3.0, 0.0, 1.0], &mut rng).unwrap();
            assert!(index == 1 || index == 3);
        }
    }

    #[test]
    fn test_choose_weighted_degenerate_inputs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(choose_weighted(&[], &mut rng), None);

        let mut seen = [false; 3];
        for _ in 0..200 {
            let index = choose_weighted(&[0.0, f64::NAN, -1.0], &mut rng).unwrap();
            seen[index] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }

    #[test]
    fn test_weighted_order_is_a_permutation() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let order = weighted_order(&[5.0, 0.0, 1.0, 2.0, 0.0], &mut rng);

        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
        assert_eq!(&order[3..], &[1, 4]);
    }

    #[test]
    fn test_weighted_order_favours_heavy_items() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let trials = 5000;
        let heavy_first = (0..trials)
            .filter(|_| weighted_order(&[9.0, 1.0], &mut rng)[0] == 0)
            .count();

        let share = heavy_first as f64 / trials as f64;
        assert!((share - 0.9).abs() < 0.02, "heavy item first in {share}");
    }
}
