//! Entropy and divergence primitives

use std::f64::consts::LN_2;

/// Base-2 logarithm with `log2(0) == 1`.
///
/// Every caller multiplies the result by the same probability, so a zero
/// probability contributes zero instead of NaN.
fn log2(x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    x.ln() / LN_2
}

/// Shannon entropy in bits of a discrete distribution
pub fn information(probabilities: &[f64]) -> f64 {
    probabilities.iter().map(|&p| -(p * log2(p))).sum()
}

/// Entropy of a two-outcome distribution `[p, 1 - p]`
pub fn binary_information(p: f64) -> f64 {
    information(&[p, 1.0 - p])
}

/// Divergence contribution in bits of one value's rule share against its
/// pattern share
pub fn kl_distance_bits(pattern_prob: f64, rule_prob: f64) -> f64 {
    -(rule_prob * (log2(pattern_prob) - log2(rule_prob)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_extremes() {
        assert_eq!(binary_information(0.0), 0.0);
        assert_eq!(binary_information(1.0), 0.0);
        assert!((binary_information(0.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_information_known_value() {
        // 200 of 1000 users converted
        assert!((binary_information(0.2) - 0.721928).abs() < 1e-5);
        assert!((binary_information(0.6) - 0.970951).abs() < 1e-5);
    }

    #[test]
    fn test_information_is_symmetric() {
        for p in [0.1, 0.25, 0.4] {
            assert!((binary_information(p) - binary_information(1.0 - p)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_kl_distance_identical_distribution_is_zero() {
        for p in [0.05, 0.3, 0.5, 1.0] {
            assert_eq!(kl_distance_bits(p, p), 0.0);
        }
    }

    #[test]
    fn test_kl_distance_sign() {
        // Value over-represented among converters pushes the sum up
        assert!(kl_distance_bits(0.2, 0.4) > 0.0);
        assert!(kl_distance_bits(0.4, 0.2) < 0.0);
    }

    #[test]
    fn test_zero_probabilities_stay_finite() {
        assert!(information(&[0.0, 0.0, 1.0]).is_finite());
        assert!(kl_distance_bits(0.0, 0.0).is_finite());
        assert_eq!(kl_distance_bits(0.3, 0.0), 0.0);
    }
}
