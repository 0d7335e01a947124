//! Phred conversions and the Bayesian empirical-quality estimate.

/// Highest quality bin considered by the estimate.
pub const MAX_REASONABLE_Q_SCORE: u32 = 60;
/// Ceiling applied to reported empirical qualities.
pub const MAX_RECALIBRATED_Q_SCORE: f64 = 93.0;
/// Distances beyond this share the prior of this distance.
const MAX_PRIOR_DISTANCE: u32 = 40;
/// Gaussian prior amplitude.
const PRIOR_AMPLITUDE: f64 = 0.9;
/// Gaussian prior standard deviation.
const PRIOR_SIGMA: f64 = 0.5;

/// Error probability of a Phred quality.
pub fn qual_to_error_prob(qual: f64) -> f64 {
    10f64.powf(-qual / 10.0)
}

/// Phred quality of an error probability.
pub fn error_prob_to_qual(prob: f64) -> f64 {
    -10.0 * prob.log10()
}

/// Reported quality implied by accumulated expected errors.
pub fn estimated_reported_quality(expected_errors: f64, observations: u64) -> f64 {
    if observations == 0 {
        return 0.0;
    }
    error_prob_to_qual(expected_errors / observations as f64)
}

fn log10_prior(q_empirical: u32, q_reported: f64) -> f64 {
    let distance = (f64::from(q_empirical) - q_reported).abs() as u32;
    let distance = f64::from(distance.min(MAX_PRIOR_DISTANCE));
    let density =
        PRIOR_AMPLITUDE * (-(distance * distance) / (2.0 * PRIOR_SIGMA * PRIOR_SIGMA)).exp();
    if density == 0.0 {
        f64::MIN
    } else {
        density.log10()
    }
}

/// Binomial log10 likelihood without the coefficient, which is the same
/// for every quality bin and cancels in the argmax.
fn log10_likelihood(q_empirical: u32, observations: u64, errors: u64) -> f64 {
    if observations == 0 {
        return 0.0;
    }
    let p = qual_to_error_prob(f64::from(q_empirical));
    let log_p = p.log10();
    let log_not_p = (1.0 - p).log10();
    let errors_f = errors as f64;
    let value = errors_f * log_p + (observations - errors.min(observations)) as f64 * log_not_p;
    if value.is_finite() {
        value
    } else {
        f64::MIN
    }
}

/// MAP estimate of the true quality given `errors` in `observations` and a
/// prior centred on `prior_quality`.
pub fn bayesian_estimate(observations: u64, errors: u64, prior_quality: f64) -> f64 {
    let mut best_q = 0;
    let mut best = f64::NEG_INFINITY;
    for q in 0..=MAX_REASONABLE_Q_SCORE {
        let posterior =
            log10_prior(q, prior_quality) + log10_likelihood(q, observations, errors);
        if posterior > best {
            best = posterior;
            best_q = q;
        }
    }
    f64::from(best_q)
}

/// Empirical quality of a bucket, with +1 error / +2 observation smoothing.
pub fn empirical_quality(observations: u64, mismatches: f64, prior_quality: f64) -> f64 {
    let errors = (mismatches + 0.5).floor().max(0.0) as u64 + 1;
    let observations = observations + 2;
    bayesian_estimate(observations, errors, prior_quality).min(MAX_RECALIBRATED_Q_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phred_round_trip() {
        assert!((qual_to_error_prob(30.0) - 0.001).abs() < 1e-12);
        assert!((error_prob_to_qual(0.01) - 20.0).abs() < 1e-9);
        assert!((estimated_reported_quality(0.1, 100) - 30.0).abs() < 1e-9);
        assert_eq!(estimated_reported_quality(0.0, 0), 0.0);
    }

    #[test]
    fn no_data_returns_the_prior() {
        assert_eq!(bayesian_estimate(0, 0, 25.0), 25.0);
    }

    #[test]
    fn error_rate_dominates_with_many_observations() {
        // 1 error in 1000 bases is Q30 regardless of a Q20 prior.
        let q = empirical_quality(1_000_000, 999.0, 20.0);
        assert!((q - 30.0).abs() <= 1.0, "got {q}");
    }

    #[test]
    fn few_observations_stay_near_the_prior() {
        let q = empirical_quality(10, 0.0, 30.0);
        assert!((q - 30.0).abs() <= 2.0, "got {q}");
    }

    #[test]
    fn estimate_is_capped() {
        assert!(empirical_quality(u64::MAX / 4, 0.0, 60.0) <= MAX_RECALIBRATED_Q_SCORE);
    }
}
