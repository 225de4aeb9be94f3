//! Stability metrics: maps the IQR of per-template mean logits to a
//! stability score and a qualitative band.

use crate::types::{StabilityBand, StabilityOutput};

const CALIBRATION_SCALE: f64 = 0.2;
const CALIBRATION_EXPONENT: f64 = 1.7;
const BAND_HIGH_MAX: f64 = 0.05;
const BAND_MEDIUM_MAX: f64 = 0.30;

/// Computes both the compact and calibrated stability scores plus the band,
/// from the raw template-mean-logit IQR.
pub fn stability(template_iqr_logit: f64) -> StabilityOutput {
    let stability_score = 1.0 / (1.0 + template_iqr_logit);
    let calibrated_stability_score =
        1.0 / (1.0 + (template_iqr_logit / CALIBRATION_SCALE).powf(CALIBRATION_EXPONENT));

    let band = if template_iqr_logit <= BAND_HIGH_MAX {
        StabilityBand::High
    } else if template_iqr_logit <= BAND_MEDIUM_MAX {
        StabilityBand::Medium
    } else {
        StabilityBand::Low
    };

    StabilityOutput {
        stability_score,
        calibrated_stability_score,
        band,
    }
}

/// `is_stable` is a property of the realized CI width, not of the IQR alone,
/// so it's computed by the orchestrator from `ci_width` against the
/// configured `stability_width` threshold.
pub fn is_stable(ci_width: f64, stability_width: f64) -> bool {
    ci_width <= stability_width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_iqr_is_perfectly_stable() {
        let out = stability(0.0);
        assert_eq!(out.stability_score, 1.0);
        assert_eq!(out.calibrated_stability_score, 1.0);
        assert_eq!(out.band, StabilityBand::High);
    }

    #[test]
    fn score_is_monotonically_decreasing_in_iqr() {
        let low = stability(0.1).stability_score;
        let high = stability(0.5).stability_score;
        assert!(low > high);
    }

    #[test]
    fn band_thresholds() {
        assert_eq!(stability(0.05).band, StabilityBand::High);
        assert_eq!(stability(0.30).band, StabilityBand::Medium);
        assert_eq!(stability(0.31).band, StabilityBand::Low);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        for iqr in [0.0, 0.01, 0.2, 1.0, 10.0] {
            let out = stability(iqr);
            assert!((0.0..=1.0).contains(&out.stability_score));
            assert!((0.0..=1.0).contains(&out.calibrated_stability_score));
        }
    }

    #[test]
    fn is_stable_threshold() {
        assert!(is_stable(0.2, 0.2));
        assert!(!is_stable(0.21, 0.2));
    }
}
