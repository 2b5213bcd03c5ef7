//! Reference (null-model) potentials used to normalize restraint energies

use crate::observation::Observation;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Errors raised while computing reference potentials
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Calibration array '{name}' has {actual} entries, expected one per observation ({expected})")]
    CalibrationLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Calibration array '{name}' must be strictly positive")]
    NonPositiveCalibration { name: String },
}

/// Which null-model log-density corrects the restraint energy.
/// `Uniform` applies no correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    #[default]
    Uniform,
    Exp,
    Gaussian,
}

/// Weighted sum of the exponential null-model negative log-density,
/// `ln(beta_j) + model_j / beta_j`, over all observations. The betas
/// come from an external calibration, one per record.
pub fn neglog_exponential(
    observations: &[Observation],
    betas: &[f64],
) -> Result<f64, ReferenceError> {
    if betas.len() != observations.len() {
        return Err(ReferenceError::CalibrationLength {
            name: "betas".to_string(),
            expected: observations.len(),
            actual: betas.len(),
        });
    }
    if betas.iter().any(|&b| b <= 0.0) {
        return Err(ReferenceError::NonPositiveCalibration {
            name: "betas".to_string(),
        });
    }

    let mut sum = 0.0;
    for (obs, &beta) in observations.iter().zip(betas) {
        sum += obs.weight * (beta.ln() + obs.model / beta);
    }
    Ok(sum)
}

/// Weighted sum of the Gaussian null-model negative log-density,
/// `ln(sqrt(2 pi)) + ln(sigma_j) + (model_j - mean_j)^2 / (2 sigma_j^2)`,
/// over all observations.
pub fn neglog_gaussian(
    observations: &[Observation],
    means: &[f64],
    sigmas: &[f64],
) -> Result<f64, ReferenceError> {
    if means.len() != observations.len() {
        return Err(ReferenceError::CalibrationLength {
            name: "ref_mean".to_string(),
            expected: observations.len(),
            actual: means.len(),
        });
    }
    if sigmas.len() != observations.len() {
        return Err(ReferenceError::CalibrationLength {
            name: "ref_sigma".to_string(),
            expected: observations.len(),
            actual: sigmas.len(),
        });
    }
    if sigmas.iter().any(|&s| s <= 0.0) {
        return Err(ReferenceError::NonPositiveCalibration {
            name: "ref_sigma".to_string(),
        });
    }

    let mut sum = 0.0;
    for ((obs, &mean), &sigma) in observations.iter().zip(means).zip(sigmas) {
        let dev = obs.model - mean;
        sum += obs.weight * ((2.0 * PI).sqrt().ln() + sigma.ln() + dev * dev / (2.0 * sigma * sigma));
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::AtomIndices;
    use assert_approx_eq::assert_approx_eq;

    fn obs(model: f64, weight: f64) -> Observation {
        let mut o = Observation::new(AtomIndices::Single(0), 0.0, model);
        o.weight = weight;
        o
    }

    #[test]
    fn test_exponential_reference() {
        let records = vec![obs(2.0, 1.0), obs(4.0, 0.5)];
        let betas = vec![1.0, 2.0];

        // 1.0 * (ln 1 + 2/1) + 0.5 * (ln 2 + 4/2)
        let expected = 2.0 + 0.5 * (2.0_f64.ln() + 2.0);
        assert_approx_eq!(
            neglog_exponential(&records, &betas).unwrap(),
            expected,
            1e-12
        );
    }

    #[test]
    fn test_gaussian_reference() {
        let records = vec![obs(3.0, 1.0)];
        let means = vec![1.0];
        let sigmas = vec![2.0];

        let expected =
            (2.0 * PI).sqrt().ln() + 2.0_f64.ln() + (3.0_f64 - 1.0).powi(2) / (2.0 * 4.0);
        assert_approx_eq!(
            neglog_gaussian(&records, &means, &sigmas).unwrap(),
            expected,
            1e-12
        );
    }

    #[test]
    fn test_calibration_length_mismatch_is_fatal() {
        let records = vec![obs(1.0, 1.0), obs(2.0, 1.0)];
        assert!(neglog_exponential(&records, &[1.0]).is_err());
        assert!(neglog_gaussian(&records, &[0.0, 0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_nonpositive_calibration_rejected() {
        let records = vec![obs(1.0, 1.0)];
        assert!(neglog_exponential(&records, &[0.0]).is_err());
        assert!(neglog_gaussian(&records, &[0.0], &[-1.0]).is_err());
    }

    #[test]
    fn test_mode_parses_from_config_strings() {
        let m: ReferenceMode = serde_json::from_str("\"exp\"").unwrap();
        assert_eq!(m, ReferenceMode::Exp);
        let m: ReferenceMode = serde_json::from_str("\"gaussian\"").unwrap();
        assert_eq!(m, ReferenceMode::Gaussian);
        assert_eq!(ReferenceMode::default(), ReferenceMode::Uniform);
    }
}
