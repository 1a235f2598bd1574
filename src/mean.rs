use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::BenchTrendError;

/// Aggregate used to summarise all test cases of one report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanMode {
    Arithmetic,
    Geometric,
    Harmonic,
}

impl MeanMode {
    pub const ALL: [MeanMode; 3] = [MeanMode::Arithmetic, MeanMode::Geometric, MeanMode::Harmonic];

    pub fn as_str(self) -> &'static str {
        match self {
            MeanMode::Arithmetic => "arithmetic",
            MeanMode::Geometric => "geometric",
            MeanMode::Harmonic => "harmonic",
        }
    }

    /// Mean of `values`.
    ///
    /// Empty input and non-finite values are undefined for every mode;
    /// geometric and harmonic means are also undefined for zero or negative values.
    pub fn compute(self, values: &[f64]) -> Result<f64, BenchTrendError> {
        if values.is_empty() {
            return Err(BenchTrendError::undefined_ratio(format!(
                "{} mean of no values",
                self.as_str()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(BenchTrendError::undefined_ratio(format!(
                "{} mean over non-finite value {bad}",
                self.as_str()
            )));
        }
        let n = values.len() as f64;
        match self {
            MeanMode::Arithmetic => Ok(values.iter().sum::<f64>() / n),
            MeanMode::Geometric => {
                require_positive(self, values)?;
                let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
                Ok((log_sum / n).exp())
            }
            MeanMode::Harmonic => {
                require_positive(self, values)?;
                let reciprocal_sum: f64 = values.iter().map(|v| 1.0 / v).sum();
                Ok(n / reciprocal_sum)
            }
        }
    }
}

fn require_positive(mode: MeanMode, values: &[f64]) -> Result<(), BenchTrendError> {
    match values.iter().find(|v| **v <= 0.0) {
        Some(bad) => Err(BenchTrendError::undefined_ratio(format!(
            "{} mean over non-positive value {bad}",
            mode.as_str()
        ))),
        None => Ok(()),
    }
}

impl fmt::Display for MeanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeanMode {
    type Err = BenchTrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arithmetic" | "arit" | "arithmeticmean" => Ok(MeanMode::Arithmetic),
            "geometric" | "geom" | "geometricmean" => Ok(MeanMode::Geometric),
            "harmonic" | "harm" | "harmonicmean" => Ok(MeanMode::Harmonic),
            other => Err(BenchTrendError::invalid_input(format!(
                "unknown mean mode {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_means_of_powers_of_two() {
        let values = [1.0, 2.0, 4.0];
        let arithmetic = MeanMode::Arithmetic.compute(&values).unwrap();
        let geometric = MeanMode::Geometric.compute(&values).unwrap();
        let harmonic = MeanMode::Harmonic.compute(&values).unwrap();
        assert!((arithmetic - 7.0 / 3.0).abs() < EPS);
        assert!((geometric - 2.0).abs() < EPS);
        assert!((harmonic - 12.0 / 7.0).abs() < EPS);
    }

    #[test]
    fn test_geometric_and_harmonic_reject_non_positive() {
        for values in [[1.0, 0.0, 4.0], [1.0, -2.0, 4.0]] {
            assert!(matches!(
                MeanMode::Geometric.compute(&values),
                Err(BenchTrendError::UndefinedRatio(_))
            ));
            assert!(matches!(
                MeanMode::Harmonic.compute(&values),
                Err(BenchTrendError::UndefinedRatio(_))
            ));
        }
    }

    #[test]
    fn test_arithmetic_accepts_zero_and_negative() {
        let mean = MeanMode::Arithmetic.compute(&[0.0, -3.0, 6.0]).unwrap();
        assert!((mean - 1.0).abs() < EPS);
    }

    #[test]
    fn test_only_arithmetic_is_defined_over_non_positive_values() {
        let values = [2.0, 0.0, -2.0];
        assert_eq!(MeanMode::Arithmetic.compute(&values).unwrap(), 0.0);
        for mode in [MeanMode::Geometric, MeanMode::Harmonic] {
            assert!(mode.compute(&values).is_err(), "{mode} should be undefined");
        }
    }

    #[test]
    fn test_empty_input_is_undefined() {
        for mode in MeanMode::ALL {
            assert!(mode.compute(&[]).is_err());
        }
    }

    #[test]
    fn test_parse_mode_names() {
        assert_eq!("Geometric".parse::<MeanMode>().unwrap(), MeanMode::Geometric);
        assert_eq!("harm".parse::<MeanMode>().unwrap(), MeanMode::Harmonic);
        assert!("median".parse::<MeanMode>().is_err());
    }
}
