//! Per-metric confidence verdicts from two running tallies.
//!
//! The verdict is a pure function of `(trials, count_a, count_b)`:
//!
//! | counts | verdict |
//! |---|---|
//! | both zero | `("-", 0)` |
//! | one side zero | the other side, `100` |
//! | otherwise | one-sided pooled two-proportion z-test, `(1 - p) * 100` |
//! | z-test is NaN | `50` |
//! | z-test cannot run | `winning_count / (a + b) * 100` |

use std::f64::consts::SQRT_2;
use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::outcome::{Metric, RunningTally};

/// Which variant a verdict favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    A,
    B,
    /// No signal yet.
    #[serde(rename = "-")]
    Undecided,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::A => "A",
            Winner::B => "B",
            Winner::Undecided => "-",
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rung of the verdict ladder produced the confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictBasis {
    NoSignal,
    OneSided,
    ZTest,
    /// The z-test came out NaN; reported as a coin flip.
    Undefined,
    /// The z-test could not be evaluated; raw share of positive responses.
    RawProportion,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceVerdict {
    pub winner: Winner,
    pub confidence_percent: f64,
    pub basis: VerdictBasis,
}

impl ConfidenceVerdict {
    fn new(winner: Winner, confidence_percent: f64, basis: VerdictBasis) -> Self {
        Self {
            winner,
            confidence_percent,
            basis,
        }
    }
}

impl fmt::Display for ConfidenceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}% Vers. {}", self.confidence_percent, self.winner)
    }
}

/// Result of a one-sided two-proportion z-test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTest {
    pub z: f64,
    pub p_value: f64,
}

/// Reasons the z-test cannot be evaluated at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ZTestError {
    #[error("sample size must be positive")]
    EmptySample,
    #[error("non-finite test input")]
    NonFinite,
}

/// One-sided pooled z-test that the first proportion is larger than the second.
///
/// Both proportions share the sample size `nobs`. Degenerate inputs (zero pooled
/// variance with equal counts, counts above `nobs`) yield a NaN p-value rather
/// than an error; only inputs the test cannot be run on at all are errors.
pub fn proportions_ztest_larger(
    count_larger: u64,
    count_smaller: u64,
    nobs: u64,
) -> Result<ZTest, ZTestError> {
    if nobs == 0 {
        return Err(ZTestError::EmptySample);
    }
    let n = nobs as f64;
    let c1 = count_larger as f64;
    let c2 = count_smaller as f64;
    if !(n.is_finite() && c1.is_finite() && c2.is_finite()) {
        return Err(ZTestError::NonFinite);
    }

    let diff = c1 / n - c2 / n;
    let pooled = (c1 + c2) / (2.0 * n);
    let variance = pooled * (1.0 - pooled) * (2.0 / n);
    let z = diff / variance.sqrt();
    let p_value = 0.5 * erfc(z / SQRT_2);

    Ok(ZTest { z, p_value })
}

/// Confidence verdict for one metric.
///
/// Ties between positive counts go to A on every branch, the raw-proportion
/// fallback included.
pub fn calc_confidence(trials: u64, count_a: u64, count_b: u64) -> ConfidenceVerdict {
    if count_a == 0 && count_b == 0 {
        return ConfidenceVerdict::new(Winner::Undecided, 0.0, VerdictBasis::NoSignal);
    }
    if count_a == 0 {
        return ConfidenceVerdict::new(Winner::B, 100.0, VerdictBasis::OneSided);
    }
    if count_b == 0 {
        return ConfidenceVerdict::new(Winner::A, 100.0, VerdictBasis::OneSided);
    }

    let (winner, larger, smaller) = if count_a >= count_b {
        (Winner::A, count_a, count_b)
    } else {
        (Winner::B, count_b, count_a)
    };

    match proportions_ztest_larger(larger, smaller, trials) {
        Ok(test) if test.p_value.is_nan() => {
            ConfidenceVerdict::new(winner, 50.0, VerdictBasis::Undefined)
        }
        Ok(test) => {
            ConfidenceVerdict::new(winner, (1.0 - test.p_value) * 100.0, VerdictBasis::ZTest)
        }
        Err(err) => {
            tracing::debug!(error = %err, trials, count_a, count_b, "z-test not evaluable");
            let share = larger as f64 / (count_a + count_b) as f64 * 100.0;
            ConfidenceVerdict::new(winner, share, VerdictBasis::RawProportion)
        }
    }
}

/// Verdict for one metric together with the counts it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricVerdict {
    pub metric: Metric,
    pub count_a: u64,
    pub count_b: u64,
    #[serde(flatten)]
    pub verdict: ConfidenceVerdict,
}

/// Verdicts for every metric, in [`Metric::ALL`] order.
pub fn metric_verdicts(trials: u64, a: &RunningTally, b: &RunningTally) -> Vec<MetricVerdict> {
    Metric::ALL
        .iter()
        .map(|&metric| {
            let count_a = a.count(metric);
            let count_b = b.count(metric);
            MetricVerdict {
                metric,
                count_a,
                count_b,
                verdict: calc_confidence(trials, count_a, count_b),
            }
        })
        .collect()
}
