//! Parametric and empirical value distributions for traffic models.

use rand::Rng;
use rand::distr::weighted::WeightedIndex;
use rand::distr::{Distribution, Uniform};
use rand_distr::{Exp, LogNormal, Pareto, Weibull};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Distribution as written in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionSpec {
    Constant { value: f64 },
    Uniform { low: f64, high: f64 },
    Exponential { rate: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Pareto { scale: f64, shape: f64 },
    Weibull { scale: f64, shape: f64 },
    Empirical { values: Vec<f64>, weights: Vec<f64> },
}

impl DistributionSpec {
    /// Validates parameters and builds a sampler.
    ///
    /// `field` names the model entry in error messages.
    ///
    /// # Errors
    ///
    /// - `ModelError::InvalidModelConfig` - If a parameter is non-finite, a scale or shape is not positive, bounds are inverted or an empirical table is empty
    pub fn compile(&self, field: &str) -> Result<ValueDistribution, ModelError> {
        let invalid = |reason: String| ModelError::invalid(field, reason);

        let kind = match self {
            DistributionSpec::Constant { value } => {
                finite(*value, "value").map_err(invalid)?;
                Kind::Constant(*value)
            }
            DistributionSpec::Uniform { low, high } => {
                finite(*low, "low").map_err(invalid)?;
                finite(*high, "high").map_err(invalid)?;
                if low > high {
                    return Err(invalid(format!("low {low} exceeds high {high}")));
                }
                if low == high {
                    Kind::Constant(*low)
                } else {
                    Kind::Uniform(Uniform::new_inclusive(*low, *high).map_err(|e| invalid(e.to_string()))?)
                }
            }
            DistributionSpec::Exponential { rate } => {
                positive(*rate, "rate").map_err(invalid)?;
                Kind::Exponential(Exp::new(*rate).map_err(|e| invalid(e.to_string()))?)
            }
            DistributionSpec::LogNormal { mu, sigma } => {
                finite(*mu, "mu").map_err(invalid)?;
                positive(*sigma, "sigma").map_err(invalid)?;
                Kind::LogNormal(LogNormal::new(*mu, *sigma).map_err(|e| invalid(e.to_string()))?)
            }
            DistributionSpec::Pareto { scale, shape } => {
                positive(*scale, "scale").map_err(invalid)?;
                positive(*shape, "shape").map_err(invalid)?;
                Kind::Pareto(Pareto::new(*scale, *shape).map_err(|e| invalid(e.to_string()))?)
            }
            DistributionSpec::Weibull { scale, shape } => {
                positive(*scale, "scale").map_err(invalid)?;
                positive(*shape, "shape").map_err(invalid)?;
                Kind::Weibull(Weibull::new(*scale, *shape).map_err(|e| invalid(e.to_string()))?)
            }
            DistributionSpec::Empirical { values, weights } => {
                if values.is_empty() {
                    return Err(invalid("empirical distribution has no values".to_string()));
                }
                if values.len() != weights.len() {
                    return Err(invalid(format!(
                        "{} values but {} weights",
                        values.len(),
                        weights.len()
                    )));
                }
                for value in values {
                    finite(*value, "values").map_err(invalid)?;
                }
                let index = weight_index(weights).map_err(invalid)?;
                Kind::Empirical {
                    values: values.clone(),
                    index,
                }
            }
        };

        Ok(ValueDistribution { kind })
    }

    /// Like [`compile`](Self::compile) for quantities that cannot go below zero.
    ///
    /// # Errors
    ///
    /// - `ModelError::InvalidModelConfig` - If the distribution is malformed or can yield a negative value
    pub fn compile_non_negative(&self, field: &str) -> Result<ValueDistribution, ModelError> {
        let distribution = self.compile(field)?;
        if let Some(lowest) = self.lowest_value().filter(|lowest| *lowest < 0.0) {
            return Err(ModelError::invalid(
                field,
                format!("must not be negative, can yield {lowest}"),
            ));
        }
        Ok(distribution)
    }

    /// Smallest value the distribution can produce; `None` for the parametric
    /// families, whose support is non-negative.
    fn lowest_value(&self) -> Option<f64> {
        match self {
            DistributionSpec::Constant { value } => Some(*value),
            DistributionSpec::Uniform { low, .. } => Some(*low),
            DistributionSpec::Empirical { values, .. } => values.iter().copied().reduce(f64::min),
            DistributionSpec::Exponential { .. }
            | DistributionSpec::LogNormal { .. }
            | DistributionSpec::Pareto { .. }
            | DistributionSpec::Weibull { .. } => None,
        }
    }
}

/// Builds a weighted index, rejecting negative, non-finite or all-zero weights.
pub(crate) fn weight_index(weights: &[f64]) -> Result<WeightedIndex<f64>, String> {
    if weights.is_empty() {
        return Err("weight table is empty".to_string());
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(format!("weight {bad} is negative or not finite"));
    }
    WeightedIndex::new(weights).map_err(|e| format!("unusable weights: {e}"))
}

fn finite(value: f64, name: &str) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("{name} must be finite, got {value}"))
    }
}

fn positive(value: f64, name: &str) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{name} must be positive, got {value}"))
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Constant(f64),
    Uniform(Uniform<f64>),
    Exponential(Exp<f64>),
    LogNormal(LogNormal<f64>),
    Pareto(Pareto<f64>),
    Weibull(Weibull<f64>),
    Empirical {
        values: Vec<f64>,
        index: WeightedIndex<f64>,
    },
}

/// Validated distribution ready for sampling.
#[derive(Debug, Clone)]
pub struct ValueDistribution {
    kind: Kind,
}

impl ValueDistribution {
    /// Distribution always yielding `value`.
    pub fn constant(value: f64) -> Self {
        Self {
            kind: Kind::Constant(value),
        }
    }
}

impl Distribution<f64> for ValueDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match &self.kind {
            Kind::Constant(value) => *value,
            Kind::Uniform(uniform) => uniform.sample(rng),
            Kind::Exponential(exp) => exp.sample(rng),
            Kind::LogNormal(log_normal) => log_normal.sample(rng),
            Kind::Pareto(pareto) => pareto.sample(rng),
            Kind::Weibull(weibull) => weibull.sample(rng),
            Kind::Empirical { values, index } => values[index.sample(rng)],
        }
    }
}
