//! Vital rates: constants or parameterised functions of the current state.
//!
//! A function rate is a record of named parameters plus a pure evaluation
//! function. Parameters live in the record, not in the closure, so they can
//! be read and updated after construction, and embedded migration operators
//! can be re-bound to a new domain without rebuilding the function.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::warn;

use super::error::{ConfigurationError, GeometryMismatchError, StageError};
use super::geometry::SpatialDomain;
use super::migration::{Backend, MigrationOperator};

/// Everything a rate function may look at.
#[derive(Debug, Clone, Copy)]
pub struct RateContext<'a> {
    /// Spatial domain of the population.
    pub domain: &'a SpatialDomain,
    /// Current abundance (habitable x G).
    pub abundance: ArrayView2<'a, f64>,
    /// Carrying capacity per habitable cell.
    pub carrying_capacity: ArrayView1<'a, f64>,
    /// Dispersed seeds (habitable x G), available to germination rates.
    pub seeds: Option<ArrayView2<'a, f64>>,
    /// Backend used to apply embedded operators.
    pub backend: Backend,
}

/// Admissible range of a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateKind {
    /// Must lie in [0, 1].
    Probability,
    /// Must be finite and non-negative.
    NonNegative,
}

impl RateKind {
    fn admits(self, value: f64) -> bool {
        match self {
            RateKind::Probability => (0.0..=1.0).contains(&value),
            RateKind::NonNegative => value.is_finite() && value >= 0.0,
        }
    }
}

/// Named parameters carried alongside a rate function.
#[derive(Debug, Clone, Default)]
pub struct RateParameters {
    /// Scalar parameters.
    pub values: BTreeMap<String, f64>,
    /// Per-genotype coefficient vectors.
    pub coefficients: BTreeMap<String, Vec<f64>>,
    /// Embedded smoothing operators.
    pub operators: BTreeMap<String, MigrationOperator>,
}

impl RateParameters {
    /// Scalar parameter, or a `MissingParameter` error naming `rate`.
    pub fn value(&self, rate: &str, name: &str) -> Result<f64, ConfigurationError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| missing(rate, name))
    }

    /// Embedded operator, or a `MissingParameter` error naming `rate`.
    pub fn operator(&self, rate: &str, name: &str) -> Result<&MigrationOperator, ConfigurationError> {
        self.operators.get(name).ok_or_else(|| missing(rate, name))
    }

    /// Coefficient vector checked against the genotype count, if present.
    pub fn coefficients(
        &self,
        rate: &str,
        name: &str,
        genotypes: usize,
    ) -> Result<Option<&[f64]>, ConfigurationError> {
        match self.coefficients.get(name) {
            None => Ok(None),
            Some(c) if c.len() == genotypes => Ok(Some(c)),
            Some(c) => Err(ConfigurationError::RateShape {
                rate: format!("{rate}.{name}"),
                expected: (1, genotypes),
                found: (1, c.len()),
            }),
        }
    }
}

fn missing(rate: &str, name: &str) -> ConfigurationError {
    ConfigurationError::MissingParameter {
        rate: rate.to_string(),
        parameter: name.to_string(),
    }
}

/// Evaluation function of a rate record.
///
/// Returns either a (habitable x G) matrix or a single column that is
/// broadcast over genotypes.
pub type RateFn =
    Arc<dyn Fn(&RateParameters, &RateContext<'_>) -> Result<Array2<f64>, StageError> + Send + Sync>;

/// A parameter record plus its evaluation function.
#[derive(Clone)]
pub struct RateRecord {
    name: String,
    parameters: RateParameters,
    evaluate: RateFn,
}

impl fmt::Debug for RateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateRecord")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// A per-cell, per-genotype rate.
#[derive(Debug, Clone)]
pub enum VitalRate {
    /// Same value everywhere.
    Scalar(f64),
    /// One value per habitable cell.
    PerCell(Array1<f64>),
    /// One value per genotype.
    PerGenotype(Vec<f64>),
    /// Parameterised function of the current state.
    Function(RateRecord),
}

impl From<f64> for VitalRate {
    fn from(value: f64) -> Self {
        VitalRate::Scalar(value)
    }
}

impl VitalRate {
    /// Constant rate.
    pub fn constant(value: f64) -> Self {
        VitalRate::Scalar(value)
    }

    /// Rate defined by a function over named parameters.
    pub fn function(
        name: impl Into<String>,
        parameters: RateParameters,
        evaluate: impl Fn(&RateParameters, &RateContext<'_>) -> Result<Array2<f64>, StageError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        VitalRate::Function(RateRecord {
            name: name.into(),
            parameters,
            evaluate: Arc::new(evaluate),
        })
    }

    /// Beverton-Holt germination probability.
    ///
    /// `rate[c, g] = r0 * s_g / (1 + pressure[c] / K[c])`, where `pressure`
    /// is the total abundance smoothed by `competition` and `s_g` are the
    /// optional selection coefficients. Cells with zero carrying capacity
    /// get a zero rate.
    pub fn beverton_holt(r0: f64, competition: MigrationOperator, selection: Option<Vec<f64>>) -> Self {
        let mut parameters = RateParameters::default();
        parameters.values.insert("r0".to_string(), r0);
        parameters
            .operators
            .insert("competition".to_string(), competition);
        if let Some(selection) = selection {
            parameters
                .coefficients
                .insert("selection".to_string(), selection);
        }
        Self::function("beverton_holt", parameters, |params, ctx| {
            let base = beverton_holt_base("beverton_holt", params, ctx)?;
            let genotypes = ctx.abundance.ncols();
            let Some(selection) = params.coefficients("beverton_holt", "selection", genotypes)?
            else {
                return Ok(base.insert_axis(Axis(1)));
            };
            let selection = ArrayView1::from(selection);
            Ok(Array2::from_shape_fn((base.len(), genotypes), |(c, g)| {
                base[c] * selection[g]
            }))
        })
    }

    /// Beverton-Holt germination under soft selection.
    ///
    /// Genotype fitnesses `w_g` are divided by the seed-weighted mean fitness
    /// of each cell, so selection changes genotype composition without
    /// changing the expected number of recruits. Outputs above one are
    /// rejected as out of range rather than clamped.
    pub fn soft_selection(r0: f64, competition: MigrationOperator, fitness: Vec<f64>) -> Self {
        let mut parameters = RateParameters::default();
        parameters.values.insert("r0".to_string(), r0);
        parameters
            .operators
            .insert("competition".to_string(), competition);
        parameters.coefficients.insert("fitness".to_string(), fitness);
        Self::function("soft_selection", parameters, |params, ctx| {
            let base = beverton_holt_base("soft_selection", params, ctx)?;
            let genotypes = ctx.abundance.ncols();
            let fitness = params
                .coefficients("soft_selection", "fitness", genotypes)?
                .ok_or_else(|| missing("soft_selection", "fitness"))?;
            let fitness = ArrayView1::from(fitness);
            let mut rate = Array2::zeros((base.len(), genotypes));
            for (c, mut row) in rate.rows_mut().into_iter().enumerate() {
                let seeds = ctx.seeds.map(|s| s.row(c).to_owned());
                let total = seeds.as_ref().map_or(0.0, |s| s.sum());
                let mean = match &seeds {
                    Some(seeds) if total > 0.0 => seeds.dot(&fitness) / total,
                    _ => 1.0,
                };
                for g in 0..genotypes {
                    row[g] = if mean > 0.0 {
                        base[c] * fitness[g] / mean
                    } else {
                        0.0
                    };
                }
            }
            Ok(rate)
        })
    }

    /// Name of a function rate, `None` for constants.
    pub fn name(&self) -> Option<&str> {
        match self {
            VitalRate::Function(record) => Some(&record.name),
            _ => None,
        }
    }

    /// Parameter record of a function rate.
    pub fn parameters(&self) -> Option<&RateParameters> {
        match self {
            VitalRate::Function(record) => Some(&record.parameters),
            _ => None,
        }
    }

    /// Mutable parameter record of a function rate.
    pub fn parameters_mut(&mut self) -> Option<&mut RateParameters> {
        match self {
            VitalRate::Function(record) => Some(&mut record.parameters),
            _ => None,
        }
    }

    /// Current value of a scalar parameter.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters()
            .and_then(|p| p.values.get(name).copied())
    }

    /// Updates a scalar parameter, returning the previous value.
    ///
    /// Constant rates have no parameters; the call returns `None` and
    /// changes nothing.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Option<f64> {
        self.parameters_mut()
            .and_then(|p| p.values.insert(name.to_string(), value))
    }

    /// Re-derives every embedded operator for `domain` and stores the bound
    /// operators back into the record.
    pub fn bind(&mut self, domain: &SpatialDomain) -> Result<(), ConfigurationError> {
        if let Some(parameters) = self.parameters_mut() {
            for operator in parameters.operators.values_mut() {
                *operator = operator.bind(domain)?;
            }
        }
        Ok(())
    }

    /// Fails on the first embedded operator realised for another layout.
    pub fn check_layout(&self, domain: &SpatialDomain) -> Result<(), GeometryMismatchError> {
        if let Some(parameters) = self.parameters() {
            for operator in parameters.operators.values() {
                operator.check_layout(domain)?;
            }
        }
        Ok(())
    }

    /// Whether every embedded operator can be used by the matrix backend.
    pub fn is_ready_for(&self, domain: &SpatialDomain) -> bool {
        self.parameters().is_none_or(|p| {
            p.operators
                .values()
                .all(|operator| operator.is_ready_for(domain))
        })
    }

    /// Evaluates the rate into a (habitable x G) matrix and checks its range.
    ///
    /// `label` names the rate in error messages.
    pub fn evaluate(
        &self,
        label: &str,
        ctx: &RateContext<'_>,
        kind: RateKind,
    ) -> Result<Array2<f64>, StageError> {
        let shape = ctx.abundance.dim();
        let (cells, genotypes) = shape;
        let rate = match self {
            VitalRate::Scalar(value) => Array2::from_elem(shape, *value),
            VitalRate::PerCell(values) => {
                if values.len() != cells {
                    return Err(shape_error(label, shape, (values.len(), 1)));
                }
                Array2::from_shape_fn(shape, |(c, _)| values[c])
            }
            VitalRate::PerGenotype(values) => {
                if values.len() != genotypes {
                    return Err(shape_error(label, shape, (1, values.len())));
                }
                Array2::from_shape_fn(shape, |(_, g)| values[g])
            }
            VitalRate::Function(record) => {
                let out = (record.evaluate)(&record.parameters, ctx)?;
                match out.dim() {
                    d if d == shape => out,
                    (c, 1) if c == cells => Array2::from_shape_fn(shape, |(c, _)| out[[c, 0]]),
                    other => return Err(shape_error(label, shape, other)),
                }
            }
        };
        if let Some(((cell, genotype), &value)) =
            rate.indexed_iter().find(|&(_, &v)| !kind.admits(v))
        {
            return Err(ConfigurationError::RateOutOfRange {
                rate: label.to_string(),
                cell,
                genotype,
                value,
            }
            .into());
        }
        Ok(rate)
    }
}

fn shape_error(label: &str, expected: (usize, usize), found: (usize, usize)) -> StageError {
    ConfigurationError::RateShape {
        rate: label.to_string(),
        expected,
        found,
    }
    .into()
}

/// `r0 / (1 + pressure / K)` per habitable cell, zero where `K` is zero.
fn beverton_holt_base(
    rate: &str,
    params: &RateParameters,
    ctx: &RateContext<'_>,
) -> Result<Array1<f64>, StageError> {
    let r0 = params.value(rate, "r0")?;
    let competition = params.operator(rate, "competition")?;
    let total = ctx.abundance.sum_axis(Axis(1)).insert_axis(Axis(1));
    let pressure = competition
        .apply_habitable(ctx.domain, total.view(), ctx.backend)?
        .remove_axis(Axis(1));

    let mut zero_capacity = 0_usize;
    let base = Array1::from_shape_fn(pressure.len(), |c| {
        let capacity = ctx.carrying_capacity[c];
        if capacity > 0.0 {
            r0 / (1.0 + pressure[c] / capacity)
        } else {
            zero_capacity += 1;
            0.0
        }
    });
    if zero_capacity > 0 {
        warn!(
            rate,
            cells = zero_capacity,
            "zero carrying capacity; germination rate set to zero"
        );
    }
    Ok(base)
}
