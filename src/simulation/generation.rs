//! One demographic transition: seeding, pollination, seed production,
//! dispersal, germination, recruitment and survival.
//!
//! Every stage reads the outputs of the previous ones and produces a new
//! (habitable x G) matrix; nothing is mutated until [`GenerationEngine::step`]
//! writes the final abundance back into the population.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::demography::Demography;
use super::error::{ConfigurationError, GenerationError, Stage, StageError};
use super::geometry::SpatialDomain;
use super::mating::MatingTensor;
use super::migration::Backend;
use super::population::Population;
use super::sampling::{SamplingMode, binomial_draw, poisson_draw};
use super::vital_rate::{RateContext, RateKind};

/// Intermediate results of one generation, all (habitable x G).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    /// Individuals that produce seeds.
    pub seeders: Array2<f64>,
    /// Pollen arriving in each cell.
    pub pollen: Array2<f64>,
    /// Per-cell genotype frequencies of the arriving pollen.
    pub pollen_frequencies: Array2<f64>,
    /// Seeds produced in each cell, by offspring genotype.
    pub seeds: Array2<f64>,
    /// Seeds after dispersal.
    pub dispersed_seeds: Array2<f64>,
    /// Germination probability.
    pub germination: Array2<f64>,
    /// New recruits.
    pub recruits: Array2<f64>,
    /// Established individuals that survived.
    pub survivors: Array2<f64>,
    /// Abundance at the start of the next generation.
    pub next: Array2<f64>,
}

/// Runs generations with a fixed backend and sampling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationEngine {
    /// Evaluation backend for migration operators.
    pub backend: Backend,
    /// Random draws or expectations.
    pub sampling: SamplingMode,
}

impl GenerationEngine {
    /// Engine with the given backend and sampling mode.
    pub fn new(backend: Backend, sampling: SamplingMode) -> Self {
        Self { backend, sampling }
    }

    /// Checks everything that can be validated before a stage runs.
    ///
    /// Operators realised for another accessible layout are reported as a
    /// geometry mismatch under either backend.
    pub fn preflight(
        &self,
        population: &Population,
        demography: &Demography,
        carrying_capacity: ArrayView1<'_, f64>,
    ) -> Result<(), StageError> {
        demography.check_population(population)?;
        let g = population.n_genotypes();
        if demography.mating().genotypes() != g {
            let side = demography.mating().genotypes();
            return Err(ConfigurationError::MatingTensorShape {
                shape: vec![side, side, side],
                genotypes: g,
            }
            .into());
        }

        let habitable = population.domain().n_habitable();
        if carrying_capacity.len() != habitable {
            return Err(ConfigurationError::CarryingCapacityShape {
                expected: habitable,
                found: carrying_capacity.len(),
            }
            .into());
        }
        if let Some((cell, &value)) = carrying_capacity
            .indexed_iter()
            .find(|&(_, &k)| k.is_nan() || k < 0.0)
        {
            return Err(ConfigurationError::CarryingCapacityValue { cell, value }.into());
        }

        demography.check_layout(population.domain())?;
        if self.backend == Backend::Matrix {
            if let Some(name) = demography.unbound_operator(population.domain()) {
                return Err(ConfigurationError::UnboundOperator(name.to_string()).into());
            }
        }
        Ok(())
    }

    /// Computes the abundance of the next generation.
    pub fn generation<R: Rng + ?Sized>(
        &self,
        population: &Population,
        demography: &Demography,
        carrying_capacity: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> Result<Array2<f64>, GenerationError> {
        self.generation_with_stages(population, demography, carrying_capacity, rng)
            .map(|stages| stages.next)
    }

    /// Advances `population` by one generation in place.
    pub fn step<R: Rng + ?Sized>(
        &self,
        population: &mut Population,
        demography: &Demography,
        carrying_capacity: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> Result<(), GenerationError> {
        let next = self.generation(population, demography, carrying_capacity, rng)?;
        population
            .set_abundance(next)
            .map_err(GenerationError::at(Stage::Commit))
    }

    /// Like [`generation`](Self::generation) but keeps every stage output.
    pub fn generation_with_stages<R: Rng + ?Sized>(
        &self,
        population: &Population,
        demography: &Demography,
        carrying_capacity: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> Result<StageOutputs, GenerationError> {
        self.preflight(population, demography, carrying_capacity)
            .map_err(GenerationError::at(Stage::Preflight))?;

        let domain: &SpatialDomain = population.domain();
        let n = population.abundance().view();
        let rates = demography.rates();
        let ctx = RateContext {
            domain,
            abundance: n.view(),
            carrying_capacity: carrying_capacity.view(),
            seeds: None,
            backend: self.backend,
        };

        let prob_seed = rates
            .prob_seed
            .evaluate("prob_seed", &ctx, RateKind::Probability)
            .map_err(GenerationError::at(Stage::Seeders))?;
        let seeders = binomial_draw(n, prob_seed.view(), self.sampling, rng)
            .map_err(GenerationError::at(Stage::Seeders))?;

        let pollen = demography
            .pollen_migration()
            .apply_habitable(domain, seeders.view(), self.backend)
            .map_err(GenerationError::at(Stage::PollenFlux))?;
        let pollen_frequencies = row_frequencies(pollen.view());

        let fecundity = rates
            .fecundity
            .evaluate("fecundity", &ctx, RateKind::NonNegative)
            .map_err(GenerationError::at(Stage::SeedProduction))?;
        let seeds = produce_seeds(
            (&seeders * &fecundity).view(),
            pollen_frequencies.view(),
            demography.mating(),
        );

        let dispersed_seeds = demography
            .seed_migration()
            .apply_habitable(domain, seeds.view(), self.backend)
            .map_err(GenerationError::at(Stage::SeedDispersal))?;

        let germination = {
            let germination_ctx = RateContext {
                domain,
                abundance: n.view(),
                carrying_capacity: carrying_capacity.view(),
                seeds: Some(dispersed_seeds.view()),
                backend: self.backend,
            };
            rates
                .prob_germination
                .evaluate("prob_germination", &germination_ctx, RateKind::Probability)
        }
        .map_err(GenerationError::at(Stage::Germination))?;

        let expected_recruits = &dispersed_seeds * &germination;
        let recruits = poisson_draw(expected_recruits.view(), self.sampling, rng)
            .map_err(GenerationError::at(Stage::Recruitment))?;

        let prob_survival = rates
            .prob_survival
            .evaluate("prob_survival", &ctx, RateKind::Probability)
            .map_err(GenerationError::at(Stage::Survival))?;
        let survivors = binomial_draw(n, prob_survival.view(), self.sampling, rng)
            .map_err(GenerationError::at(Stage::Survival))?;

        let next = &survivors + &recruits;
        debug!(
            demography = demography.name(),
            seeders = seeders.sum(),
            seeds = seeds.sum(),
            recruits = recruits.sum(),
            survivors = survivors.sum(),
            "generation complete"
        );

        Ok(StageOutputs {
            seeders,
            pollen,
            pollen_frequencies,
            seeds,
            dispersed_seeds,
            germination,
            recruits,
            survivors,
            next,
        })
    }
}

/// Divides each row by its sum; rows summing to zero stay zero.
fn row_frequencies(values: ArrayView2<'_, f64>) -> Array2<f64> {
    let totals = values.sum_axis(Axis(1));
    let mut out = values.to_owned();
    Zip::from(out.rows_mut())
        .and(&totals)
        .for_each(|mut row, &total| {
            if total > 0.0 {
                row /= total;
            } else {
                row.fill(0.0);
            }
        });
    out
}

/// `S[c, k] = sum_i sum_j mothers[c, i] * pollen[c, j] * T[i, j, k]`.
///
/// `mothers` already includes fecundity.
fn produce_seeds(
    mothers: ArrayView2<'_, f64>,
    pollen: ArrayView2<'_, f64>,
    mating: &MatingTensor,
) -> Array2<f64> {
    let g = mating.genotypes();
    let mut seeds = Array2::zeros(mothers.raw_dim());
    Zip::from(seeds.rows_mut())
        .and(mothers.rows())
        .and(pollen.rows())
        .par_for_each(|mut out, m, p| {
            for i in 0..g {
                if m[i] == 0.0 {
                    continue;
                }
                for j in 0..g {
                    let w = m[i] * p[j];
                    if w > 0.0 {
                        out.scaled_add(w, &mating.offspring(i, j));
                    }
                }
            }
        });
    seeds
}
