use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::demography::{Demography, VitalRates};
use super::error::{ConfigurationError, SimulationError};
use super::generation::GenerationEngine;
use super::geometry::{RasterGeometry, SpatialDomain};
use super::kernel::{Kernel, KernelPreset};
use super::mating::MatingTensor;
use super::migration::{Backend, MigrationOperator};
use super::population::Population;
use super::sampling::SamplingMode;
use super::simulator::{Simulator, Summary, TimeGrid};
use super::vital_rate::VitalRate;

/// Raster and habitat description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandscapeConfig {
    /// Raster rows.
    pub rows: usize,
    /// Raster columns.
    pub cols: usize,
    /// Cell side length.
    pub resolution: f64,
    /// Coordinates of the upper-left raster corner.
    #[serde(default)]
    pub origin: (f64, f64),
    /// Habitat quality per raster cell, row-major. `null` marks inaccessible
    /// cells, values above zero habitable ones. Missing means all habitable.
    #[serde(default)]
    pub habitat: Option<Vec<Option<f64>>>,
    /// Carrying capacity of the habitable cells.
    pub carrying_capacity: CapacityConfig,
}

/// How the carrying capacity is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapacityConfig {
    /// Same capacity in every habitable cell.
    Uniform {
        /// Capacity per cell.
        value: f64,
    },
    /// Habitat value times `scale`.
    HabitatScaled {
        /// Multiplier applied to the habitat raster.
        scale: f64,
    },
    /// Explicit value for every raster cell, row-major.
    PerCell {
        /// One value per raster cell.
        values: Vec<f64>,
    },
}

/// Genotype list and inheritance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenotypeConfig {
    /// Single-locus diploid genotypes from a list of alleles.
    Mendelian {
        /// Allele names.
        alleles: Vec<String>,
    },
    /// Offspring copy the maternal genotype.
    Clonal {
        /// Genotype names.
        genotypes: Vec<String>,
    },
    /// Explicit genotype names and mating tensor.
    Explicit {
        /// Genotype names.
        genotypes: Vec<String>,
        /// G x G x G offspring probabilities.
        mating: MatingTensor,
    },
}

impl GenotypeConfig {
    fn build(&self) -> Result<(Vec<String>, MatingTensor), ConfigurationError> {
        match self {
            GenotypeConfig::Mendelian { alleles } => {
                let alleles: Vec<&str> = alleles.iter().map(String::as_str).collect();
                MatingTensor::mendelian(&alleles)
            }
            GenotypeConfig::Clonal { genotypes } => {
                Ok((genotypes.clone(), MatingTensor::clonal(genotypes.len())?))
            }
            GenotypeConfig::Explicit { genotypes, mating } => {
                Ok((genotypes.clone(), mating.clone()))
            }
        }
    }
}

/// Dispersal kernel description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Weight function.
    pub shape: KernelPreset,
    /// Distance scale sigma.
    pub scale: f64,
    /// Cutoff radius.
    pub radius: f64,
    /// Row sum target, if rows are normalised.
    #[serde(default)]
    pub normalize: Option<f64>,
    /// n-step mixture weights.
    #[serde(default)]
    pub steps: Vec<f64>,
}

impl KernelConfig {
    /// Normalised kernel with the given shape and scale.
    pub fn normalized(shape: KernelPreset, scale: f64, radius: f64) -> Self {
        Self {
            shape,
            scale,
            radius,
            normalize: Some(1.0),
            steps: Vec::new(),
        }
    }

    fn build(&self) -> Result<MigrationOperator, ConfigurationError> {
        let mut kernel = Kernel::new(self.shape, self.scale, self.radius)?;
        if let Some(target) = self.normalize {
            kernel = kernel.normalized(target)?;
        }
        MigrationOperator::new(kernel).with_steps(self.steps.clone())
    }
}

fn build_operator(config: Option<&KernelConfig>) -> Result<MigrationOperator, ConfigurationError> {
    config.map_or(Ok(MigrationOperator::Identity), KernelConfig::build)
}

/// Vital rate description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateConfig {
    /// Same value everywhere.
    Constant {
        /// The rate.
        value: f64,
    },
    /// One value per genotype.
    PerGenotype {
        /// Rates in genotype order.
        values: Vec<f64>,
    },
    /// Beverton-Holt density dependence.
    BevertonHolt {
        /// Rate at zero density.
        r0: f64,
        /// Neighbourhood over which competitors are counted; `null` counts
        /// only the focal cell.
        #[serde(default)]
        competition: Option<KernelConfig>,
        /// Per-genotype multipliers.
        #[serde(default)]
        selection: Option<Vec<f64>>,
    },
    /// Beverton-Holt with soft selection among seeds.
    SoftSelection {
        /// Rate at zero density.
        r0: f64,
        /// Neighbourhood over which competitors are counted.
        #[serde(default)]
        competition: Option<KernelConfig>,
        /// Relative genotype fitness.
        fitness: Vec<f64>,
    },
}

impl RateConfig {
    fn build(&self) -> Result<VitalRate, ConfigurationError> {
        Ok(match self {
            RateConfig::Constant { value } => VitalRate::constant(*value),
            RateConfig::PerGenotype { values } => VitalRate::PerGenotype(values.clone()),
            RateConfig::BevertonHolt {
                r0,
                competition,
                selection,
            } => VitalRate::beverton_holt(
                *r0,
                build_operator(competition.as_ref())?,
                selection.clone(),
            ),
            RateConfig::SoftSelection {
                r0,
                competition,
                fitness,
            } => VitalRate::soft_selection(
                *r0,
                build_operator(competition.as_ref())?,
                fitness.clone(),
            ),
        })
    }
}

/// Full description of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Name given to the demography.
    pub name: String,
    /// Raster, habitat and carrying capacity.
    pub landscape: LandscapeConfig,
    /// Genotypes and mating system.
    pub genotypes: GenotypeConfig,
    /// Initial individuals of each genotype in every habitable cell.
    pub initial_abundance: Vec<f64>,
    /// Probability of producing seeds.
    pub prob_seed: RateConfig,
    /// Seeds per seeding individual.
    pub fecundity: RateConfig,
    /// Germination probability.
    pub prob_germination: RateConfig,
    /// Survival probability.
    pub prob_survival: RateConfig,
    /// Pollen dispersal kernel; `null` keeps pollen in its cell.
    pub pollen_kernel: Option<KernelConfig>,
    /// Seed dispersal kernel; `null` keeps seeds in their cell.
    pub seed_kernel: Option<KernelConfig>,
    /// Requested time points.
    pub time_grid: TimeGrid,
    /// Built-in summaries to record.
    #[serde(default)]
    pub summaries: Vec<String>,
    /// Seed of the random generator.
    pub seed: u64,
    /// Operator evaluation backend.
    #[serde(default)]
    pub backend: Backend,
    /// Random draws or expectations.
    #[serde(default)]
    pub sampling: SamplingMode,
    /// Progress log interval in generations; 0 disables progress logging.
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

fn default_log_every() -> usize {
    10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let competition = KernelConfig::normalized(KernelPreset::Gaussian, 1.0, 1.5);
        Self {
            name: "two-allele cline".to_string(),
            landscape: LandscapeConfig {
                rows: 10,
                cols: 10,
                resolution: 1.0,
                origin: (0.0, 0.0),
                habitat: None,
                carrying_capacity: CapacityConfig::Uniform { value: 50.0 },
            },
            genotypes: GenotypeConfig::Mendelian {
                alleles: vec!["a".to_string(), "A".to_string()],
            },
            initial_abundance: vec![10.0, 20.0, 10.0],
            prob_seed: RateConfig::Constant { value: 0.5 },
            fecundity: RateConfig::Constant { value: 5.0 },
            prob_germination: RateConfig::BevertonHolt {
                r0: 0.8,
                competition: Some(competition),
                selection: Some(vec![1.0, 0.95, 0.9]),
            },
            prob_survival: RateConfig::Constant { value: 0.5 },
            pollen_kernel: Some(KernelConfig::normalized(KernelPreset::Gaussian, 1.5, 3.0)),
            seed_kernel: Some(KernelConfig::normalized(KernelPreset::Exponential, 1.0, 2.0)),
            time_grid: TimeGrid::generations(50),
            summaries: vec![
                "genotype_totals".to_string(),
                "total_abundance".to_string(),
                "occupied_cells".to_string(),
            ],
            seed: 42,
            backend: Backend::Matrix,
            sampling: SamplingMode::Stochastic,
            log_every: default_log_every(),
        }
    }
}

/// Everything needed to call [`Simulator::simulate`].
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Initial population.
    pub population: Population,
    /// Demography bound to the population.
    pub demography: Demography,
    /// Carrying capacity per habitable cell.
    pub carrying_capacity: Array1<f64>,
    /// Configured simulator.
    pub simulator: Simulator,
    /// Requested time points.
    pub time_grid: TimeGrid,
    /// Summaries to record.
    pub summaries: Vec<Summary>,
    /// Seed of the random generator.
    pub seed: u64,
}

impl SimulationConfig {
    /// Reads a configuration from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimulationError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Builds the population, binds the demography and resolves summaries.
    pub fn build(&self) -> Result<Scenario, ConfigurationError> {
        let land = &self.landscape;
        let mut geometry = RasterGeometry::new(land.rows, land.cols, land.resolution)?;
        geometry.origin = land.origin;
        let cells = geometry.cell_count();

        let habitat = match &land.habitat {
            None => Array2::ones((land.rows, land.cols)),
            Some(values) if values.len() == cells => {
                Array2::from_shape_fn((land.rows, land.cols), |(r, c)| {
                    values[r * land.cols + c].unwrap_or(f64::NAN)
                })
            }
            Some(values) => {
                return Err(ConfigurationError::InvalidDomain(format!(
                    "habitat has {} values for a {}x{} raster",
                    values.len(),
                    land.rows,
                    land.cols
                )));
            }
        };
        let domain = Arc::new(SpatialDomain::from_habitat(geometry, habitat.view())?);

        let raster_capacity: Array1<f64> = match &land.carrying_capacity {
            CapacityConfig::Uniform { value } => Array1::from_elem(cells, *value),
            CapacityConfig::HabitatScaled { scale } => habitat.iter().map(|h| h * scale).collect(),
            CapacityConfig::PerCell { values } if values.len() == cells => Array1::from(values.clone()),
            CapacityConfig::PerCell { values } => {
                return Err(ConfigurationError::CarryingCapacityShape {
                    expected: cells,
                    found: values.len(),
                });
            }
        };
        let carrying_capacity = domain
            .raster_to_habitable(raster_capacity.insert_axis(ndarray::Axis(1)).view())
            .column(0)
            .to_owned();

        let (genotypes, mating) = self.genotypes.build()?;
        let population =
            Population::uniform(Arc::clone(&domain), genotypes.clone(), &self.initial_abundance)?;

        let rates = VitalRates {
            prob_seed: self.prob_seed.build()?,
            fecundity: self.fecundity.build()?,
            prob_germination: self.prob_germination.build()?,
            prob_survival: self.prob_survival.build()?,
        };
        let demography = Demography::new(
            self.name.clone(),
            genotypes,
            mating,
            rates,
            build_operator(self.pollen_kernel.as_ref())?,
            build_operator(self.seed_kernel.as_ref())?,
        )?
        .bind(&population)?;

        let summaries = self
            .summaries
            .iter()
            .map(|name| {
                Summary::builtin(name).ok_or_else(|| ConfigurationError::UnknownSummary(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Scenario {
            population,
            demography,
            carrying_capacity,
            simulator: Simulator {
                engine: GenerationEngine::new(self.backend, self.sampling),
                log_every: self.log_every,
            },
            time_grid: self.time_grid.clone(),
            summaries,
            seed: self.seed,
        })
    }
}
