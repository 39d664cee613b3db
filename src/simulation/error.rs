//! Error types shared by the simulation modules.
//!
//! Configuration problems are detected before a generation starts running.
//! Failures that happen while stepping are wrapped into [`SimulationError`]
//! together with the stage and the generation index that triggered them.
//! Numeric degeneracies (zero operator rows, zero carrying capacity) are not
//! errors; they are reported through `tracing` warnings.

use std::fmt;

use thiserror::Error;

/// Invalid model setup, raised before any demographic stage executes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Genotype lists of two components disagree.
    #[error("genotype mismatch: {context} expects {expected:?}, found {found:?}")]
    GenotypeMismatch {
        /// Which pair of components was compared.
        context: &'static str,
        /// Genotypes on the reference side.
        expected: Vec<String>,
        /// Genotypes on the other side.
        found: Vec<String>,
    },
    /// A genotype list is empty or holds duplicate names.
    #[error("invalid genotype list: {0}")]
    InvalidGenotypes(String),
    /// Mating tensor is not a G x G x G cube matching the genotype count.
    #[error("mating tensor has shape {shape:?}, expected a cube of side {genotypes}")]
    MatingTensorShape {
        /// Shape that was supplied.
        shape: Vec<usize>,
        /// Number of genotypes it has to match.
        genotypes: usize,
    },
    /// Offspring distribution for a parent pair does not sum to one.
    #[error("mating tensor entry ({mother}, {father}) sums to {sum}, expected 1")]
    MatingTensorSum {
        /// Maternal genotype index.
        mother: usize,
        /// Paternal genotype index.
        father: usize,
        /// Observed sum over offspring genotypes.
        sum: f64,
    },
    /// Mating tensor holds a value outside [0, 1].
    #[error("mating tensor entry ({0}, {1}, {2}) is not a probability")]
    MatingTensorValue(usize, usize, usize),
    /// Kernel radius, scale or normalisation target is unusable.
    #[error("invalid kernel parameter {name}: {value}")]
    InvalidKernel {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
    /// n-step mixture weights contain a non-finite value.
    #[error("invalid n-step weights {0:?}")]
    InvalidSteps(Vec<f64>),
    /// Carrying capacity field does not cover the habitable cells.
    #[error("carrying capacity has {found} values, expected {expected} (one per habitable cell)")]
    CarryingCapacityShape {
        /// Habitable cell count.
        expected: usize,
        /// Supplied length.
        found: usize,
    },
    /// Carrying capacity holds a negative or NaN value.
    #[error("carrying capacity at habitable cell {cell} is {value}")]
    CarryingCapacityValue {
        /// Habitable cell index.
        cell: usize,
        /// Offending value.
        value: f64,
    },
    /// Abundance matrix does not match (habitable x genotypes).
    #[error("abundance has shape {found:?}, expected {expected:?}")]
    AbundanceShape {
        /// Required shape.
        expected: (usize, usize),
        /// Supplied shape.
        found: (usize, usize),
    },
    /// Abundance matrix holds a negative or non-finite value.
    #[error("abundance at ({cell}, {genotype}) is {value}")]
    AbundanceValue {
        /// Habitable cell index.
        cell: usize,
        /// Genotype column.
        genotype: usize,
        /// Offending value.
        value: f64,
    },
    /// Spatial domain index sets are inconsistent.
    #[error("invalid spatial domain: {0}")]
    InvalidDomain(String),
    /// Matrix backend requested with an operator that was never bound.
    #[error("operator `{0}` is not bound to the population; bind the demography first")]
    UnboundOperator(String),
    /// A vital rate evaluated outside its admissible range.
    #[error("vital rate `{rate}` produced {value} at ({cell}, {genotype})")]
    RateOutOfRange {
        /// Rate name.
        rate: String,
        /// Habitable cell index.
        cell: usize,
        /// Genotype column.
        genotype: usize,
        /// Offending value.
        value: f64,
    },
    /// Rate output or constant has the wrong dimensions.
    #[error("vital rate `{rate}` has shape {found:?}, expected {expected:?}")]
    RateShape {
        /// Rate name.
        rate: String,
        /// Required shape.
        expected: (usize, usize),
        /// Produced shape.
        found: (usize, usize),
    },
    /// A vital rate function asked for a parameter that is not set.
    #[error("vital rate `{rate}` is missing parameter `{parameter}`")]
    MissingParameter {
        /// Rate name.
        rate: String,
        /// Parameter name.
        parameter: String,
    },
    /// Time grid is empty, unsorted, negative or non-finite.
    #[error("invalid time grid: {0}")]
    InvalidTimeGrid(String),
    /// Summary name in a configuration is not a built-in summary.
    #[error("unknown summary `{0}`")]
    UnknownSummary(String),
    /// Two summaries were registered under the same name.
    #[error("summary `{0}` is registered twice")]
    DuplicateSummary(String),
    /// Input to a migration operator has the wrong number of rows.
    #[error("operator input has {found} rows, expected {expected}")]
    OperatorInputShape {
        /// Required row count.
        expected: usize,
        /// Supplied row count.
        found: usize,
    },
}

/// A bound operator was applied against a different accessible-cell layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "operator was realised for {bound_cells} accessible cells on a {bound_rows}x{bound_cols} raster, \
     applied to {found_cells} accessible cells on a {found_rows}x{found_cols} raster"
)]
pub struct GeometryMismatchError {
    /// Accessible cells of the realised layout.
    pub bound_cells: usize,
    /// Raster rows of the realised layout.
    pub bound_rows: usize,
    /// Raster columns of the realised layout.
    pub bound_cols: usize,
    /// Accessible cells of the target layout.
    pub found_cells: usize,
    /// Raster rows of the target layout.
    pub found_rows: usize,
    /// Raster columns of the target layout.
    pub found_cols: usize,
}

/// Invalid arguments to an elementwise random draw.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplingError {
    /// Trial and probability matrices differ in shape.
    #[error("binomial arguments differ in shape: {trials:?} vs {probabilities:?}")]
    ShapeMismatch {
        /// Shape of the trial counts.
        trials: (usize, usize),
        /// Shape of the probabilities.
        probabilities: (usize, usize),
    },
    /// Probability outside [0, 1] or NaN.
    #[error("probability {value} at ({row}, {col}) is outside [0, 1]")]
    Probability {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
        /// Offending value.
        value: f64,
    },
    /// Negative or non-finite trial count or Poisson rate.
    #[error("{what} {value} at ({row}, {col}) must be finite and non-negative")]
    Magnitude {
        /// "trial count" or "rate".
        what: &'static str,
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
        /// Offending value.
        value: f64,
    },
}

/// Error raised by a single demographic stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Setup problem surfaced while evaluating the stage.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Operator applied against the wrong geometry.
    #[error(transparent)]
    Geometry(#[from] GeometryMismatchError),
    /// Random draw rejected its arguments.
    #[error(transparent)]
    Sampling(#[from] SamplingError),
}

/// The seven ordered stages of one generation, plus the pre-flight checks
/// and the final write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Validation before any stage runs.
    Preflight,
    /// Binomial selection of seeding individuals.
    Seeders,
    /// Pollen dispersal from seeders.
    PollenFlux,
    /// Bilinear seed production over the mating tensor.
    SeedProduction,
    /// Seed dispersal.
    SeedDispersal,
    /// Germination rate evaluation.
    Germination,
    /// Poisson draw of recruits.
    Recruitment,
    /// Binomial survival of the current population plus recruits.
    Survival,
    /// Writing the next abundance back into the population.
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preflight => "preflight",
            Stage::Seeders => "seeders",
            Stage::PollenFlux => "pollen flux",
            Stage::SeedProduction => "seed production",
            Stage::SeedDispersal => "seed dispersal",
            Stage::Germination => "germination",
            Stage::Recruitment => "recruitment",
            Stage::Survival => "survival",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A stage failure tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct GenerationError {
    /// Stage that failed.
    pub stage: Stage,
    /// Underlying cause.
    #[source]
    pub source: StageError,
}

impl GenerationError {
    pub(crate) fn at<E: Into<StageError>>(stage: Stage) -> impl FnOnce(E) -> Self {
        move |source| Self {
            stage,
            source: source.into(),
        }
    }
}

/// Errors surfaced to callers of the simulator.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Setup problem detected before the run started.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A bound operator does not match the population's layout.
    #[error(transparent)]
    Geometry(#[from] GeometryMismatchError),
    /// A generation failed; the run was aborted.
    #[error("generation {generation}: {source}")]
    Generation {
        /// Index of the generation being computed (1-based).
        generation: usize,
        /// Stage failure.
        #[source]
        source: GenerationError,
    },
    /// A summary function failed on a recorded snapshot.
    #[error("summary `{name}` failed at generation {generation}: {message}")]
    Summary {
        /// Generation index of the snapshot.
        generation: usize,
        /// Summary name.
        name: String,
        /// Message returned by the summary.
        message: String,
    },
    /// Reading or writing a file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON (de)serialisation failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
